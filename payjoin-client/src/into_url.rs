use std::fmt;

use url::{ParseError, Url};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    BadScheme(String),
    ParseError(ParseError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            BadScheme(scheme) => write!(f, "URL scheme {scheme:?} is not allowed for a payjoin endpoint"),
            ParseError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BadScheme(_) => None,
            Error::ParseError(e) => Some(e),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error { Error::ParseError(err) }
}

type Result<T> = core::result::Result<T, Error>;

/// Try to convert some type into a payjoin endpoint [`Url`].
///
/// This trait is "sealed", such that only types within payjoin-client can
/// implement it.
///
/// This design is inspired by the `reqwest` crate's design:
/// see <https://docs.rs/reqwest/latest/reqwest/trait.IntoUrl.html>
pub trait IntoUrl: IntoUrlSealed {}

impl IntoUrl for Url {}
impl IntoUrl for &Url {}
impl IntoUrl for &str {}
impl IntoUrl for &String {}
impl IntoUrl for String {}

pub trait IntoUrlSealed {
    /// Besides parsing as a valid `Url`, the `Url` must use a scheme an HTTP client can POST to.
    fn into_url(self) -> Result<Url>;
}

fn check_scheme(url: Url) -> Result<Url> {
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        scheme => Err(Error::BadScheme(scheme.to_owned())),
    }
}

impl IntoUrlSealed for &Url {
    fn into_url(self) -> Result<Url> { check_scheme(self.clone()) }
}

impl IntoUrlSealed for Url {
    fn into_url(self) -> Result<Url> { check_scheme(self) }
}

impl IntoUrlSealed for &str {
    fn into_url(self) -> Result<Url> { check_scheme(Url::parse(self)?) }
}

impl IntoUrlSealed for &String {
    fn into_url(self) -> Result<Url> { (&**self).into_url() }
}

impl IntoUrlSealed for String {
    fn into_url(self) -> Result<Url> { (&*self).into_url() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_and_https_endpoints_are_allowed() {
        assert_eq!("http://localhost".into_url().unwrap().scheme(), "http");
        assert_eq!(String::from("https://localhost/pj").into_url().unwrap().scheme(), "https");
    }

    #[test]
    fn other_schemes_are_rejected() {
        let err = Url::parse("file:///etc/hosts").unwrap().into_url().unwrap_err();
        assert_eq!(err, Error::BadScheme("file".to_owned()));
        let err = "blob:https://example.com".into_url().unwrap_err();
        assert_eq!(err, Error::BadScheme("blob".to_owned()));
    }

    #[test]
    fn unparsable_endpoint_is_a_parse_error() {
        assert!(matches!("not a url".into_url(), Err(Error::ParseError(_))));
    }
}
