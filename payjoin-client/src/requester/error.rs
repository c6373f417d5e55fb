use std::fmt;
use std::str::FromStr;

use crate::error::ImplementationError;
use crate::error_codes::{ErrorCode, GENERIC_MESSAGE};
use crate::MAX_CONTENT_LENGTH;

/// The request for a Payjoin Proposal did not produce one.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The endpoint answered with an error, or could not be reached at all.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error("response is larger than {MAX_CONTENT_LENGTH} bytes")]
    ContentTooLarge,
    #[error("couldn't decode response as PSBT")]
    Parse,
    #[error("the receiver returned no proposal")]
    NoProposal,
    /// Failure of a custom [`crate::Requester`].
    #[error("requester failed: {0}")]
    Implementation(ImplementationError),
}

/// An error reported by the payjoin endpoint.
///
/// Only the fixed message of a well-known [`ErrorCode`] is ever displayed. Whatever the endpoint
/// actually sent is kept for debug logs.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointError {
    code: Option<ErrorCode>,
    raw_code: String,
}

impl EndpointError {
    pub(crate) fn from_raw_code(raw_code: impl Into<String>) -> Self {
        let raw_code = raw_code.into();
        Self { code: ErrorCode::from_str(&raw_code).ok(), raw_code }
    }

    /// Best effort read of the `errorCode` field of a JSON error body.
    pub(crate) fn from_response_body(body: &[u8]) -> Self {
        let raw_code = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|json| json.get("errorCode")?.as_str().map(str::to_owned))
            .unwrap_or_default();
        Self::from_raw_code(raw_code)
    }

    /// Stands in for a response that never arrived.
    pub(crate) fn transport_failure() -> Self { Self::from_raw_code(String::new()) }

    /// The well-known code, if the endpoint sent one.
    pub fn code(&self) -> Option<ErrorCode> { self.code }

    /// The message safe to show to the sender.
    pub fn message(&self) -> &'static str {
        self.code.as_ref().map(ErrorCode::message).unwrap_or(GENERIC_MESSAGE)
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.message()) }
}

impl fmt::Debug for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::json!({
            "errorCode": self.raw_code,
            "message": self.message(),
        });
        write!(f, "EndpointError: {json}")
    }
}

impl std::error::Error for EndpointError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn well_known_code_shows_fixed_message() {
        let error = EndpointError::from_response_body(
            br#"{"errorCode": "not-enough-money", "message": "send me more"}"#,
        );
        assert_eq!(error.code(), Some(ErrorCode::NotEnoughMoney));
        assert_eq!(
            error.to_string(),
            "The receiver added some inputs but could not bump the fee of the payjoin proposal."
        );
        assert!(!error.to_string().contains("send me more"));
    }

    #[test]
    fn unknown_code_shows_generic_message() {
        let error = EndpointError::from_response_body(br#"{"errorCode": "call-0800-scam"}"#);
        assert_eq!(error.code(), None);
        assert_eq!(error.to_string(), GENERIC_MESSAGE);
        assert!(format!("{error:?}").contains("call-0800-scam"));
    }

    #[test]
    fn malformed_bodies_yield_empty_code() {
        for body in [&b"<html>oops</html>"[..], b"", br#"{"errorCode": 42}"#, br#"[1, 2]"#] {
            let error = EndpointError::from_response_body(body);
            assert_eq!(error, EndpointError::from_raw_code(""));
            assert_eq!(error.message(), GENERIC_MESSAGE);
        }
        assert_eq!(EndpointError::transport_failure(), EndpointError::from_raw_code(""));
    }
}
