//! Transport that carries the sanitized Original PSBT to the receiver.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::Psbt;
pub use error::{EndpointError, RequestError};
use url::Url;

use crate::params::NegotiationParameters;
use crate::request::Request;
use crate::MAX_CONTENT_LENGTH;

mod error;

/// Obtains a Payjoin Proposal for a sanitized Original PSBT.
///
/// [`HttpRequester`] speaks BIP 78 over HTTP. Implement this to bring another transport.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn request_payjoin(&self, psbt: &Psbt) -> Result<Psbt, RequestError>;
}

/// POSTs the PSBT, base64 encoded, to a BIP 78 endpoint.
#[derive(Debug, Clone)]
pub struct HttpRequester {
    http: reqwest::Client,
    endpoint: Url,
    params: NegotiationParameters,
}

impl HttpRequester {
    /// `timeout` bounds the whole request, from connecting until the response body is read.
    pub fn new(
        endpoint: Url,
        params: NegotiationParameters,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, endpoint, params))
    }

    pub fn with_client(http: reqwest::Client, endpoint: Url, params: NegotiationParameters) -> Self {
        Self { http, endpoint, params }
    }

    /// The endpoint URL with the negotiation parameters applied.
    pub fn url(&self) -> Url { crate::params::encode(self.endpoint.clone(), &self.params) }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn request_payjoin(&self, psbt: &Psbt) -> Result<Psbt, RequestError> {
        let req = Request::new_v1(&self.endpoint, &self.params, psbt);
        tracing::debug!("Posting original PSBT to {}", req.url);
        let response = self
            .http
            .post(req.url)
            .header(http::header::CONTENT_TYPE, req.content_type)
            .body(req.body)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let oversized =
            response.content_length().is_some_and(|len| len > MAX_CONTENT_LENGTH as u64);
        if !status.is_success() {
            // An oversized error body is not read, it can only yield the generic error.
            let error = if oversized {
                EndpointError::from_raw_code("")
            } else {
                let body = response.bytes().await.map_err(transport_failure)?;
                error_from_body(&body)
            };
            tracing::debug!("Endpoint answered {status}: {error:?}");
            return Err(error.into());
        }
        if oversized {
            return Err(RequestError::ContentTooLarge);
        }
        let body = response.bytes().await.map_err(transport_failure)?;
        process_response(&body)
    }
}

/// Transport details are only ever logged, the caller sees a generic endpoint error.
fn transport_failure(error: reqwest::Error) -> RequestError {
    tracing::debug!("Payjoin request failed: {error}");
    EndpointError::transport_failure().into()
}

/// Bodies without a `Content-Length` are bounded here instead.
fn error_from_body(body: &[u8]) -> EndpointError {
    if body.len() > MAX_CONTENT_LENGTH {
        return EndpointError::from_raw_code("");
    }
    EndpointError::from_response_body(body)
}

/// Decode the body of a successful response into the Payjoin Proposal.
pub(crate) fn process_response(body: &[u8]) -> Result<Psbt, RequestError> {
    if body.len() > MAX_CONTENT_LENGTH {
        return Err(RequestError::ContentTooLarge);
    }
    let body = std::str::from_utf8(body).map_err(|_| RequestError::Parse)?.trim();
    if body.is_empty() {
        return Err(RequestError::NoProposal);
    }
    Psbt::from_str(body).map_err(|_| RequestError::Parse)
}
