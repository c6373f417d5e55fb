use bitcoin::Psbt;
use url::Url;

use crate::params::{self, NegotiationParameters};

pub(crate) const V1_REQ_CONTENT_TYPE: &str = "text/plain";

/// Represents data that needs to be transmitted to the receiver.
/// Ensure the `Content-Length` is set to the length of `body`. (most libraries do this automatically)
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// URL to send the request to, negotiation parameters included.
    pub url: Url,

    /// The `Content-Type` header to use for the request.
    pub content_type: &'static str,

    /// The sanitized Original PSBT, base64 encoded.
    pub body: Vec<u8>,
}

impl Request {
    /// Construct the request posting `psbt` to `endpoint` under `params`.
    pub fn new_v1(endpoint: &Url, params: &NegotiationParameters, psbt: &Psbt) -> Self {
        Self {
            url: params::encode(endpoint.clone(), params),
            content_type: V1_REQ_CONTENT_TYPE,
            body: psbt.to_string().into_bytes(),
        }
    }
}
