use crate::error::ImplementationError;
use crate::into_url::Error as IntoUrlError;
use crate::psbt::FinalizeError;
use crate::requester::RequestError;
use crate::send::{BuildSenderError, ValidationError};

/// Why [`crate::Client::run`] did not end with a payjoin broadcast.
///
/// Except for failures before the original transaction exists, the original was broadcast by
/// the time this is returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The wallet failed to hand out or sign a PSBT.
    #[error("wallet error: {0}")]
    Wallet(#[source] ImplementationError),
    /// The original could not be finalized, so there is nothing to fall back to.
    #[error("can not finalize the original PSBT: {0}")]
    Finalize(#[from] FinalizeError),
    #[error("can not start a payjoin with the original PSBT: {0}")]
    Build(#[from] BuildSenderError),
    /// No proposal came back.
    #[error("payjoin request failed: {0}")]
    Request(#[from] RequestError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("input #{index} of the signed payjoin transaction is not finalized")]
    SignedNotFinalized { index: usize },
    #[error("payjoin transaction broadcast failed: {0}")]
    Broadcast(#[source] ImplementationError),
}

/// A [`crate::Client`] could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum BuildClientError {
    #[error("invalid payjoin endpoint: {0}")]
    Endpoint(#[from] IntoUrlError),
    #[error("can not build the HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
