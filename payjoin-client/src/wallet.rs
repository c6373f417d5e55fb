//! The sender's wallet, as seen from a negotiation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Psbt, Transaction};

use crate::error::ImplementationError;

/// Everything [`crate::Client`] needs from the sender's wallet.
///
/// The wallet owns the keys and the connection to the bitcoin network, the client only ever
/// hands PSBTs and transactions back and forth.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// The PSBT paying the receiver.
    ///
    /// Every input must be signed, or at least signable, so that it can be finalized without the
    /// wallet's help. It is used to build the original transaction broadcast as a fallback.
    async fn original_psbt(&self) -> Result<Psbt, ImplementationError>;

    /// Sign and finalize the inputs of `psbt` that are not finalized yet.
    ///
    /// Inputs the receiver contributed arrive finalized and must be left untouched.
    async fn sign_psbt(&self, psbt: Psbt) -> Result<Psbt, ImplementationError>;

    async fn broadcast_tx(&self, tx: &Transaction) -> Result<(), ImplementationError>;

    /// Broadcast `tx` after `delay`, without blocking the caller.
    ///
    /// This is expected to fail quietly most of the time: when the payjoin transaction
    /// propagated, the original double spends it. Errors must never surface, see
    /// [`spawn_delayed_broadcast`] for a ready-made implementation on tokio.
    fn schedule_broadcast_tx(&self, tx: Transaction, delay: Duration);
}

/// Run `broadcast` on the tokio runtime once `delay` has elapsed.
///
/// A failed broadcast only gets a debug log. One that succeeds is reported as a warning, as it
/// means the payjoin transaction never made it.
pub fn spawn_delayed_broadcast<F>(delay: Duration, broadcast: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = Result<(), ImplementationError>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match broadcast.await {
            Ok(()) => tracing::warn!(
                "Fallback broadcast of the original transaction succeeded, the payjoin was not confirmed"
            ),
            Err(e) => tracing::debug!("Fallback broadcast of the original transaction failed: {e}"),
        }
    })
}
