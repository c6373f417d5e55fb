//! Drive one payjoin negotiation end to end.

use std::time::Duration;

use bitcoin::{ScriptBuf, Transaction};
pub use error::{BuildClientError, Error};

use crate::config::ClientConfig;
use crate::into_url::{IntoUrl, IntoUrlSealed};
use crate::params::NegotiationParameters;
use crate::psbt::PsbtExt;
use crate::requester::{HttpRequester, Requester};
use crate::script_type::FeeEstimation;
use crate::send::{OriginalPsbt, PsbtContext};
use crate::wallet::Wallet;

mod error;

const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_secs(120);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A BIP 78 sender paying `payee` from `wallet`.
///
/// Every call to [`Client::run`] is a separate negotiation, the client keeps no state between
/// them.
pub struct Client<W, R = HttpRequester> {
    wallet: W,
    requester: R,
    payee: ScriptBuf,
    params: NegotiationParameters,
    fallback_delay: Duration,
    fee_estimation: FeeEstimation,
}

impl<W: Wallet> Client<W, HttpRequester> {
    /// Negotiate with the BIP 78 endpoint at `endpoint` over HTTP.
    ///
    /// `payee` is the script of the output paying the receiver in the wallet's original PSBT.
    pub fn new(
        wallet: W,
        endpoint: impl IntoUrl,
        payee: ScriptBuf,
        params: NegotiationParameters,
    ) -> Result<Self, BuildClientError> {
        let requester = HttpRequester::new(endpoint.into_url()?, params, DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self::with_requester(wallet, requester, payee, params))
    }

    pub fn from_config(
        wallet: W,
        payee: ScriptBuf,
        config: &ClientConfig,
    ) -> Result<Self, BuildClientError> {
        let endpoint = (&config.endpoint).into_url()?;
        let requester = HttpRequester::new(endpoint, config.params, config.request_timeout)?;
        Ok(Self::with_requester(wallet, requester, payee, config.params)
            .fallback_delay(config.fallback_delay)
            .fee_estimation(config.fee_estimation))
    }
}

impl<W: Wallet, R: Requester> Client<W, R> {
    /// Negotiate through a custom transport.
    pub fn with_requester(
        wallet: W,
        requester: R,
        payee: ScriptBuf,
        params: NegotiationParameters,
    ) -> Self {
        Self {
            wallet,
            requester,
            payee,
            params,
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            fee_estimation: FeeEstimation::default(),
        }
    }

    /// Delay before the original transaction is re-broadcast after a successful payjoin.
    pub fn fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    /// Input sizes used to bound what the receiver may take from the fee output.
    pub fn fee_estimation(mut self, fee_estimation: FeeEstimation) -> Self {
        self.fee_estimation = fee_estimation;
        self
    }

    /// Run the negotiation until either the payjoin or the original transaction is broadcast.
    ///
    /// Once the original transaction has been extracted, any failure broadcasts it before the
    /// error is returned. After a successful payjoin broadcast the original is scheduled with the
    /// wallet in case the payjoin never confirms.
    pub async fn run(&self) -> Result<(), Error> {
        let wallet_psbt = self.wallet.original_psbt().await.map_err(Error::Wallet)?;
        let original = OriginalPsbt::new(wallet_psbt)?;
        let original_tx = original.transaction().clone();
        tracing::debug!("Extracted original transaction {}", original_tx.compute_txid());

        match self.negotiate(original).await {
            Ok(payjoin_tx) => {
                tracing::info!("Broadcast payjoin transaction {}", payjoin_tx.compute_txid());
                self.wallet.schedule_broadcast_tx(original_tx, self.fallback_delay);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Payjoin failed, broadcasting the original transaction: {e}");
                match self.wallet.broadcast_tx(&original_tx).await {
                    Ok(()) => tracing::info!(
                        "Broadcast original transaction {}",
                        original_tx.compute_txid()
                    ),
                    Err(broadcast_error) => tracing::warn!(
                        "Broadcast of the original transaction failed: {broadcast_error}"
                    ),
                }
                Err(e)
            }
        }
    }

    async fn negotiate(&self, original: OriginalPsbt) -> Result<Transaction, Error> {
        let context =
            PsbtContext::new(original, self.payee.clone(), &self.params, self.fee_estimation)?;
        tracing::debug!("Original PSBT spends {} inputs", context.input_type());

        let proposal = self.requester.request_payjoin(&context.sanitized_psbt()).await?;
        tracing::debug!("Received proposal with {} inputs", proposal.unsigned_tx.input.len());
        let proposal = context.process_proposal(proposal)?;

        let signed = self.wallet.sign_psbt(proposal).await.map_err(Error::Wallet)?;
        let payjoin_tx = signed
            .extract_final_tx()
            .map_err(|not_finalized| Error::SignedNotFinalized { index: not_finalized.index })?;
        self.wallet.broadcast_tx(&payjoin_tx).await.map_err(Error::Broadcast)?;
        Ok(payjoin_tx)
    }
}
