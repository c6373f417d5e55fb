//! Validate a Payjoin Proposal against the Original PSBT
//!
//! This module contains no IO. [`OriginalPsbt`] takes the fallback snapshot of what the wallet
//! built, [`PsbtContext`] produces the PSBT to send and checks whatever the receiver answers
//! with. [`crate::Client`] wires both to a wallet and a transport.

use std::collections::{BTreeSet, HashMap, HashSet};

use bitcoin::psbt::Psbt;
use bitcoin::{Amount, FeeRate, OutPoint, Script, ScriptBuf, Sequence, Transaction};
pub use error::{BuildSenderError, ValidationError, ValidationErrorKind};
pub(crate) use error::{InternalBuildSenderError, InternalProposalError};

use crate::output_substitution::OutputSubstitution;
use crate::params::NegotiationParameters;
use crate::psbt::{FinalizeError, PsbtExt};
use crate::script_type::{FeeEstimation, ScriptType};
use crate::validation::{self, KeypathMetadata};

mod error;

type InternalResult<T> = Result<T, InternalProposalError>;

/// The sender's transaction as the wallet built it, together with its finalized form.
///
/// The finalized transaction is what gets broadcast whenever the negotiation fails.
#[derive(Debug, Clone)]
pub struct OriginalPsbt {
    wallet_psbt: Psbt,
    finalized: Psbt,
    tx: Transaction,
}

impl OriginalPsbt {
    /// Finalize a copy of `wallet_psbt` and extract the original transaction from it.
    ///
    /// `wallet_psbt` itself is kept untouched: its signing metadata is what gets attached to the
    /// sender's inputs of the proposal later on.
    pub fn new(wallet_psbt: Psbt) -> Result<Self, FinalizeError> {
        let mut finalized = wallet_psbt.clone();
        finalized.finalize_inputs()?;
        let tx = finalized.clone().extract_tx_unchecked_fee_rate();
        Ok(Self { wallet_psbt, finalized, tx })
    }

    /// The fully signed original transaction.
    pub fn transaction(&self) -> &Transaction { &self.tx }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AdditionalFeeContribution {
    max_amount: Amount,
    vout: usize,
}

/// Data required to validate the response against the original PSBT.
#[derive(Debug, Clone)]
pub struct PsbtContext {
    wallet_psbt: Psbt,
    original_psbt: Psbt,
    input_type: ScriptType,
    payee: ScriptBuf,
    output_substitution: OutputSubstitution,
    fee_contribution: Option<AdditionalFeeContribution>,
    min_fee_rate: Option<FeeRate>,
    fee_estimation: FeeEstimation,
}

macro_rules! check_eq {
    ($proposed:expr, $original:expr, $error:ident) => {
        match ($proposed, $original) {
            (proposed, original) if proposed != original =>
                return Err(InternalProposalError::$error { proposed, original }),
            _ => (),
        }
    };
}

fn ensure<T>(condition: bool, error: T) -> Result<(), T> {
    if !condition {
        return Err(error);
    }
    Ok(())
}

/// Where an input of the proposal comes from.
#[derive(Debug, Clone, Copy)]
enum InputOrigin {
    /// Index of the matching input in the original transaction.
    Sender(usize),
    Receiver(ScriptType),
}

/// A proposal after input reconciliation: sender inputs carry the wallet's signing metadata
/// again and receiver inputs are stripped down to their spend data.
struct ReconciledInputs {
    proposal: Psbt,
    origins: Vec<InputOrigin>,
}

impl PsbtContext {
    /// Check that `original` can start a negotiation with `payee` under `params`.
    pub fn new(
        original: OriginalPsbt,
        payee: ScriptBuf,
        params: &NegotiationParameters,
        fee_estimation: FeeEstimation,
    ) -> Result<Self, BuildSenderError> {
        let OriginalPsbt { wallet_psbt, finalized, .. } = original;
        let psbt =
            finalized.validate().map_err(InternalBuildSenderError::InconsistentOriginalPsbt)?;
        psbt.validate_input_utxos().map_err(InternalBuildSenderError::InvalidOriginalInput)?;

        let input_type =
            validation::classify_inputs(&psbt).map_err(InternalBuildSenderError::InputType)?;
        ensure(
            input_type.is_supported_sender_type(),
            InternalBuildSenderError::UnsupportedInputType(input_type),
        )?;
        check_single_payee(&psbt, &payee)?;
        let fee_contribution = check_fee_output(
            &psbt,
            &payee,
            params.max_additional_fee_contribution,
            params.additional_fee_output_index,
        )?;

        Ok(PsbtContext {
            wallet_psbt,
            original_psbt: psbt,
            input_type,
            payee,
            output_substitution: params.output_substitution(),
            fee_contribution,
            min_fee_rate: params.min_fee_rate,
            fee_estimation,
        })
    }

    /// Script type shared by every sender input.
    pub fn input_type(&self) -> ScriptType { self.input_type }

    /// The finalized original with everything the receiver doesn't need removed.
    pub fn sanitized_psbt(&self) -> Psbt {
        let mut psbt = self.original_psbt.clone();
        for index in 0..psbt.inputs.len() {
            psbt.clear_finalized_input(index);
        }
        clear_unneeded_fields(&mut psbt);
        psbt
    }

    /// Check the receiver's proposal and merge the sender's metadata back into it.
    ///
    /// The returned PSBT is ready for the wallet to sign the sender's inputs.
    pub fn process_proposal(&self, proposal: Psbt) -> Result<Psbt, ValidationError> {
        let proposal = proposal.validate().map_err(InternalProposalError::InconsistentProposal)?;
        self.check_privacy(&proposal)?;
        let reconciled = self.reconcile_inputs(proposal)?;
        self.check_globals(&reconciled.proposal)?;
        let (original_fee, proposal_fee) = self.check_fees(&reconciled.proposal)?;
        let additional_fee = proposal_fee - original_fee;
        let ReconciledInputs { proposal, origins } = reconciled;
        let proposal = self.reconcile_outputs(proposal, &origins, original_fee, additional_fee)?;
        self.check_min_fee_rate(&proposal, &origins, proposal_fee)?;
        tracing::debug!("proposal passed validation, fee increased by {additional_fee}");
        Ok(proposal)
    }

    /// The receiver must never learn or claim anything about key derivation.
    fn check_privacy(&self, proposal: &Psbt) -> InternalResult<()> {
        ensure(!proposal.has_keypath_metadata(), InternalProposalError::ProposalContainsXpub)?;
        ensure(
            !proposal.inputs.iter().any(KeypathMetadata::has_keypath_metadata),
            InternalProposalError::TxInContainsKeyPaths,
        )?;
        ensure(
            !proposal.outputs.iter().any(KeypathMetadata::has_keypath_metadata),
            InternalProposalError::TxOutContainsKeyPaths,
        )?;
        Ok(())
    }

    fn reconcile_inputs(&self, mut proposal: Psbt) -> InternalResult<ReconciledInputs> {
        let original_tx = self.original_psbt.underlying_transaction();
        ensure(
            proposal.unsigned_tx.input.len() > original_tx.input.len(),
            InternalProposalError::InputCountNotIncreased {
                proposed: proposal.unsigned_tx.input.len(),
                original: original_tx.input.len(),
            },
        )?;
        let original_inputs: HashMap<OutPoint, usize> = original_tx
            .input
            .iter()
            .enumerate()
            .map(|(index, txin)| (txin.previous_output, index))
            .collect();
        let mut sequences: BTreeSet<Sequence> =
            original_tx.input.iter().map(|txin| txin.sequence).collect();
        let mut matched = HashSet::with_capacity(original_inputs.len());
        let mut origins = Vec::with_capacity(proposal.inputs.len());

        for (index, proposed) in proposal.input_pairs().enumerate() {
            let violations = validation::structural_sanity(proposed.txin, proposed.psbtin);
            ensure(
                violations.is_empty(),
                InternalProposalError::InsaneInput { index, violations },
            )?;
            match original_inputs.get(&proposed.txin.previous_output) {
                // ours (sender)
                Some(&original_index) => {
                    ensure(
                        matched.insert(original_index),
                        InternalProposalError::DuplicateSenderInput,
                    )?;
                    let original = &self.original_psbt.inputs[original_index];
                    check_eq!(
                        proposed.txin.sequence,
                        original_tx.input[original_index].sequence,
                        SenderTxinSequenceChanged
                    );
                    ensure(
                        proposed.psbtin.final_script_sig.is_none(),
                        InternalProposalError::SenderTxinContainsFinalScriptSig,
                    )?;
                    ensure(
                        proposed.psbtin.final_script_witness.is_none(),
                        InternalProposalError::SenderTxinContainsFinalScriptWitness,
                    )?;
                    ensure(
                        proposed.psbtin.partial_sigs.is_empty(),
                        InternalProposalError::ContainsPartialSigs,
                    )?;
                    let utxo_unchanged = (proposed.psbtin.witness_utxo.is_none()
                        || proposed.psbtin.witness_utxo == original.witness_utxo)
                        && (proposed.psbtin.non_witness_utxo.is_none()
                            || proposed.psbtin.non_witness_utxo == original.non_witness_utxo);
                    ensure(utxo_unchanged, InternalProposalError::SenderTxinUtxoChanged)?;
                    origins.push(InputOrigin::Sender(original_index));
                }
                // theirs (receiver)
                None => {
                    ensure(
                        proposed.is_finalized(),
                        InternalProposalError::ReceiverTxinNotFinalized,
                    )?;
                    ensure(
                        proposed.has_utxo_info(),
                        InternalProposalError::ReceiverTxinMissingUtxoInfo,
                    )?;
                    let input_type =
                        validation::classify_input_type(proposed.txin, proposed.psbtin)
                            .map_err(InternalProposalError::ReceiverTxinPrevTxOut)?;
                    check_eq!(input_type, self.input_type, MixedInputTypes);
                    sequences.insert(proposed.txin.sequence);
                    origins.push(InputOrigin::Receiver(input_type));
                }
            }
        }
        ensure(matched.len() == original_inputs.len(), InternalProposalError::MissingSenderInput)?;
        ensure(sequences.len() == 1, InternalProposalError::MixedSequence)?;

        for (index, origin) in origins.iter().enumerate() {
            match origin {
                InputOrigin::Sender(original_index) => {
                    proposal.update_input(index, &self.wallet_psbt.inputs[*original_index]);
                }
                InputOrigin::Receiver(_) => {
                    proposal.clear_finalized_input(index);
                }
            }
        }
        Ok(ReconciledInputs { proposal, origins })
    }

    /// Check that the version and lock time are the same as in the original PSBT.
    fn check_globals(&self, proposal: &Psbt) -> InternalResult<()> {
        check_eq!(
            proposal.unsigned_tx.version,
            self.original_psbt.unsigned_tx.version,
            VersionsDontMatch
        );
        check_eq!(
            proposal.unsigned_tx.lock_time,
            self.original_psbt.unsigned_tx.lock_time,
            LockTimesDontMatch
        );
        Ok(())
    }

    /// Returns the original and the proposed absolute fee.
    fn check_fees(&self, proposal: &Psbt) -> InternalResult<(Amount, Amount)> {
        let original_fee =
            self.original_psbt.total_fee().map_err(InternalProposalError::OriginalFee)?;
        let proposal_fee = proposal.total_fee().map_err(InternalProposalError::ProposalFee)?;
        ensure(original_fee <= proposal_fee, InternalProposalError::AbsoluteFeeDecreased)?;
        Ok((original_fee, proposal_fee))
    }

    fn reconcile_outputs(
        &self,
        mut proposal: Psbt,
        origins: &[InputOrigin],
        original_fee: Amount,
        additional_fee: Amount,
    ) -> InternalResult<Psbt> {
        let original_outputs = &self.original_psbt.unsigned_tx.output;
        let mut remaining: BTreeSet<usize> = (0..original_outputs.len()).collect();
        let mut merges = Vec::with_capacity(original_outputs.len());

        for (index, proposed_txout) in proposal.unsigned_tx.output.iter().enumerate() {
            let Some(original_index) = remaining
                .iter()
                .copied()
                .find(|i| original_outputs[*i].script_pubkey == proposed_txout.script_pubkey)
            else {
                // additional output
                continue;
            };
            remaining.remove(&original_index);
            let original_txout = &original_outputs[original_index];

            match self.fee_contribution {
                // fee output
                Some(AdditionalFeeContribution { max_amount, vout }) if vout == original_index => {
                    let contributed_fee = original_txout
                        .value
                        .checked_sub(proposed_txout.value)
                        .unwrap_or(Amount::ZERO);
                    ensure(
                        contributed_fee <= max_amount,
                        InternalProposalError::FeeContributionExceedsMaximum,
                    )?;
                    ensure(
                        contributed_fee <= additional_fee,
                        InternalProposalError::PayeeTookContributedFee,
                    )?;
                    ensure(
                        contributed_fee <= self.max_input_cost(origins, original_fee),
                        InternalProposalError::FeeContributionExceedsInputCost,
                    )?;
                }
                // substitutable payee output
                _ if original_txout.script_pubkey == self.payee
                    && self.output_substitution.is_enabled() => (),
                // our output
                _ => ensure(
                    proposed_txout.value >= original_txout.value,
                    InternalProposalError::OutputValueDecreased,
                )?,
            }
            merges.push((index, original_index));
        }

        let substituted_payee = self.output_substitution.is_enabled()
            && remaining.len() == 1
            && remaining.iter().all(|i| original_outputs[*i].script_pubkey == self.payee);
        ensure(
            remaining.is_empty() || substituted_payee,
            InternalProposalError::MissingOrShuffledOutputs,
        )?;

        for (index, original_index) in merges {
            proposal.update_output(index, &self.wallet_psbt.outputs[original_index]);
        }
        Ok(proposal)
    }

    /// What the receiver's inputs cost at the original fee rate, with some breathing room.
    fn max_input_cost(&self, origins: &[InputOrigin], original_fee: Amount) -> Amount {
        let original_weight = self.original_psbt.clone().extract_tx_unchecked_fee_rate().weight();
        let original_fee_rate = original_fee / original_weight;
        let receiver_inputs = origins.iter().filter_map(|origin| match origin {
            InputOrigin::Receiver(input_type) => Some(*input_type),
            InputOrigin::Sender(_) => None,
        });
        let weight = self.fee_estimation.contribution_weight(receiver_inputs, origins.len());
        original_fee_rate.checked_mul_by_weight(weight).unwrap_or(Amount::MAX)
    }

    /// Weigh the proposal as it will be once signed, using the original's final scripts for the
    /// sender's inputs.
    fn check_min_fee_rate(
        &self,
        proposal: &Psbt,
        origins: &[InputOrigin],
        proposal_fee: Amount,
    ) -> InternalResult<()> {
        let Some(min_fee_rate) = self.min_fee_rate else { return Ok(()) };
        let mut predicted = proposal.clone();
        for (input, origin) in predicted.inputs.iter_mut().zip(origins) {
            if let InputOrigin::Sender(original_index) = origin {
                let original = &self.original_psbt.inputs[*original_index];
                input.final_script_sig = original.final_script_sig.clone();
                input.final_script_witness = original.final_script_witness.clone();
            }
        }
        let predicted_weight = predicted.extract_tx_unchecked_fee_rate().weight();
        ensure(
            proposal_fee / predicted_weight >= min_fee_rate,
            InternalProposalError::FeeRateBelowMinimum,
        )
    }
}

/// Ensure that the payee's output scriptPubKey appears in the list of outputs exactly once.
fn check_single_payee(psbt: &Psbt, script_pubkey: &Script) -> Result<(), InternalBuildSenderError> {
    let mut payee_found = false;
    for output in &psbt.unsigned_tx.output {
        if output.script_pubkey == *script_pubkey {
            if payee_found {
                return Err(InternalBuildSenderError::MultiplePayeeOutputs);
            }
            payee_found = true;
        }
    }
    if payee_found {
        Ok(())
    } else {
        Err(InternalBuildSenderError::MissingPayeeOutput)
    }
}

fn check_fee_output(
    psbt: &Psbt,
    payee: &Script,
    max_amount: Option<Amount>,
    vout: Option<usize>,
) -> Result<Option<AdditionalFeeContribution>, InternalBuildSenderError> {
    let Some(max_amount) = max_amount else { return Ok(None) };
    let vout = vout.ok_or(InternalBuildSenderError::FeeOutputIndexMissing)?;
    let output_count = psbt.unsigned_tx.output.len();
    let fee_output = psbt
        .unsigned_tx
        .output
        .get(vout)
        .ok_or(InternalBuildSenderError::FeeOutputIndexOutOfBounds { index: vout, output_count })?;
    ensure(
        fee_output.script_pubkey != *payee,
        InternalBuildSenderError::FeeOutputIndexPointsAtPayee,
    )?;
    ensure(
        fee_output.value >= max_amount,
        InternalBuildSenderError::FeeOutputValueLowerThanFeeContribution,
    )?;
    Ok(Some(AdditionalFeeContribution { max_amount, vout }))
}

fn clear_unneeded_fields(psbt: &mut Psbt) {
    psbt.xpub_mut().clear();
    psbt.proprietary.clear();
    psbt.unknown.clear();
    for output in &mut psbt.outputs {
        output.bip32_derivation.clear();
        output.tap_internal_key = None;
        output.tap_key_origins.clear();
        output.proprietary.clear();
        output.unknown.clear();
    }
}
