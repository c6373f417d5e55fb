//! Utilities to make work with PSBTs easier

use std::collections::BTreeMap;
use std::fmt;

use bitcoin::psbt::Psbt;
use bitcoin::{bip32, psbt, Amount, FeeRate, Transaction, TxIn, TxOut};

mod finalize;

pub use finalize::FinalizeError;
pub(crate) use finalize::InternalFinalizeError;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum InconsistentPsbt {
    UnequalInputCounts { tx_ins: usize, psbt_ins: usize },
    UnequalOutputCounts { tx_outs: usize, psbt_outs: usize },
}

impl fmt::Display for InconsistentPsbt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InconsistentPsbt::UnequalInputCounts { tx_ins, psbt_ins, } => write!(f, "The number of PSBT inputs ({psbt_ins}) doesn't equal to the number of unsigned transaction inputs ({tx_ins})"),
            InconsistentPsbt::UnequalOutputCounts { tx_outs, psbt_outs, } => write!(f, "The number of PSBT outputs ({psbt_outs}) doesn't equal to the number of unsigned transaction outputs ({tx_outs})"),
        }
    }
}

impl std::error::Error for InconsistentPsbt {}

/// The negotiable transaction container operations the sender needs on top of [`Psbt`].
pub(crate) trait PsbtExt: Sized {
    fn xpub_mut(
        &mut self,
    ) -> &mut BTreeMap<bip32::Xpub, (bip32::Fingerprint, bip32::DerivationPath)>;
    fn input_pairs(&self) -> Box<dyn Iterator<Item = InputPair<'_>> + '_>;
    /// The transaction this container wraps, without any per-input metadata applied.
    fn underlying_transaction(&self) -> &Transaction;
    // guarantees that length of psbt input matches that of unsigned_tx inputs and same
    /// thing for outputs.
    fn validate(self) -> Result<Self, InconsistentPsbt>;
    fn validate_input_utxos(&self) -> Result<(), PsbtInputsError>;
    /// Finalize every input that is not finalized yet from its partial signature.
    fn finalize_inputs(&mut self) -> Result<(), FinalizeError>;
    /// Drop everything but UTXO information and final scripts from a finalized input.
    ///
    /// Returns false if the input does not exist or is not finalized.
    fn clear_finalized_input(&mut self, index: usize) -> bool;
    /// Copy the signing metadata of `original` into the input at `index`.
    fn update_input(&mut self, index: usize, original: &psbt::Input) -> bool;
    /// Copy the key derivation metadata of `original` into the output at `index`.
    fn update_output(&mut self, index: usize, original: &psbt::Output) -> bool;
    /// Sum of the spent values minus the sum of the created values.
    fn total_fee(&self) -> Result<Amount, FeeError>;
    /// [`PsbtExt::total_fee`] over the weight of the transaction with final scripts applied.
    fn fee_rate(&self) -> Result<FeeRate, FeeError>;
    /// Extract the broadcastable transaction, refusing if any input lacks final scripts.
    fn extract_final_tx(self) -> Result<Transaction, NotFinalized>;
}

impl PsbtExt for Psbt {
    fn xpub_mut(
        &mut self,
    ) -> &mut BTreeMap<bip32::Xpub, (bip32::Fingerprint, bip32::DerivationPath)> {
        &mut self.xpub
    }

    fn input_pairs(&self) -> Box<dyn Iterator<Item = InputPair<'_>> + '_> {
        Box::new(
            self.unsigned_tx
                .input
                .iter()
                .zip(&self.inputs)
                .map(|(txin, psbtin)| InputPair { txin, psbtin }),
        )
    }

    fn underlying_transaction(&self) -> &Transaction { &self.unsigned_tx }

    fn validate(self) -> Result<Self, InconsistentPsbt> {
        let tx_ins = self.unsigned_tx.input.len();
        let psbt_ins = self.inputs.len();
        let tx_outs = self.unsigned_tx.output.len();
        let psbt_outs = self.outputs.len();

        if psbt_ins != tx_ins {
            Err(InconsistentPsbt::UnequalInputCounts { tx_ins, psbt_ins })
        } else if psbt_outs != tx_outs {
            Err(InconsistentPsbt::UnequalOutputCounts { tx_outs, psbt_outs })
        } else {
            Ok(self)
        }
    }

    fn validate_input_utxos(&self) -> Result<(), PsbtInputsError> {
        self.input_pairs().enumerate().try_for_each(|(index, input)| {
            input.validate_utxo().map_err(|error| PsbtInputsError { index, error })
        })
    }

    fn finalize_inputs(&mut self) -> Result<(), FinalizeError> {
        let pairs = self.unsigned_tx.input.iter().zip(self.inputs.iter_mut());
        for (index, (txin, psbtin)) in pairs.enumerate() {
            let script_pubkey = {
                let pair = InputPair { txin, psbtin: &*psbtin };
                if pair.is_finalized() {
                    continue;
                }
                pair.previous_txout()
                    .map_err(|e| FinalizeError::new(index, InternalFinalizeError::PrevTxOut(e)))?
                    .script_pubkey
                    .clone()
            };
            finalize::finalize_input(&script_pubkey, psbtin)
                .map_err(|error| FinalizeError::new(index, error))?;
        }
        Ok(())
    }

    fn clear_finalized_input(&mut self, index: usize) -> bool {
        let Some(input) = self.inputs.get_mut(index) else { return false };
        if input.final_script_sig.is_none() && input.final_script_witness.is_none() {
            return false;
        }
        *input = psbt::Input {
            non_witness_utxo: input.non_witness_utxo.take(),
            witness_utxo: input.witness_utxo.take(),
            final_script_sig: input.final_script_sig.take(),
            final_script_witness: input.final_script_witness.take(),
            ..Default::default()
        };
        true
    }

    fn update_input(&mut self, index: usize, original: &psbt::Input) -> bool {
        let Some(input) = self.inputs.get_mut(index) else { return false };
        input.non_witness_utxo = original.non_witness_utxo.clone();
        input.witness_utxo = original.witness_utxo.clone();
        input.sighash_type = original.sighash_type;
        input.redeem_script = original.redeem_script.clone();
        input.witness_script = original.witness_script.clone();
        input.bip32_derivation = original.bip32_derivation.clone();
        input.tap_internal_key = original.tap_internal_key;
        input.tap_key_origins = original.tap_key_origins.clone();
        input.tap_merkle_root = original.tap_merkle_root;
        true
    }

    fn update_output(&mut self, index: usize, original: &psbt::Output) -> bool {
        let Some(output) = self.outputs.get_mut(index) else { return false };
        output.redeem_script = original.redeem_script.clone();
        output.witness_script = original.witness_script.clone();
        output.bip32_derivation = original.bip32_derivation.clone();
        output.tap_internal_key = original.tap_internal_key;
        output.tap_tree = original.tap_tree.clone();
        output.tap_key_origins = original.tap_key_origins.clone();
        true
    }

    fn total_fee(&self) -> Result<Amount, FeeError> {
        let spent = self.input_pairs().enumerate().try_fold(
            Amount::ZERO,
            |acc, (index, pair)| -> Result<Amount, FeeError> {
                let txout = pair
                    .previous_txout()
                    .map_err(|error| FeeError::PrevTxOut { index, error })?;
                acc.checked_add(txout.value).ok_or(FeeError::Overflow)
            },
        )?;
        let created = self
            .unsigned_tx
            .output
            .iter()
            .try_fold(Amount::ZERO, |acc, txout| acc.checked_add(txout.value))
            .ok_or(FeeError::Overflow)?;
        spent.checked_sub(created).ok_or(FeeError::OutputsExceedInputs { spent, created })
    }

    fn fee_rate(&self) -> Result<FeeRate, FeeError> {
        let fee = self.total_fee()?;
        let weight = self.clone().extract_tx_unchecked_fee_rate().weight();
        Ok(fee / weight)
    }

    fn extract_final_tx(self) -> Result<Transaction, NotFinalized> {
        if let Some(index) = self.input_pairs().position(|pair| !pair.is_finalized()) {
            return Err(NotFinalized { index });
        }
        Ok(self.extract_tx_unchecked_fee_rate())
    }
}

#[derive(Clone, Debug)]
pub(crate) struct InputPair<'a> {
    pub txin: &'a TxIn,
    pub psbtin: &'a psbt::Input,
}

impl InputPair<'_> {
    /// Returns the [`TxOut`] associated with the input.
    pub fn previous_txout(&self) -> Result<&TxOut, PrevTxOutError> {
        match (&self.psbtin.non_witness_utxo, &self.psbtin.witness_utxo) {
            (None, None) => Err(PrevTxOutError::MissingUtxoInformation),
            (_, Some(txout)) => Ok(txout),
            (Some(tx), None) => output_at(tx, self.txin.previous_output.vout),
        }
    }

    /// True iff a final scriptSig or final witness is present.
    pub fn is_finalized(&self) -> bool {
        self.psbtin.final_script_sig.is_some() || self.psbtin.final_script_witness.is_some()
    }

    /// True iff UTXO information is present in either form.
    pub fn has_utxo_info(&self) -> bool {
        self.psbtin.witness_utxo.is_some() || self.psbtin.non_witness_utxo.is_some()
    }

    /// Validates that [`TxIn`] and the applicable UTXO field(s) of the [`psbt::Input`] refer to the same UTXO.
    pub fn validate_utxo(&self) -> Result<(), InternalPsbtInputError> {
        match (&self.psbtin.non_witness_utxo, &self.psbtin.witness_utxo) {
            (None, None) =>
                Err(InternalPsbtInputError::PrevTxOut(PrevTxOutError::MissingUtxoInformation)),
            (Some(tx), None) if tx.compute_txid() == self.txin.previous_output.txid =>
                output_at(tx, self.txin.previous_output.vout).map(drop).map_err(Into::into),
            (Some(_), None) => Err(InternalPsbtInputError::UnequalTxid),
            (None, Some(_)) => Ok(()),
            (Some(tx), Some(witness_txout))
                if tx.compute_txid() == self.txin.previous_output.txid =>
            {
                let non_witness_txout = output_at(tx, self.txin.previous_output.vout)?;
                if witness_txout == non_witness_txout {
                    Ok(())
                } else {
                    Err(InternalPsbtInputError::SegWitTxOutMismatch)
                }
            }
            (Some(_), Some(_)) => Err(InternalPsbtInputError::UnequalTxid),
        }
    }
}

fn output_at(tx: &Transaction, vout: u32) -> Result<&TxOut, PrevTxOutError> {
    let out_of_bounds = || PrevTxOutError::IndexOutOfBounds { output_count: tx.output.len(), index: vout };
    let index = usize::try_from(vout).map_err(|_| out_of_bounds())?;
    tx.output.get(index).ok_or_else(out_of_bounds)
}

#[derive(Debug, PartialEq, Eq)]
pub enum PrevTxOutError {
    MissingUtxoInformation,
    IndexOutOfBounds { output_count: usize, index: u32 },
}

impl fmt::Display for PrevTxOutError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrevTxOutError::MissingUtxoInformation => write!(f, "missing UTXO information"),
            PrevTxOutError::IndexOutOfBounds { output_count, index } => {
                write!(f, "index {index} out of bounds (number of outputs: {output_count})")
            }
        }
    }
}

impl std::error::Error for PrevTxOutError {}

/// The fee of a transaction could not be computed.
#[derive(Debug, PartialEq, Eq)]
pub enum FeeError {
    PrevTxOut { index: usize, error: PrevTxOutError },
    Overflow,
    OutputsExceedInputs { spent: Amount, created: Amount },
}

impl fmt::Display for FeeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeeError::PrevTxOut { index, error } =>
                write!(f, "value of input #{index} is unknown: {error}"),
            FeeError::Overflow => write!(f, "amounts overflow"),
            FeeError::OutputsExceedInputs { spent, created } =>
                write!(f, "outputs ({created}) are worth more than inputs ({spent})"),
        }
    }
}

impl std::error::Error for FeeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeeError::PrevTxOut { error, .. } => Some(error),
            FeeError::Overflow => None,
            FeeError::OutputsExceedInputs { .. } => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct NotFinalized {
    pub index: usize,
}

impl fmt::Display for NotFinalized {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "input #{} is not finalized", self.index)
    }
}

impl std::error::Error for NotFinalized {}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum InternalPsbtInputError {
    PrevTxOut(PrevTxOutError),
    UnequalTxid,
    /// TxOut provided in `segwit_utxo` doesn't match the one in `non_segwit_utxo`
    SegWitTxOutMismatch,
}

impl fmt::Display for InternalPsbtInputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::PrevTxOut(_) => write!(f, "invalid previous transaction output"),
            Self::UnequalTxid => write!(f, "transaction ID of previous transaction doesn't match one specified in input spending it"),
            Self::SegWitTxOutMismatch => write!(f, "transaction output provided in SegWit UTXO field doesn't match the one in non-SegWit UTXO field"),
        }
    }
}

impl std::error::Error for InternalPsbtInputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PrevTxOut(error) => Some(error),
            Self::UnequalTxid => None,
            Self::SegWitTxOutMismatch => None,
        }
    }
}

impl From<PrevTxOutError> for InternalPsbtInputError {
    fn from(value: PrevTxOutError) -> Self { InternalPsbtInputError::PrevTxOut(value) }
}

#[derive(Debug, PartialEq)]
pub(crate) struct PsbtInputsError {
    index: usize,
    error: InternalPsbtInputError,
}

impl fmt::Display for PsbtInputsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid PSBT input #{}", self.index)
    }
}

impl std::error::Error for PsbtInputsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(&self.error) }
}

#[cfg(test)]
mod test {
    use bitcoin::{Psbt, Transaction};
    use payjoin_test_utils::{BoxError, PARSED_ORIGINAL_PSBT, PARSED_PAYJOIN_PROPOSAL};

    use super::*;

    const RAW_TX: &str = "010000000001015721029046ec1840d5bc8f4e59ae8ac4b576191d5e7994c8d1c44ddeaffc176c0300000000fdffffff018e8d00000000000017a9144a87748bc7bcfee8290e36700eeca3112f53ecbe870140239d1975e0fc9b8345bce9a170a0224cf8eb327bfcaccf0f8b9434d17345579e4dcbb68f7be39eac7987dfaa08293b11fdc76ac28e26bd85e99a46b69675418100000000";

    #[test]
    fn validate_input_utxos() {
        let psbt: Psbt = PARSED_ORIGINAL_PSBT.clone();
        assert!(psbt.validate_input_utxos().is_ok());
    }

    #[test]
    fn input_pairs_validate_non_witness_utxo() -> Result<(), BoxError> {
        let psbt: Psbt = PARSED_ORIGINAL_PSBT.clone();
        let mut txin = psbt.unsigned_tx.input[0].clone();
        let mut psbtin = psbt.inputs[0].clone();

        let transaction: Transaction = bitcoin::consensus::encode::deserialize_hex(RAW_TX)?;
        psbtin.non_witness_utxo = Some(transaction.clone());
        psbtin.witness_utxo = None;
        txin.previous_output.txid = transaction.compute_txid();

        let pair = InputPair { txin: &txin, psbtin: &psbtin };
        assert!(pair.validate_utxo().is_ok());
        assert_eq!(pair.previous_txout()?, &transaction.output[0]);

        txin.previous_output.vout = 7;
        let pair = InputPair { txin: &txin, psbtin: &psbtin };
        assert_eq!(
            pair.validate_utxo(),
            Err(InternalPsbtInputError::PrevTxOut(PrevTxOutError::IndexOutOfBounds {
                output_count: 1,
                index: 7
            }))
        );
        Ok(())
    }

    #[test]
    fn input_pairs_unequal_txid() -> Result<(), BoxError> {
        let psbt: Psbt = PARSED_ORIGINAL_PSBT.clone();
        let txin = &psbt.unsigned_tx.input[0];
        let mut psbtin = psbt.inputs[0].clone();
        psbtin.non_witness_utxo = Some(bitcoin::consensus::encode::deserialize_hex(RAW_TX)?);

        let pair = InputPair { txin, psbtin: &psbtin };
        assert_eq!(pair.validate_utxo().unwrap_err(), InternalPsbtInputError::UnequalTxid);

        psbtin.witness_utxo = None;
        let pair = InputPair { txin, psbtin: &psbtin };
        assert_eq!(pair.validate_utxo().unwrap_err(), InternalPsbtInputError::UnequalTxid);
        Ok(())
    }

    #[test]
    fn input_pairs_txout_mismatch() -> Result<(), BoxError> {
        let psbt: Psbt = PARSED_ORIGINAL_PSBT.clone();
        let mut txin = psbt.unsigned_tx.input[0].clone();
        let mut psbtin = psbt.inputs[0].clone();

        let transaction: Transaction = bitcoin::consensus::encode::deserialize_hex(RAW_TX)?;
        psbtin.non_witness_utxo = Some(transaction.clone());
        txin.previous_output.txid = transaction.compute_txid();

        let pair = InputPair { txin: &txin, psbtin: &psbtin };
        assert_eq!(pair.validate_utxo().unwrap_err(), InternalPsbtInputError::SegWitTxOutMismatch);
        Ok(())
    }

    #[test]
    fn total_fee_of_official_vectors() -> Result<(), BoxError> {
        assert_eq!(PARSED_ORIGINAL_PSBT.total_fee()?, Amount::from_sat(332));

        // The receiver stripped the sender's UTXO from the proposal
        let mut proposal = PARSED_PAYJOIN_PROPOSAL.clone();
        assert!(proposal.total_fee().is_ok());
        proposal.inputs[0].witness_utxo = None;
        assert_eq!(
            proposal.total_fee(),
            Err(FeeError::PrevTxOut { index: 0, error: PrevTxOutError::MissingUtxoInformation })
        );

        let mut inflated = PARSED_ORIGINAL_PSBT.clone();
        inflated.unsigned_tx.output[0].value = Amount::ONE_BTC;
        assert!(matches!(inflated.total_fee(), Err(FeeError::OutputsExceedInputs { .. })));
        Ok(())
    }

    #[test]
    fn clear_finalized_input_keeps_spend_data() {
        let mut psbt: Psbt = PARSED_ORIGINAL_PSBT.clone();
        let expected_utxo = psbt.inputs[0].witness_utxo.clone();
        psbt.inputs[0].redeem_script = Some(bitcoin::ScriptBuf::new());
        assert!(psbt.clear_finalized_input(0));
        assert_eq!(psbt.inputs[0].witness_utxo, expected_utxo);
        assert!(psbt.inputs[0].final_script_sig.is_some());
        assert!(psbt.inputs[0].final_script_witness.is_some());
        assert!(psbt.inputs[0].redeem_script.is_none());
        assert!(!psbt.clear_finalized_input(1));

        psbt.inputs[0].final_script_sig = None;
        psbt.inputs[0].final_script_witness = None;
        assert!(!psbt.clear_finalized_input(0));
    }

    #[test]
    fn extract_final_tx_requires_every_input_finalized() {
        let original: Psbt = PARSED_ORIGINAL_PSBT.clone();
        let tx = original.clone().extract_final_tx().expect("finalized vector");
        assert_eq!(tx.input.len(), 1);
        assert!(!tx.input[0].witness.is_empty());

        let proposal: Psbt = PARSED_PAYJOIN_PROPOSAL.clone();
        assert_eq!(proposal.extract_final_tx(), Err(NotFinalized { index: 0 }));
    }
}
