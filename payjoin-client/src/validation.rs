//! Stateless checks over PSBTs, their inputs and their outputs.
//!
//! Nothing here performs IO or knows about the negotiation state. [`crate::send`] composes these
//! into the proposal checks.

use std::fmt;

use bitcoin::psbt::{self, Psbt};
use bitcoin::{Amount, FeeRate, ScriptBuf, TxIn};

use crate::psbt::{InputPair, InternalPsbtInputError, PsbtExt};
pub use crate::psbt::{FeeError, PrevTxOutError};
use crate::script_type::{FeeEstimation, ScriptType};

/// Classify the input spending `txin` from the previous output described in `input`.
///
/// Nested segwit is recognized from the redeem script field or, once finalized, from the last
/// push of the final scriptSig.
pub fn classify_input_type(txin: &TxIn, input: &psbt::Input) -> Result<ScriptType, PrevTxOutError> {
    let pair = InputPair { txin, psbtin: input };
    let script_pubkey = &pair.previous_txout()?.script_pubkey;

    let script_type = if script_pubkey.is_p2wpkh() {
        ScriptType::Segwit
    } else if script_pubkey.is_p2pkh() {
        ScriptType::Legacy
    } else if script_pubkey.is_p2sh() {
        let redeem_script = input
            .redeem_script
            .as_deref()
            .or_else(|| input.final_script_sig.as_ref().and_then(|sig| sig.redeem_script()));
        match redeem_script {
            Some(script) if script.is_p2wpkh() => ScriptType::SegwitP2SH,
            Some(script) if script.is_witness_program() => ScriptType::Unsupported,
            Some(_) => ScriptType::Legacy,
            None => ScriptType::Unsupported,
        }
    } else {
        ScriptType::Unsupported
    };
    Ok(script_type)
}

/// Classify every input of `psbt`, requiring them all to share one type.
pub fn classify_inputs(psbt: &Psbt) -> Result<ScriptType, ClassifyError> {
    let mut classified: Option<ScriptType> = None;
    for (index, pair) in psbt.input_pairs().enumerate() {
        let script_type = classify_input_type(pair.txin, pair.psbtin)
            .map_err(|error| ClassifyError::PrevTxOut { index, error })?;
        match classified {
            None => classified = Some(script_type),
            Some(first) if first != script_type =>
                return Err(ClassifyError::Mixed { index, first, found: script_type }),
            Some(_) => (),
        }
    }
    classified.ok_or(ClassifyError::NoInputs)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClassifyError {
    NoInputs,
    PrevTxOut { index: usize, error: PrevTxOutError },
    Mixed { index: usize, first: ScriptType, found: ScriptType },
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ClassifyError::*;

        match self {
            NoInputs => write!(f, "transaction has no inputs"),
            PrevTxOut { index, error } => write!(f, "can not classify input #{index}: {error}"),
            Mixed { index, first, found } =>
                write!(f, "input #{index} is {found} while the first input is {first}"),
        }
    }
}

impl std::error::Error for ClassifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClassifyError::PrevTxOut { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Anything that can reveal key derivation information about its owner.
pub trait KeypathMetadata {
    fn has_keypath_metadata(&self) -> bool;
}

impl KeypathMetadata for psbt::Input {
    fn has_keypath_metadata(&self) -> bool {
        !self.bip32_derivation.is_empty() || !self.tap_key_origins.is_empty()
    }
}

impl KeypathMetadata for psbt::Output {
    fn has_keypath_metadata(&self) -> bool {
        !self.bip32_derivation.is_empty() || !self.tap_key_origins.is_empty()
    }
}

/// Only the global extended public keys are considered here, not the per-item paths.
impl KeypathMetadata for Psbt {
    fn has_keypath_metadata(&self) -> bool { !self.xpub.is_empty() }
}

pub fn has_keypath_metadata<T: KeypathMetadata + ?Sized>(item: &T) -> bool {
    item.has_keypath_metadata()
}

/// True iff a final scriptSig or final witness is present.
pub fn is_finalized(input: &psbt::Input) -> bool {
    input.final_script_sig.is_some() || input.final_script_witness.is_some()
}

/// A malformed combination of input metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityViolation {
    FinalizedWithPartialSigs,
    FinalizedWithDerivation,
    FinalizedWithSighashType,
    FinalizedWithRedeemScript,
    FinalizedWithWitnessScript,
    BothUtxoForms,
    WitnessScriptWithoutWitnessUtxo,
    PrevTxidMismatch,
    PrevOutIndexOutOfBounds,
    UtxoFormsDisagree,
    RedeemScriptMismatch,
    WitnessScriptMismatch,
}

impl fmt::Display for SanityViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SanityViolation::*;

        match self {
            FinalizedWithPartialSigs => write!(f, "finalized input carries partial signatures"),
            FinalizedWithDerivation => write!(f, "finalized input carries key derivation paths"),
            FinalizedWithSighashType => write!(f, "finalized input carries a sighash type"),
            FinalizedWithRedeemScript => write!(f, "finalized input carries a redeem script"),
            FinalizedWithWitnessScript => write!(f, "finalized input carries a witness script"),
            BothUtxoForms => write!(f, "input carries both witness and non-witness UTXO"),
            WitnessScriptWithoutWitnessUtxo =>
                write!(f, "witness script present without a witness UTXO"),
            PrevTxidMismatch =>
                write!(f, "non-witness UTXO is not the transaction the input spends from"),
            PrevOutIndexOutOfBounds =>
                write!(f, "spent output index is out of bounds of the non-witness UTXO"),
            UtxoFormsDisagree => write!(f, "witness UTXO and non-witness UTXO disagree"),
            RedeemScriptMismatch => write!(f, "redeem script does not hash to the spent script"),
            WitnessScriptMismatch =>
                write!(f, "witness script does not match the committed witness program"),
        }
    }
}

impl std::error::Error for SanityViolation {}

/// Every structural problem of the input spending `txin`. An empty list means the input is sane.
pub fn structural_sanity(txin: &TxIn, input: &psbt::Input) -> Vec<SanityViolation> {
    use SanityViolation::*;

    let mut violations = Vec::new();
    if is_finalized(input) {
        if !input.partial_sigs.is_empty() {
            violations.push(FinalizedWithPartialSigs);
        }
        if !input.bip32_derivation.is_empty() {
            violations.push(FinalizedWithDerivation);
        }
        if input.sighash_type.is_some() {
            violations.push(FinalizedWithSighashType);
        }
        if input.redeem_script.is_some() {
            violations.push(FinalizedWithRedeemScript);
        }
        if input.witness_script.is_some() {
            violations.push(FinalizedWithWitnessScript);
        }
    }

    if input.non_witness_utxo.is_some() && input.witness_utxo.is_some() {
        violations.push(BothUtxoForms);
    }
    if input.witness_script.is_some() && input.witness_utxo.is_none() {
        violations.push(WitnessScriptWithoutWitnessUtxo);
    }

    let pair = InputPair { txin, psbtin: input };
    if input.non_witness_utxo.is_some() {
        match pair.validate_utxo() {
            Ok(()) => (),
            Err(InternalPsbtInputError::UnequalTxid) => violations.push(PrevTxidMismatch),
            Err(InternalPsbtInputError::PrevTxOut(_)) => violations.push(PrevOutIndexOutOfBounds),
            Err(InternalPsbtInputError::SegWitTxOutMismatch) => violations.push(UtxoFormsDisagree),
        }
    }

    let spent_script = pair.previous_txout().ok().map(|txout| &txout.script_pubkey);
    if let (Some(redeem_script), Some(spent_script)) = (&input.redeem_script, spent_script) {
        if ScriptBuf::new_p2sh(&redeem_script.script_hash()) != *spent_script {
            violations.push(RedeemScriptMismatch);
        }
    }
    if let Some(witness_script) = &input.witness_script {
        let program = ScriptBuf::new_p2wsh(&witness_script.wscript_hash());
        let committed = match (&input.redeem_script, spent_script) {
            (Some(redeem_script), _) if redeem_script.is_p2wsh() => Some(redeem_script),
            (None, Some(spent_script)) if spent_script.is_p2wsh() => Some(spent_script),
            _ => None,
        };
        if committed.is_some_and(|committed| *committed != program) {
            violations.push(WitnessScriptMismatch);
        }
    }
    violations
}

/// Total fee of `psbt`: spent values minus created values.
pub fn fee_of(psbt: &Psbt) -> Result<Amount, FeeError> { psbt.total_fee() }

/// Fee rate of `psbt` over the weight it has with its current final scripts.
pub fn fee_rate_of(psbt: &Psbt) -> Result<FeeRate, FeeError> { psbt.fee_rate() }

/// Default approximate virtual size of an input of `script_type`, in vbytes.
pub fn estimated_input_vsize(script_type: ScriptType) -> u64 {
    FeeEstimation::default().input_vsize(script_type)
}
