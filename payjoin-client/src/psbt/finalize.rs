//! Input finalizer for the script types a payjoin sender may spend from.

use std::fmt;

use bitcoin::psbt::Input;
use bitcoin::script::PushBytesBuf;
use bitcoin::{Script, ScriptBuf, Witness};

use super::PrevTxOutError;

/// An input of the Original PSBT could not be finalized.
#[derive(Debug, PartialEq, Eq)]
pub struct FinalizeError {
    index: usize,
    error: InternalFinalizeError,
}

impl FinalizeError {
    pub(crate) fn new(index: usize, error: InternalFinalizeError) -> Self {
        Self { index, error }
    }

    /// Index of the offending input.
    pub fn index(&self) -> usize { self.index }
}

impl fmt::Display for FinalizeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "can not finalize input #{}: {}", self.index, self.error)
    }
}

impl std::error::Error for FinalizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(&self.error) }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum InternalFinalizeError {
    PrevTxOut(PrevTxOutError),
    MissingSignature,
    MultipleSignatures,
    UncompressedKey,
    KeyMismatch,
    MissingRedeemScript,
    RedeemScriptMismatch,
    UnsupportedScript,
}

impl fmt::Display for InternalFinalizeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use InternalFinalizeError::*;

        match self {
            PrevTxOut(e) => write!(f, "{e}"),
            MissingSignature => write!(f, "no partial signature"),
            MultipleSignatures => write!(f, "more than one partial signature for a single key spend"),
            UncompressedKey => write!(f, "segwit spends require a compressed public key"),
            KeyMismatch => write!(f, "signing key does not match the spent script"),
            MissingRedeemScript => write!(f, "p2sh input missing a redeem script"),
            RedeemScriptMismatch => write!(f, "redeem script does not hash to the spent script"),
            UnsupportedScript => write!(f, "only p2wpkh and p2sh-p2wpkh spends can be finalized"),
        }
    }
}

impl std::error::Error for InternalFinalizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InternalFinalizeError::PrevTxOut(e) => Some(e),
            _ => None,
        }
    }
}

/// Turn the single partial signature of a p2wpkh or p2sh-p2wpkh input into its final
/// scriptSig and witness, then clear the fields a finalized input must not carry.
pub(crate) fn finalize_input(
    script_pubkey: &Script,
    input: &mut Input,
) -> Result<(), InternalFinalizeError> {
    let mut sigs = input.partial_sigs.iter();
    let (pubkey, sig) = sigs.next().ok_or(InternalFinalizeError::MissingSignature)?;
    if sigs.next().is_some() {
        return Err(InternalFinalizeError::MultipleSignatures);
    }
    let wpkh = pubkey.wpubkey_hash().map_err(|_| InternalFinalizeError::UncompressedKey)?;
    let key_program = ScriptBuf::new_p2wpkh(&wpkh);

    let final_script_sig = if script_pubkey.is_p2wpkh() {
        if *script_pubkey != *key_program {
            return Err(InternalFinalizeError::KeyMismatch);
        }
        None
    } else if script_pubkey.is_p2sh() {
        let redeem_script =
            input.redeem_script.as_ref().ok_or(InternalFinalizeError::MissingRedeemScript)?;
        if ScriptBuf::new_p2sh(&redeem_script.script_hash()).as_script() != script_pubkey {
            return Err(InternalFinalizeError::RedeemScriptMismatch);
        }
        if !redeem_script.is_p2wpkh() {
            return Err(InternalFinalizeError::UnsupportedScript);
        }
        if *redeem_script != key_program {
            return Err(InternalFinalizeError::KeyMismatch);
        }
        let push = PushBytesBuf::try_from(redeem_script.to_bytes())
            .map_err(|_| InternalFinalizeError::UnsupportedScript)?;
        Some(ScriptBuf::builder().push_slice(push).into_script())
    } else {
        return Err(InternalFinalizeError::UnsupportedScript);
    };

    let witness = Witness::from_slice(&[sig.to_vec(), pubkey.to_bytes()]);
    input.final_script_sig = final_script_sig;
    input.final_script_witness = Some(witness);

    // BIP 174: a finalizer drops everything the final scripts replace.
    input.partial_sigs.clear();
    input.sighash_type = None;
    input.redeem_script = None;
    input.witness_script = None;
    input.bip32_derivation.clear();
    Ok(())
}
