use std::fmt;

use bitcoin::locktime::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::Sequence;

use crate::psbt::{FeeError, InconsistentPsbt, PrevTxOutError, PsbtInputsError};
use crate::script_type::ScriptType;
use crate::validation::{ClassifyError, SanityViolation};

/// The Original PSBT can not be used to start a negotiation.
///
/// This error is unrecoverable.
#[derive(Debug, PartialEq)]
pub struct BuildSenderError(pub(crate) InternalBuildSenderError);

#[derive(Debug, PartialEq)]
pub(crate) enum InternalBuildSenderError {
    InconsistentOriginalPsbt(InconsistentPsbt),
    InvalidOriginalInput(PsbtInputsError),
    InputType(ClassifyError),
    UnsupportedInputType(ScriptType),
    MultiplePayeeOutputs,
    MissingPayeeOutput,
    FeeOutputIndexMissing,
    FeeOutputIndexOutOfBounds { index: usize, output_count: usize },
    FeeOutputIndexPointsAtPayee,
    FeeOutputValueLowerThanFeeContribution,
}

impl From<InternalBuildSenderError> for BuildSenderError {
    fn from(value: InternalBuildSenderError) -> Self { BuildSenderError(value) }
}

impl fmt::Display for BuildSenderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use InternalBuildSenderError::*;

        match &self.0 {
            InconsistentOriginalPsbt(e) => write!(f, "the original transaction is inconsistent: {e}"),
            InvalidOriginalInput(e) => write!(f, "an input in the original transaction is invalid: {e}"),
            InputType(e) => write!(f, "can not determine the input type of the original transaction: {e}"),
            UnsupportedInputType(ty) => write!(f, "inputs of type {ty} can not fund a payjoin, only segwit and segwit-p2sh are supported"),
            MultiplePayeeOutputs => write!(f, "the original transaction has more than one output belonging to the payee"),
            MissingPayeeOutput => write!(f, "the output belonging to payee is missing from the original transaction"),
            FeeOutputIndexMissing => write!(f, "a maximum fee contribution was set without an output to take it from"),
            FeeOutputIndexOutOfBounds { index, output_count } => write!(f, "fee output index {index} is out of bounds of {output_count} outputs"),
            FeeOutputIndexPointsAtPayee => write!(f, "fee output index points at the output belonging to the payee"),
            FeeOutputValueLowerThanFeeContribution => write!(f, "the value of fee output is lower than maximum allowed contribution"),
        }
    }
}

impl std::error::Error for BuildSenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use InternalBuildSenderError::*;

        match &self.0 {
            InconsistentOriginalPsbt(error) => Some(error),
            InvalidOriginalInput(error) => Some(error),
            InputType(error) => Some(error),
            UnsupportedInputType(_) => None,
            MultiplePayeeOutputs => None,
            MissingPayeeOutput => None,
            FeeOutputIndexMissing => None,
            FeeOutputIndexOutOfBounds { .. } => None,
            FeeOutputIndexPointsAtPayee => None,
            FeeOutputValueLowerThanFeeContribution => None,
        }
    }
}

/// Coarse classification of a rejected proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// The proposal reveals or claims key derivation information.
    PrivacyLeak,
    /// Input metadata is combined in a way no well-formed PSBT has.
    StructuralSanity,
    /// The proposal breaks the rules tying it to the original transaction.
    ProtocolInvariant,
    /// The proposal would cost the sender more than allowed.
    Economic,
}

/// The Payjoin Proposal returned by the receiver was rejected.
///
/// This is currently opaque type because we aren't sure which variants will stay.
/// You can only display it or ask for its [`ValidationErrorKind`].
#[derive(Debug)]
pub struct ValidationError(pub(crate) InternalProposalError);

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind { self.0.kind() }
}

impl From<InternalProposalError> for ValidationError {
    fn from(value: InternalProposalError) -> Self { ValidationError(value) }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "proposal PSBT error: {}", self.0)
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(&self.0) }
}

#[derive(Debug, PartialEq)]
pub(crate) enum InternalProposalError {
    InconsistentProposal(InconsistentPsbt),
    InsaneInput { index: usize, violations: Vec<SanityViolation> },
    ProposalContainsXpub,
    TxInContainsKeyPaths,
    TxOutContainsKeyPaths,
    InputCountNotIncreased { proposed: usize, original: usize },
    DuplicateSenderInput,
    MissingSenderInput,
    SenderTxinSequenceChanged { proposed: Sequence, original: Sequence },
    SenderTxinContainsFinalScriptSig,
    SenderTxinContainsFinalScriptWitness,
    SenderTxinUtxoChanged,
    ContainsPartialSigs,
    ReceiverTxinNotFinalized,
    ReceiverTxinMissingUtxoInfo,
    ReceiverTxinPrevTxOut(PrevTxOutError),
    MixedInputTypes { proposed: ScriptType, original: ScriptType },
    MixedSequence,
    VersionsDontMatch { proposed: Version, original: Version },
    LockTimesDontMatch { proposed: LockTime, original: LockTime },
    OriginalFee(FeeError),
    ProposalFee(FeeError),
    AbsoluteFeeDecreased,
    FeeContributionExceedsMaximum,
    PayeeTookContributedFee,
    FeeContributionExceedsInputCost,
    OutputValueDecreased,
    MissingOrShuffledOutputs,
    FeeRateBelowMinimum,
}

impl InternalProposalError {
    fn kind(&self) -> ValidationErrorKind {
        use InternalProposalError::*;
        use ValidationErrorKind::*;

        match self {
            InconsistentProposal(_) | InsaneInput { .. } => StructuralSanity,
            ProposalContainsXpub | TxInContainsKeyPaths | TxOutContainsKeyPaths => PrivacyLeak,
            InputCountNotIncreased { .. }
            | DuplicateSenderInput
            | MissingSenderInput
            | SenderTxinSequenceChanged { .. }
            | SenderTxinContainsFinalScriptSig
            | SenderTxinContainsFinalScriptWitness
            | SenderTxinUtxoChanged
            | ContainsPartialSigs
            | ReceiverTxinNotFinalized
            | ReceiverTxinMissingUtxoInfo
            | ReceiverTxinPrevTxOut(_)
            | MixedInputTypes { .. }
            | MixedSequence
            | VersionsDontMatch { .. }
            | LockTimesDontMatch { .. }
            | MissingOrShuffledOutputs => ProtocolInvariant,
            OriginalFee(_)
            | ProposalFee(_)
            | AbsoluteFeeDecreased
            | FeeContributionExceedsMaximum
            | PayeeTookContributedFee
            | FeeContributionExceedsInputCost
            | OutputValueDecreased
            | FeeRateBelowMinimum => Economic,
        }
    }
}

impl fmt::Display for InternalProposalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use InternalProposalError::*;

        match &self {
            InconsistentProposal(e) => write!(f, "proposed PSBT is inconsistent: {e}"),
            InsaneInput { index, violations } => {
                write!(f, "input #{index} of proposed transaction is malformed:")?;
                for violation in violations {
                    write!(f, " {violation};")?;
                }
                Ok(())
            }
            ProposalContainsXpub => write!(f, "proposed PSBT contains global extended public keys"),
            TxInContainsKeyPaths => write!(f, "proposed transaction inputs contain key paths"),
            TxOutContainsKeyPaths => write!(f, "proposed transaction outputs contain key paths"),
            InputCountNotIncreased { proposed, original } => write!(f, "proposed transaction has {proposed} inputs, the receiver must add to the original {original}"),
            DuplicateSenderInput => write!(f, "an input of the sender appears more than once in proposed transaction"),
            MissingSenderInput => write!(f, "proposed transaction is missing inputs of the sender"),
            SenderTxinSequenceChanged { proposed, original } => write!(f, "proposed transaction sequence number {proposed} doesn't match the original {original}"),
            SenderTxinContainsFinalScriptSig => write!(f, "an input in proposed transaction belonging to the sender contains finalized non-witness signature"),
            SenderTxinContainsFinalScriptWitness => write!(f, "an input in proposed transaction belonging to the sender contains finalized witness signature"),
            SenderTxinUtxoChanged => write!(f, "an input in proposed transaction belonging to the sender carries UTXO information the sender never sent"),
            ContainsPartialSigs => write!(f, "an input in proposed transaction belonging to the sender contains partial signatures"),
            ReceiverTxinNotFinalized => write!(f, "an input in proposed transaction belonging to the receiver is not finalized"),
            ReceiverTxinMissingUtxoInfo => write!(f, "an input in proposed transaction belonging to the receiver is missing UTXO information"),
            ReceiverTxinPrevTxOut(e) => write!(f, "can not determine the type of an input belonging to the receiver: {e}"),
            MixedInputTypes { proposed, original } => write!(f, "proposed transaction contains input of type {proposed} while original contains inputs of type {original}"),
            MixedSequence => write!(f, "inputs of proposed transaction contain mixed sequence numbers"),
            VersionsDontMatch { proposed, original } => write!(f, "proposed transaction version {proposed} doesn't match the original {original}"),
            LockTimesDontMatch { proposed, original } => write!(f, "proposed transaction lock time {proposed} doesn't match the original {original}"),
            OriginalFee(e) => write!(f, "can not compute the fee of original transaction: {e}"),
            ProposalFee(e) => write!(f, "can not compute the fee of proposed transaction: {e}"),
            AbsoluteFeeDecreased => write!(f, "absolute fee of proposed transaction is lower than original"),
            FeeContributionExceedsMaximum => write!(f, "fee contribution exceeds allowed maximum"),
            PayeeTookContributedFee => write!(f, "payee tried to take fee contribution for themselves"),
            FeeContributionExceedsInputCost => write!(f, "fee contribution pays for more than the added inputs cost"),
            OutputValueDecreased => write!(f, "the amount in our non-fee output was decreased"),
            MissingOrShuffledOutputs => write!(f, "proposed transaction is missing outputs of the sender"),
            FeeRateBelowMinimum => write!(f, "the fee rate of proposed transaction is below minimum"),
        }
    }
}

impl std::error::Error for InternalProposalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use InternalProposalError::*;

        match self {
            InconsistentProposal(error) => Some(error),
            ReceiverTxinPrevTxOut(error) => Some(error),
            OriginalFee(error) => Some(error),
            ProposalFee(error) => Some(error),
            _ => None,
        }
    }
}
