use std::fmt;

use bitcoin::Weight;
use serde::{Deserialize, Serialize};

/// How the spending conditions of an input are encoded.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ScriptType {
    /// P2PKH, or P2SH wrapping something other than a witness program.
    Legacy,
    /// Native P2WPKH.
    Segwit,
    /// P2WPKH nested in P2SH.
    SegwitP2SH,
    Unsupported,
}

impl ScriptType {
    /// Only the two segwit variants may fund the sender's side of a payjoin.
    pub fn is_supported_sender_type(self) -> bool {
        matches!(self, ScriptType::Segwit | ScriptType::SegwitP2SH)
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptType::Legacy => write!(f, "legacy"),
            ScriptType::Segwit => write!(f, "segwit"),
            ScriptType::SegwitP2SH => write!(f, "segwit-p2sh"),
            ScriptType::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Approximate virtual sizes used to bound what a receiver may charge for its inputs.
///
/// These only feed fee heuristics. They are not exact size accounting.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeEstimation {
    pub legacy_vb: u64,
    pub segwit_vb: u64,
    pub segwit_p2sh_vb: u64,
    pub unknown_vb: u64,
    /// Extra vbytes allowed per proposal input for signature size variance.
    pub tolerance_vb_per_input: u64,
}

impl Default for FeeEstimation {
    fn default() -> Self {
        Self {
            legacy_vb: 148,
            segwit_vb: 68,
            segwit_p2sh_vb: 91,
            unknown_vb: 110,
            tolerance_vb_per_input: 2,
        }
    }
}

impl FeeEstimation {
    pub fn input_vsize(&self, script_type: ScriptType) -> u64 {
        match script_type {
            ScriptType::Legacy => self.legacy_vb,
            ScriptType::Segwit => self.segwit_vb,
            ScriptType::SegwitP2SH => self.segwit_p2sh_vb,
            ScriptType::Unsupported => self.unknown_vb,
        }
    }

    /// Weight the receiver's contributed inputs are expected to add, including the per-input
    /// tolerance over all `proposal_input_count` inputs.
    pub(crate) fn contribution_weight(
        &self,
        new_inputs: impl IntoIterator<Item = ScriptType>,
        proposal_input_count: usize,
    ) -> Weight {
        let inputs_vb = new_inputs
            .into_iter()
            .fold(0u64, |total, ty| total.saturating_add(self.input_vsize(ty)));
        let tolerance_vb = self.tolerance_vb_per_input.saturating_mul(proposal_input_count as u64);
        Weight::from_vb(inputs_vb.saturating_add(tolerance_vb)).unwrap_or(Weight::MAX)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_vsizes() {
        let estimation = FeeEstimation::default();
        assert_eq!(estimation.input_vsize(ScriptType::Legacy), 148);
        assert_eq!(estimation.input_vsize(ScriptType::Segwit), 68);
        assert_eq!(estimation.input_vsize(ScriptType::SegwitP2SH), 91);
        assert_eq!(estimation.input_vsize(ScriptType::Unsupported), 110);
    }

    #[test]
    fn contribution_weight_adds_tolerance_for_every_input() {
        let estimation = FeeEstimation::default();
        let weight = estimation.contribution_weight([ScriptType::Segwit], 2);
        assert_eq!(weight, Weight::from_vb_unchecked(68 + 2 * 2));
        assert_eq!(estimation.contribution_weight([], 0), Weight::ZERO);
    }

    #[test]
    fn oversized_estimation_saturates() {
        let estimation = FeeEstimation {
            segwit_vb: u64::MAX / 2,
            tolerance_vb_per_input: u64::MAX,
            ..Default::default()
        };
        assert_eq!(estimation.contribution_weight([ScriptType::Segwit], 1), Weight::MAX);
        let estimation = FeeEstimation { segwit_vb: u64::MAX / 4 + 1, ..Default::default() };
        assert_eq!(estimation.contribution_weight([ScriptType::Segwit], 0), Weight::MAX);
    }

    #[test]
    fn only_segwit_variants_are_supported_for_the_sender() {
        assert!(ScriptType::Segwit.is_supported_sender_type());
        assert!(ScriptType::SegwitP2SH.is_supported_sender_type());
        assert!(!ScriptType::Legacy.is_supported_sender_type());
        assert!(!ScriptType::Unsupported.is_supported_sender_type());
    }

    #[test]
    fn partial_estimation_config_keeps_defaults() -> Result<(), serde_json::Error> {
        let estimation: FeeEstimation = serde_json::from_str(r#"{"segwit_vb": 70}"#)?;
        assert_eq!(estimation, FeeEstimation { segwit_vb: 70, ..Default::default() });
        Ok(())
    }
}
