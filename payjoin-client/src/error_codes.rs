//! Well-known error codes a payjoin endpoint may answer with
//! See: <https://github.com/bitcoin/bips/blob/master/bip-0078.mediawiki#receivers-well-known-errors>

/// Message shown for any code missing from the table, including the empty code.
pub(crate) const GENERIC_MESSAGE: &str =
    "Something went wrong when requesting the payjoin endpoint.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// The original request included key paths or global xpubs.
    LeakingData,
    /// The original PSBT was not finalized.
    PsbtNotFinalized,
    /// The payjoin endpoint is not available for now.
    Unavailable,
    /// The receiver has no UTXO to contribute.
    OutOfUtxos,
    /// The receiver added some inputs but could not bump the fee of the payjoin proposal.
    NotEnoughMoney,
    /// A consistency check on the PSBT failed.
    InsanePsbt,
    /// This version of payjoin is not supported.
    VersionUnsupported,
    /// Witness UTXO or non-witness UTXO information is missing.
    NeedUtxoInformation,
    /// The original transaction is invalid for payjoin.
    InvalidTransaction,
    /// The receiver rejected the original PSBT.
    OriginalPsbtRejected,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LeakingData => "leaking-data",
            Self::PsbtNotFinalized => "psbt-not-finalized",
            Self::Unavailable => "unavailable",
            Self::OutOfUtxos => "out-of-utxos",
            Self::NotEnoughMoney => "not-enough-money",
            Self::InsanePsbt => "insane-psbt",
            Self::VersionUnsupported => "version-unsupported",
            Self::NeedUtxoInformation => "need-utxo-information",
            Self::InvalidTransaction => "invalid-transaction",
            Self::OriginalPsbtRejected => "original-psbt-rejected",
        }
    }

    /// The sender-safe message for this code.
    ///
    /// Endpoint supplied prose is never displayed, only these fixed strings.
    pub const fn message(&self) -> &'static str {
        match self {
            Self::LeakingData =>
                "Key path information or GlobalXPubs should not be included in the original PSBT.",
            Self::PsbtNotFinalized => "The original PSBT must be finalized.",
            Self::Unavailable => "The payjoin endpoint is not available for now.",
            Self::OutOfUtxos =>
                "The receiver does not have any UTXO to contribute in a payjoin proposal.",
            Self::NotEnoughMoney =>
                "The receiver added some inputs but could not bump the fee of the payjoin proposal.",
            Self::InsanePsbt => "Some consistency check on the PSBT failed.",
            Self::VersionUnsupported => "This version of payjoin is not supported.",
            Self::NeedUtxoInformation => "The witness UTXO or non witness UTXO is missing.",
            Self::InvalidTransaction => "The original transaction is invalid for payjoin.",
            Self::OriginalPsbtRejected => "The receiver rejected the original PSBT.",
        }
    }
}

impl core::str::FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leaking-data" => Ok(Self::LeakingData),
            "psbt-not-finalized" => Ok(Self::PsbtNotFinalized),
            "unavailable" => Ok(Self::Unavailable),
            "out-of-utxos" => Ok(Self::OutOfUtxos),
            "not-enough-money" => Ok(Self::NotEnoughMoney),
            "insane-psbt" => Ok(Self::InsanePsbt),
            "version-unsupported" => Ok(Self::VersionUnsupported),
            "need-utxo-information" => Ok(Self::NeedUtxoInformation),
            "invalid-transaction" => Ok(Self::InvalidTransaction),
            "original-psbt-rejected" => Ok(Self::OriginalPsbtRejected),
            _ => Err(()),
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn codes_round_trip_through_their_wire_form() {
        let codes = [
            ErrorCode::LeakingData,
            ErrorCode::PsbtNotFinalized,
            ErrorCode::Unavailable,
            ErrorCode::OutOfUtxos,
            ErrorCode::NotEnoughMoney,
            ErrorCode::InsanePsbt,
            ErrorCode::VersionUnsupported,
            ErrorCode::NeedUtxoInformation,
            ErrorCode::InvalidTransaction,
            ErrorCode::OriginalPsbtRejected,
        ];
        for code in codes {
            assert_eq!(ErrorCode::from_str(code.as_str()), Ok(code));
            assert_eq!(serde_json::to_string(&code).unwrap(), format!("\"{code}\""));
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(ErrorCode::from_str("").is_err());
        assert!(ErrorCode::from_str("Unavailable").is_err());
        assert!(ErrorCode::from_str("<script>alert(1)</script>").is_err());
    }
}
