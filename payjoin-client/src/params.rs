//! Optional negotiation parameters and their encoding into the endpoint URL.

use bitcoin::{Amount, FeeRate};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::output_substitution::OutputSubstitution;

/// Sender-supplied knobs for one negotiation. Every field defaults to unset, meaning
/// "no constraint".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationParameters {
    /// Forbid the receiver from changing the payment output. Unset allows it.
    pub disable_output_substitution: Option<bool>,
    /// Payjoin protocol version to request. Unset leaves it to the receiver.
    pub protocol_version: Option<u64>,
    /// Fee rate the proposal must not fall below, serialized in sat/vB. Unset disables the
    /// floor.
    #[serde(with = "fee_rate_sat_per_vb")]
    pub min_fee_rate: Option<FeeRate>,
    /// Upper bound on what the receiver may take from the additional fee output, in sats.
    /// Unset means the receiver may not shrink any sender output.
    #[serde(with = "amount_sat")]
    pub max_additional_fee_contribution: Option<Amount>,
    /// Which original output the receiver may shrink to fund its inputs. Unset means none.
    pub additional_fee_output_index: Option<usize>,
}

impl NegotiationParameters {
    pub fn output_substitution(&self) -> OutputSubstitution {
        OutputSubstitution::from_disabled_flag(self.disable_output_substitution)
    }

    /// True when no parameter is set.
    pub fn is_empty(&self) -> bool { *self == Self::default() }
}

/// Append the set parameters to `endpoint` as BIP78 query parameters.
///
/// Parameters are written in a fixed order regardless of how they were set:
/// `disableoutputsubstitution`, `v`, `minfeerate`, `maxadditionalfeecontribution`,
/// `additionalfeeoutputindex`. Unset parameters are omitted. Query pairs already present on
/// `endpoint` are kept. With nothing set the URL is returned untouched.
pub fn encode(endpoint: Url, params: &NegotiationParameters) -> Url {
    let mut pairs: Vec<(&'static str, String)> = Vec::with_capacity(5);
    if let Some(disabled) = params.disable_output_substitution {
        pairs.push(("disableoutputsubstitution", disabled.to_string()));
    }
    if let Some(version) = params.protocol_version {
        pairs.push(("v", version.to_string()));
    }
    if let Some(min_fee_rate) = params.min_fee_rate {
        // TODO serialize in rust-bitcoin <https://github.com/rust-bitcoin/rust-bitcoin/pull/1787/files#diff-c2ea40075e93ccd068673873166cfa3312ec7439d6bc5a4cbc03e972c7e045c4>
        let float_fee_rate = min_fee_rate.to_sat_per_kwu() as f32 / 250.0_f32;
        pairs.push(("minfeerate", float_fee_rate.to_string()));
    }
    if let Some(max_amount) = params.max_additional_fee_contribution {
        pairs.push(("maxadditionalfeecontribution", max_amount.to_sat().to_string()));
    }
    if let Some(vout) = params.additional_fee_output_index {
        pairs.push(("additionalfeeoutputindex", vout.to_string()));
    }

    // `query_pairs_mut` leaves a trailing `?` behind even when nothing is appended
    if pairs.is_empty() {
        return endpoint;
    }
    let mut url = endpoint;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in &pairs {
            query.append_pair(key, value);
        }
    }
    url
}

/// Fee rates are configured in sat/vB, fractions included, and kept in sat/kwu.
mod fee_rate_sat_per_vb {
    use bitcoin::FeeRate;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(rate: &Option<FeeRate>, s: S) -> Result<S::Ok, S::Error> {
        rate.map(|rate| rate.to_sat_per_kwu() as f64 / 250.0).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<FeeRate>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            None => Ok(None),
            Some(sat_per_vb) => from_sat_per_vb(sat_per_vb).map(Some).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid fee rate {sat_per_vb} sat/vB"))
            }),
        }
    }

    pub(super) fn from_sat_per_vb(sat_per_vb: f64) -> Option<FeeRate> {
        let sat_per_kwu = (sat_per_vb * 250.0).ceil();
        if !sat_per_kwu.is_finite() || sat_per_kwu < 0.0 || sat_per_kwu > u64::MAX as f64 {
            return None;
        }
        Some(FeeRate::from_sat_per_kwu(sat_per_kwu as u64))
    }
}

mod amount_sat {
    use bitcoin::Amount;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(amount: &Option<Amount>, s: S) -> Result<S::Ok, S::Error> {
        amount.map(Amount::to_sat).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Amount>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Amount::from_sat))
    }
}

#[cfg(test)]
mod test {
    use payjoin_test_utils::BoxError;

    use super::*;

    fn all_set() -> NegotiationParameters {
        NegotiationParameters {
            disable_output_substitution: Some(true),
            protocol_version: Some(1),
            min_fee_rate: FeeRate::from_sat_per_vb(2),
            max_additional_fee_contribution: Some(Amount::from_sat(182)),
            additional_fee_output_index: Some(0),
        }
    }

    #[test]
    fn empty_parameters_leave_url_untouched() -> Result<(), BoxError> {
        let base = Url::parse("https://example.com/pj?existing=1")?;
        assert_eq!(encode(base.clone(), &NegotiationParameters::default()), base);
        let bare = Url::parse("http://localhost")?;
        assert_eq!(encode(bare.clone(), &NegotiationParameters::default()).as_str(), bare.as_str());
        Ok(())
    }

    #[test]
    fn all_parameters_in_fixed_order() -> Result<(), BoxError> {
        let url = encode(Url::parse("http://localhost")?, &all_set());
        assert_eq!(
            url.as_str(),
            "http://localhost/?disableoutputsubstitution=true&v=1&minfeerate=2\
             &maxadditionalfeecontribution=182&additionalfeeoutputindex=0"
        );
        Ok(())
    }

    #[test]
    fn order_does_not_depend_on_how_parameters_were_set() -> Result<(), BoxError> {
        let mut params = NegotiationParameters::default();
        params.additional_fee_output_index = Some(0);
        params.max_additional_fee_contribution = Some(Amount::from_sat(182));
        params.min_fee_rate = FeeRate::from_sat_per_vb(2);
        params.protocol_version = Some(1);
        params.disable_output_substitution = Some(true);
        let base = Url::parse("http://localhost")?;
        assert_eq!(encode(base.clone(), &params), encode(base, &all_set()));
        Ok(())
    }

    #[test]
    fn unset_parameters_are_omitted() -> Result<(), BoxError> {
        let params = NegotiationParameters {
            min_fee_rate: FeeRate::from_sat_per_vb(10),
            ..Default::default()
        };
        let url = encode(Url::parse("http://localhost")?, &params);
        assert_eq!(url, Url::parse("http://localhost?minfeerate=10")?);

        let params = NegotiationParameters {
            disable_output_substitution: Some(false),
            ..Default::default()
        };
        let url = encode(Url::parse("http://localhost")?, &params);
        assert_eq!(url, Url::parse("http://localhost?disableoutputsubstitution=false")?);
        Ok(())
    }

    #[test]
    fn existing_query_pairs_are_kept() -> Result<(), BoxError> {
        let params = NegotiationParameters { protocol_version: Some(1), ..Default::default() };
        let url = encode(Url::parse("https://example.com/pj?session=abc")?, &params);
        assert_eq!(url, Url::parse("https://example.com/pj?session=abc&v=1")?);
        Ok(())
    }

    #[test]
    fn deserialize_with_defaults() -> Result<(), BoxError> {
        let params: NegotiationParameters =
            serde_json::from_str(r#"{"min_fee_rate": 5, "additional_fee_output_index": 1}"#)?;
        assert_eq!(params.min_fee_rate, FeeRate::from_sat_per_vb(5));
        assert_eq!(params.additional_fee_output_index, Some(1));
        assert_eq!(params.disable_output_substitution, None);
        assert_eq!(params.output_substitution(), OutputSubstitution::Enabled);
        assert!(!params.is_empty());
        assert!(NegotiationParameters::default().is_empty());
        Ok(())
    }

    #[test]
    fn fractional_min_fee_rate() -> Result<(), BoxError> {
        let params: NegotiationParameters = serde_json::from_str(r#"{"min_fee_rate": 1.5}"#)?;
        assert_eq!(params.min_fee_rate, Some(FeeRate::from_sat_per_kwu(375)));
        assert_eq!(serde_json::to_value(&params)?["min_fee_rate"], serde_json::json!(1.5));

        let url = encode(Url::parse("https://example.com/pj")?, &params);
        assert_eq!(url.as_str(), "https://example.com/pj?minfeerate=1.5");
        Ok(())
    }

    #[test]
    fn invalid_min_fee_rate() {
        for rate in ["-1", "1e30"] {
            let json = format!(r#"{{"min_fee_rate": {rate}}}"#);
            assert!(serde_json::from_str::<NegotiationParameters>(&json).is_err(), "{rate}");
        }
    }
}
