use std::path::Path;
use std::time::Duration;

use config::{ConfigError, Environment, File, Source};
use serde::Deserialize;
use url::Url;

use crate::params::NegotiationParameters;
use crate::script_type::FeeEstimation;

const DEFAULT_FALLBACK_DELAY_SECS: i64 = 120;
const DEFAULT_REQUEST_TIMEOUT_SECS: i64 = 30;

/// Settings for a [`crate::Client`] talking to an HTTP endpoint.
///
/// Durations are given in whole seconds under the `fallback_delay_secs` and
/// `request_timeout_secs` keys.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    pub endpoint: Url,
    #[serde(default)]
    pub params: NegotiationParameters,
    /// How long to wait before re-broadcasting the original transaction after a successful
    /// payjoin.
    #[serde(rename = "fallback_delay_secs", deserialize_with = "deserialize_duration_secs")]
    pub fallback_delay: Duration,
    #[serde(rename = "request_timeout_secs", deserialize_with = "deserialize_duration_secs")]
    pub request_timeout: Duration,
    #[serde(default)]
    pub fee_estimation: FeeEstimation,
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

impl ClientConfig {
    /// Layer defaults, the optional file at `path` and `PAYJOIN_` environment variables.
    ///
    /// Nested keys are separated by a double underscore in the environment, e.g.
    /// `PAYJOIN_PARAMS__MIN_FEE_RATE=1.5`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(File::from(path).required(false), environment())
    }

    fn load<S>(file: S, env: Environment) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .set_default("fallback_delay_secs", DEFAULT_FALLBACK_DELAY_SECS)?
            .set_default("request_timeout_secs", DEFAULT_REQUEST_TIMEOUT_SECS)?
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix("PAYJOIN").prefix_separator("_").separator("__").try_parsing(true)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use bitcoin::{Amount, FeeRate};
    use config::FileFormat;
    use payjoin_test_utils::BoxError;

    use super::*;

    fn load(toml: &str, env: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> =
            env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ClientConfig::load(File::from_str(toml, FileFormat::Toml), environment().source(Some(vars)))
    }

    #[test]
    fn defaults_apply() -> Result<(), BoxError> {
        let config = load(r#"endpoint = "https://example.com/pj""#, &[])?;
        assert_eq!(config.endpoint.as_str(), "https://example.com/pj");
        assert_eq!(config.fallback_delay, Duration::from_secs(120));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.params.is_empty());
        assert_eq!(config.fee_estimation, FeeEstimation::default());
        Ok(())
    }

    #[test]
    fn file_sets_every_section() -> Result<(), BoxError> {
        let config = load(
            r#"
            endpoint = "https://example.com/pj"
            fallback_delay_secs = 5
            request_timeout_secs = 10

            [params]
            disable_output_substitution = true
            min_fee_rate = 2
            max_additional_fee_contribution = 182
            additional_fee_output_index = 0

            [fee_estimation]
            tolerance_vb_per_input = 3
            "#,
            &[],
        )?;
        assert_eq!(config.fallback_delay, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.params.disable_output_substitution, Some(true));
        assert_eq!(config.params.min_fee_rate, FeeRate::from_sat_per_vb(2));
        assert_eq!(config.params.max_additional_fee_contribution, Some(Amount::from_sat(182)));
        assert_eq!(config.params.additional_fee_output_index, Some(0));
        assert_eq!(config.params.protocol_version, None);
        assert_eq!(config.fee_estimation.tolerance_vb_per_input, 3);
        assert_eq!(config.fee_estimation.segwit_vb, FeeEstimation::default().segwit_vb);
        Ok(())
    }

    #[test]
    fn environment_overrides_file() -> Result<(), BoxError> {
        let config = load(
            r#"
            endpoint = "https://example.com/pj"
            fallback_delay_secs = 5
            "#,
            &[
                ("PAYJOIN_ENDPOINT", "http://localhost:3000/pj"),
                ("PAYJOIN_FALLBACK_DELAY_SECS", "60"),
                ("PAYJOIN_PARAMS__PROTOCOL_VERSION", "1"),
            ],
        )?;
        assert_eq!(config.endpoint.as_str(), "http://localhost:3000/pj");
        assert_eq!(config.fallback_delay, Duration::from_secs(60));
        assert_eq!(config.params.protocol_version, Some(1));
        Ok(())
    }

    #[test]
    fn fractional_fee_rate_from_environment() -> Result<(), BoxError> {
        let config = load(
            r#"endpoint = "https://example.com/pj""#,
            &[("PAYJOIN_PARAMS__MIN_FEE_RATE", "1.5")],
        )?;
        assert_eq!(config.params.min_fee_rate, Some(FeeRate::from_sat_per_kwu(375)));
        Ok(())
    }

    #[test]
    fn endpoint_is_required() {
        assert!(load("fallback_delay_secs = 5", &[]).is_err());
        assert!(load(r#"endpoint = "not a url""#, &[]).is_err());
    }
}
