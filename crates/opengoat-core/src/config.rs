//! Environment-driven runtime configuration: home directory override,
//! scanner cadence, and the default head agent id. Provider credentials
//! are read per-provider from their own env var families (§4.1) and are
//! not modeled here.

use std::path::PathBuf;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scanner::InactivePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Overrides `HomeLayout::default_home()` when set.
    pub home_dir: Option<PathBuf>,
    pub default_agent: String,
    pub scanner_interval_minutes: u64,
    pub scanner_inactive_minutes: i64,
    #[serde(deserialize_with = "deserialize_policy")]
    pub scanner_policy: String,
    pub max_parallel_flows: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            home_dir: None,
            default_agent: "ceo".to_string(),
            scanner_interval_minutes: 5,
            scanner_inactive_minutes: 30,
            scanner_policy: "all-managers".to_string(),
            max_parallel_flows: 4,
        }
    }
}

impl RuntimeConfig {
    /// Loads `.env` (if present) then layers `OPENGOAT_*` environment
    /// variables over the defaults above, mirroring the teacher's
    /// `config` + `dotenvy` loader.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(Config::try_from(&RuntimeConfig::default())?)
            .add_source(
                Environment::with_prefix("OPENGOAT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Validation(e.to_string()))?;

        config.try_deserialize().map_err(|e| Error::Validation(e.to_string()))
    }

    pub fn scanner_policy(&self) -> InactivePolicy {
        match self.scanner_policy.as_str() {
            "ceo-only" => InactivePolicy::CeoOnly,
            _ => InactivePolicy::AllManagers,
        }
    }
}

fn deserialize_policy<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_all_managers() {
        let config = RuntimeConfig::default();
        assert_eq!(config.scanner_policy(), InactivePolicy::AllManagers);
    }

    #[test]
    fn ceo_only_policy_parses() {
        let mut config = RuntimeConfig::default();
        config.scanner_policy = "ceo-only".into();
        assert_eq!(config.scanner_policy(), InactivePolicy::CeoOnly);
    }
}
