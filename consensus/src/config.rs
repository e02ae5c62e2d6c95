//! Engine configuration
//!
//! Every section has defaults, can be read from a TOML document (missing
//! tables and keys fall back to the defaults) and can be overridden by
//! `CONSENSUS_*` environment variables. [`EngineConfig::validate`] runs at
//! startup and rejects configurations the engine cannot serve.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ensemble::{ConsensusConfig, EnsembleConfig};
use crate::oracle::OracleSpec;
use crate::state::{BackendKind, DimensionWeights, StoreConfig};
use crate::telemetry::TelemetryConfig;
use crate::thresholds::LearnerConfig;

/// Tolerance on the sum of the dimension weights
const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No oracles configured")]
    NoOracles,

    #[error("Invalid dimension weights: {0}")]
    InvalidWeights(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidRange { field: &'static str, value: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ensemble: EnsembleConfig,
    pub consensus: ConsensusConfig,
    pub weights: DimensionWeights,
    pub learner: LearnerConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub oracles: Vec<OracleSpec>,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ensemble: EnsembleConfig::default(),
            consensus: ConsensusConfig::default(),
            weights: DimensionWeights::default(),
            learner: LearnerConfig::default(),
            telemetry: TelemetryConfig::default(),
            store: StoreConfig::default(),
            oracles: default_oracles(),
            log_level: "info".to_string(),
        }
    }
}

/// Demo ensemble of stub oracles, one per common provider type
fn default_oracles() -> Vec<OracleSpec> {
    ["claude", "gemini", "gpt"]
        .iter()
        .map(|provider_type| OracleSpec::new(&format!("{provider_type}-stub"), provider_type))
        .collect()
}

impl EngineConfig {
    /// Defaults overlaid with `CONSENSUS_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Overlay `CONSENSUS_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring unparsable environment override");
                    None
                }
            }
        }
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;

        if let Some(v) = parsed(lookup, "CONSENSUS_DEADLINE_MS") {
            self.ensemble.deadline_ms = v;
        }
        if let Some(v) = parsed(lookup, "CONSENSUS_PER_CALL_TIMEOUT_MS") {
            self.ensemble.per_call_timeout_ms = v;
        }
        if let Some(v) = parsed(lookup, "CONSENSUS_MAX_FANOUT") {
            self.ensemble.max_fanout = v;
        }
        if let Some(v) = parsed(lookup, "CONSENSUS_METHOD") {
            self.consensus.method = v;
        }
        if let Some(v) = parsed(lookup, "CONSENSUS_OUTLIER_THRESHOLD") {
            self.consensus.outlier_threshold = v;
        }
        if let Some(v) = parsed(lookup, "CONSENSUS_RELIABILITY_DECAY") {
            self.consensus.reliability_decay = v;
        }
        if let Some(v) = parsed(lookup, "CONSENSUS_LEARNING_RATE") {
            self.learner.learning_rate = v;
        }
        if let Some(v) = parsed(lookup, "CONSENSUS_WINDOW") {
            self.learner.window = v;
        }
        if let Some(v) = parsed(lookup, "CONSENSUS_MIN_SAMPLES") {
            self.learner.min_samples = v;
        }
        if let Some(v) = parsed::<BackendKind>(lookup, "CONSENSUS_STORE_BACKEND") {
            self.store.backend = v;
        }
        if let Some(path) = lookup("CONSENSUS_STORE_PATH") {
            self.store.path = path.into();
        }
        if let Some(val) = lookup("CONSENSUS_TELEMETRY_ENABLED") {
            let val = val.trim().to_lowercase();
            self.telemetry.enabled = val == "true" || val == "1" || val == "yes";
        }
        if let Some(level) = lookup("CONSENSUS_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Reject unusable configurations; clamp the per-call timeout to the deadline
    pub fn validate(&mut self) -> ConfigResult<()> {
        if self.oracles.is_empty() {
            return Err(ConfigError::NoOracles);
        }
        self.validate_settings()
    }

    /// Every check except the oracle list, for callers that supply their own oracles
    pub fn validate_settings(&mut self) -> ConfigResult<()> {
        if self.weights.is_empty() {
            return Err(ConfigError::InvalidWeights("no dimensions weighted".to_string()));
        }
        if let Some((dimension, weight)) = self.weights.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidWeights(format!(
                "{dimension} has weight {weight}"
            )));
        }
        let total = self.weights.total();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::InvalidWeights(format!("weights sum to {total}, expected 1.0")));
        }

        check_unit("consensus.reliability_decay", self.consensus.reliability_decay)?;
        check_unit("learner.learning_rate", self.learner.learning_rate)?;

        if self.ensemble.deadline_ms == 0 {
            return Err(ConfigError::InvalidRange {
                field: "ensemble.deadline_ms",
                value: "0".to_string(),
            });
        }
        if self.ensemble.max_fanout == 0 {
            return Err(ConfigError::InvalidRange {
                field: "ensemble.max_fanout",
                value: "0".to_string(),
            });
        }
        if self.ensemble.per_call_timeout_ms > self.ensemble.deadline_ms {
            warn!(
                per_call_timeout_ms = self.ensemble.per_call_timeout_ms,
                deadline_ms = self.ensemble.deadline_ms,
                "Per-call timeout exceeds the deadline, clamping"
            );
            self.ensemble.per_call_timeout_ms = self.ensemble.deadline_ms;
        }
        if self.oracles.len() > self.ensemble.max_fanout {
            warn!(
                oracles = self.oracles.len(),
                max_fanout = self.ensemble.max_fanout,
                "More oracles configured than the fan-out bound; extras will be skipped"
            );
        }

        Ok(())
    }
}

/// Value must lie in (0, 1]
fn check_unit(field: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRange {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConsensusMethod;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let mut config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.oracles.len(), 3);
        assert_eq!(config.ensemble.per_call_timeout_ms, 8_000);
    }

    #[test]
    fn test_no_oracles_rejected() {
        let mut config = EngineConfig {
            oracles: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoOracles)));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = EngineConfig {
            weights: DimensionWeights::from_pairs(&[("performance", 0.5), ("safety", 0.4)]),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWeights(_))));

        config.weights = DimensionWeights::from_pairs(&[("performance", 1.5), ("safety", -0.5)]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWeights(_))));
    }

    #[test]
    fn test_ranges_checked() {
        let mut config = EngineConfig::default();
        config.consensus.reliability_decay = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRange { .. })));

        let mut config = EngineConfig::default();
        config.ensemble.max_fanout = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRange { .. })));
    }

    #[test]
    fn test_per_call_timeout_clamped() {
        let mut config = EngineConfig::default();
        config.ensemble.deadline_ms = 2_000;
        config.validate().unwrap();
        assert_eq!(config.ensemble.per_call_timeout_ms, 2_000);
    }

    #[test]
    fn test_toml_partial_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            log_level = "debug"

            [ensemble]
            deadline_ms = 3000

            [consensus]
            method = "median"

            [[oracles]]
            id = "primary"
            provider_type = "claude"
            confidence = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.ensemble.deadline_ms, 3_000);
        assert_eq!(config.ensemble.max_fanout, 5);
        assert_eq!(config.consensus.method, ConsensusMethod::Median);
        assert_eq!(config.oracles.len(), 1);
        assert_eq!(config.oracles[0].token_cost, 150);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consensus.toml");
        std::fs::write(&path, "[learner]\nwindow = 50\n").unwrap();
        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.learner.window, 50);
        assert!(EngineConfig::from_toml_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CONSENSUS_DEADLINE_MS", "5000"),
            ("CONSENSUS_METHOD", "bayesian"),
            ("CONSENSUS_STORE_BACKEND", "memory"),
            ("CONSENSUS_TELEMETRY_ENABLED", "0"),
            ("CONSENSUS_MAX_FANOUT", "lots"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.ensemble.deadline_ms, 5_000);
        assert_eq!(config.consensus.method, ConsensusMethod::BayesianFusion);
        assert_eq!(config.store.backend, BackendKind::Memory);
        assert!(!config.telemetry.enabled);
        assert_eq!(config.ensemble.max_fanout, 5);
    }
}
