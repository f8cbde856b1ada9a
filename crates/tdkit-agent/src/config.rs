//! Training configuration
//!
//! Bundles the hyperparameters of a training run so that demos and
//! experiments can be driven from a JSON file.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tdkit_core::{MlpConfig, Optimizer, OptimizerConfig, RLError, Result, ValueTransform};

use crate::reward_tracing::{MonteCarlo, NStep, RewardTracer};
use crate::value_losses::ValueLoss;

/// Which reward tracer to use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TracerConfig {
    /// n-step bootstrapping
    NStep {
        /// Horizon
        n: usize,
    },
    /// Full-episode returns
    MonteCarlo,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self::NStep { n: 1 }
    }
}

/// Hyperparameters of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Discount factor
    pub gamma: f64,
    /// Reward tracer
    pub tracer: TracerConfig,
    /// Value-function backbone
    pub value_network: MlpConfig,
    /// Policy backbone
    pub policy_network: MlpConfig,
    /// Value-function optimizer
    pub value_optimizer: OptimizerConfig,
    /// Policy optimizer
    pub policy_optimizer: OptimizerConfig,
    /// TD regression loss
    pub value_loss: ValueLoss,
    /// Transform applied to value predictions
    pub value_transform: ValueTransform,
    /// Polyak rate for a separate target network, `None` to bootstrap from the model itself
    pub target_tau: Option<f64>,
    /// Batch size for replay updates
    pub batch_size: usize,
    /// Buffer size for experience replay
    pub buffer_size: usize,
    /// Number of training episodes
    pub episodes: usize,
    /// Random seed
    pub seed: Option<u64>,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gamma: 0.9,
            tracer: TracerConfig::default(),
            value_network: MlpConfig::default(),
            policy_network: MlpConfig::default(),
            value_optimizer: OptimizerConfig::default(),
            policy_optimizer: OptimizerConfig::default(),
            value_loss: ValueLoss::default(),
            value_transform: ValueTransform::default(),
            target_tau: None,
            batch_size: 32,
            buffer_size: 10_000,
            episodes: 500,
            seed: None,
            params: serde_json::Map::new(),
        }
    }
}

impl AgentConfig {
    /// Parse a JSON document, filling in defaults for missing fields
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }

    /// Check hyperparameter ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(RLError::InvalidConfig(format!(
                "gamma must lie in [0, 1], got {}",
                self.gamma
            )));
        }
        if let Some(tau) = self.target_tau {
            if !(0.0..=1.0).contains(&tau) {
                return Err(RLError::InvalidConfig(format!(
                    "target_tau must lie in [0, 1], got {tau}"
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(RLError::InvalidConfig("batch_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Build the configured reward tracer
    pub fn build_tracer(&self) -> Result<Box<dyn RewardTracer>> {
        Ok(match self.tracer {
            TracerConfig::NStep { n } => Box::new(NStep::new(n, self.gamma)?),
            TracerConfig::MonteCarlo => Box::new(MonteCarlo::new(self.gamma)?),
        })
    }

    /// Build the value-function optimizer
    #[must_use]
    pub fn build_value_optimizer(&self) -> Box<dyn Optimizer> {
        self.value_optimizer.build()
    }

    /// Build the policy optimizer
    #[must_use]
    pub fn build_policy_optimizer(&self) -> Box<dyn Optimizer> {
        self.policy_optimizer.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AgentConfig::from_json_str(
            r#"{"gamma": 0.99, "tracer": {"kind": "n_step", "n": 3}, "note": "extra"}"#,
        )
        .unwrap();
        assert_eq!(config.tracer, TracerConfig::NStep { n: 3 });
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.params["note"], "extra");
        assert_eq!(config.build_tracer().unwrap().gamma(), 0.99);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AgentConfig::from_json_str(r#"{"gamma": 1.5}"#).is_err());
        let config = AgentConfig {
            tracer: TracerConfig::NStep { n: 0 },
            ..AgentConfig::default()
        };
        assert!(config.build_tracer().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let config = AgentConfig {
            tracer: TracerConfig::MonteCarlo,
            target_tau: Some(0.1),
            ..AgentConfig::default()
        };
        let path = std::env::temp_dir().join(format!("tdkit-agent-config-{}.json", std::process::id()));
        config.save_json(&path).unwrap();
        let loaded = AgentConfig::load_json(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
