use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AnalysisError, Result};

/// Run-level configuration loaded from `soliguard.toml`. Defaults are the
/// calibrated values the shipped model parameters expect.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub model: ModelConfig,
    pub explain: ExplainConfig,
    /// Per-kind confidence threshold overrides, keyed by kind key
    /// (e.g. "reentrancy").
    pub thresholds: std::collections::BTreeMap<String, f64>,
    /// Whole-run budget in milliseconds.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Message-passing rounds in the structural channel.
    pub rounds: usize,
    /// Embedding width for both channels.
    pub embedding_dim: usize,
    /// Statements of context on each side in the semantic channel.
    pub context_window: usize,
    /// Channel disagreement beyond this degrades confidence and flags the
    /// finding.
    pub divergence_bound: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            embedding_dim: 16,
            context_window: 2,
            divergence_bound: 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    pub max_counterfactual_edits: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            max_counterfactual_edits: 3,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            explain: ExplainConfig::default(),
            thresholds: std::collections::BTreeMap::new(),
            timeout_ms: 30_000,
        }
    }
}

impl AnalysisConfig {
    /// Load config from a TOML file path. Returns default config if the file
    /// doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|err| AnalysisError::Config(err.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| AnalysisError::Config(err.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
