//! Runner configuration
//!
//! Read from an optional JSON file; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use nodeflow_engine::EngineConfig;

/// Default log filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CliConfig {
    /// Scheduler settings
    pub engine: EngineConfig,
    /// Log filter used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Pretty-print the results
    pub pretty: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            pretty: true,
        }
    }
}

impl CliConfig {
    /// Load configuration from disk
    ///
    /// A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await.map_err(ConfigError::Io)?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
}
