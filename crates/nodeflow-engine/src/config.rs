//! Engine configuration

use serde::{Deserialize, Serialize};

/// Tunables for graph runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound on node activations per run; `None` is unbounded.
    ///
    /// Guards against generators that never report exhaustion.
    pub max_activations: Option<u64>,

    /// Yield to the runtime once per scheduler iteration
    pub yield_every_iteration: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_activations: None,
            yield_every_iteration: true,
        }
    }
}

impl EngineConfig {
    pub fn with_max_activations(mut self, limit: u64) -> Self {
        self.max_activations = Some(limit);
        self
    }
}
