//! Engine configuration.
//!
//! Every field has a default, so a partial JSON file (or none at all) is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use queue::{WorkerConfig, DEFAULT_MAX_ITERATIONS};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Passes a drain may make before the execution is failed.
    pub max_iterations: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self { max_iterations: DEFAULT_MAX_ITERATIONS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `true`: in-process drain queue. `false`: broker queue plus workers.
    pub synchronous: bool,
    /// Applies to every node without its own `retry` block.
    pub retry: RetryPolicy,
    pub drain: DrainConfig,
    pub handler_timeout_secs: Option<u64>,
    /// How long `Engine::run_to_completion` waits on a broker-mode run.
    pub run_timeout_secs: u64,
    pub worker: WorkerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            synchronous: true,
            retry: RetryPolicy::default(),
            drain: DrainConfig::default(),
            handler_timeout_secs: None,
            run_timeout_secs: 600,
            worker: WorkerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}
