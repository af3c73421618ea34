use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::converter::EngineConfig;
use crate::instance::InstanceConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::remote::RemoteConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub engines: EngineConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// Persisted local state
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    /// SQLite database holding the instance mode, blocklist and location.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("vert.db")
}
