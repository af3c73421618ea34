//! Instance selection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::geo::DEFAULT_LOCATOR_URL;
use super::selector::{default_endpoints, InstanceEndpoint, InstanceMode, PUBLIC_INSTANCE_URL};

/// Where remote jobs are sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Fixed mode. When unset, the saved mode (or the custom URL rule) applies.
    #[serde(default)]
    pub mode: Option<InstanceMode>,

    /// User-provided instance, also the last resort in auto mode.
    #[serde(default = "default_custom_url")]
    pub custom_url: String,

    /// Timeout for reachability probes (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// IP geolocation endpoint.
    #[serde(default = "default_locator_url")]
    pub locator_url: String,

    /// Known instances, in fallback order.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<InstanceEndpoint>,
}

fn default_custom_url() -> String {
    PUBLIC_INSTANCE_URL.to_string()
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_locator_url() -> String {
    DEFAULT_LOCATOR_URL.to_string()
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            mode: None,
            custom_url: default_custom_url(),
            probe_timeout_secs: default_probe_timeout(),
            locator_url: default_locator_url(),
            endpoints: default_endpoints(),
        }
    }
}

impl InstanceConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
