//! Remote service configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::protocol::ConversionSpeed;

/// Settings sent along with every remote job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Encoder preset requested from the service.
    #[serde(default)]
    pub speed: ConversionSpeed,

    /// Whether the service should keep input metadata.
    #[serde(default = "default_keep_metadata")]
    pub keep_metadata: bool,

    /// Connect timeout for HTTP and WebSocket requests (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_keep_metadata() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            speed: ConversionSpeed::default(),
            keep_metadata: default_keep_metadata(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl RemoteConfig {
    pub fn with_speed(mut self, speed: ConversionSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_keep_metadata(mut self, keep: bool) -> Self {
        self.keep_metadata = keep;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
