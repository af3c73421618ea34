//! Configuration for the local conversion engines.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by the local engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to ImageMagick's `magick` binary.
    #[serde(default = "default_magick_path")]
    pub magick_path: PathBuf,

    /// Path to pandoc binary.
    #[serde(default = "default_pandoc_path")]
    pub pandoc_path: PathBuf,

    /// Scratch directory for engine input/output files.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Seconds a backend may stay short of `ready` before reverting to `not-ready`.
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,

    /// Seconds to wait for a fresh worker's `ready` message.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Seconds to wait for a worker's `loaded` message.
    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,

    /// Timeout for a single conversion in seconds.
    #[serde(default = "default_conversion_timeout")]
    pub conversion_timeout_secs: u64,

    /// Default ImageMagick output quality.
    #[serde(default = "default_magick_quality")]
    pub magick_quality: u8,

    /// FFmpeg log level. Progress needs at least `info` for the input duration.
    #[serde(default = "default_log_level")]
    pub ffmpeg_log_level: String,

    /// Keep source metadata in outputs.
    #[serde(default = "default_keep_metadata")]
    pub keep_metadata: bool,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_magick_path() -> PathBuf {
    PathBuf::from("magick")
}

fn default_pandoc_path() -> PathBuf {
    PathBuf::from("pandoc")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("vert-engines")
}

fn default_readiness_timeout() -> u64 {
    30
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_load_timeout() -> u64 {
    30
}

fn default_conversion_timeout() -> u64 {
    3600 // 1 hour
}

fn default_magick_quality() -> u8 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_keep_metadata() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            magick_path: default_magick_path(),
            pandoc_path: default_pandoc_path(),
            temp_dir: default_temp_dir(),
            readiness_timeout_secs: default_readiness_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            load_timeout_secs: default_load_timeout(),
            conversion_timeout_secs: default_conversion_timeout(),
            magick_quality: default_magick_quality(),
            ffmpeg_log_level: default_log_level(),
            keep_metadata: default_keep_metadata(),
        }
    }
}

impl EngineConfig {
    /// Sets the temp directory.
    pub fn with_temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// Sets the conversion timeout in seconds.
    pub fn with_conversion_timeout(mut self, timeout_secs: u64) -> Self {
        self.conversion_timeout_secs = timeout_secs;
        self
    }

    /// Sets the readiness timeout in seconds.
    pub fn with_readiness_timeout(mut self, timeout_secs: u64) -> Self {
        self.readiness_timeout_secs = timeout_secs;
        self
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Worker protocol timeouts derived from this config.
    pub fn timeouts(&self) -> EngineTimeouts {
        EngineTimeouts {
            handshake: Duration::from_secs(self.handshake_timeout_secs),
            load: Duration::from_secs(self.load_timeout_secs),
            conversion: Duration::from_secs(self.conversion_timeout_secs),
        }
    }
}

/// Per-stage timeouts for the worker protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimeouts {
    pub handshake: Duration,
    pub load: Duration,
    pub conversion: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        EngineConfig::default().timeouts()
    }
}
