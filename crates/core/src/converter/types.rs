//! Types shared by all conversion backends.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Readiness of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    NotReady,
    Downloading,
    Ready,
    Error,
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotReady => "not-ready",
            Self::Downloading => "downloading",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-conversion engine options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Output quality (0-100) for engines that take one.
    #[serde(default)]
    pub quality: Option<u8>,
    /// Overrides the configured metadata preservation.
    #[serde(default)]
    pub keep_metadata: Option<bool>,
}

/// Everything a backend needs to convert one input.
#[derive(Debug, Clone)]
pub struct ConversionInput {
    /// Identifier used for backend-side cancellation.
    pub job_id: String,
    /// Original file name.
    pub name: String,
    /// Normalized source format.
    pub from: String,
    /// File contents.
    pub data: Bytes,
    pub options: ConvertOptions,
    /// Cancelled when the owning job is cancelled.
    pub cancel: CancellationToken,
}

impl ConversionInput {
    pub fn new(job_id: impl Into<String>, name: impl Into<String>, data: Bytes) -> Self {
        let name = name.into();
        Self {
            job_id: job_id.into(),
            from: super::format_of(&name),
            name,
            data,
            options: ConvertOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    /// Output name for the given target format.
    pub fn output_name(&self, to: &str) -> String {
        format!("{}{}", super::file_stem(&self.name), to)
    }
}

/// A successful conversion result.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedFile {
    /// Output name: input stem plus the result format.
    pub name: String,
    /// Normalized format of the output.
    pub format: String,
    pub data: Bytes,
}

impl ConvertedFile {
    pub fn new(name: impl Into<String>, format: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            data,
        }
    }
}

/// Receives percentage updates from a running conversion.
///
/// Values are clamped to `0..=100`. Cloning shares the same sink.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(f64) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// A reporter that discards updates.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, percent: f64) {
        if percent.is_finite() {
            (self.sink)(percent.clamp(0.0, 100.0));
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}
