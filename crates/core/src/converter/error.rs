//! Error types for the converter module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building a format descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A descriptor must be readable, writable, or both.
    #[error("Format {extension} must support at least one direction")]
    NoDirection { extension: String },

    /// The extension was empty after normalization.
    #[error("Format extension cannot be empty")]
    EmptyExtension,
}

/// Errors that can occur during conversion.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// No backend supports the requested pair.
    #[error("Unsupported format: {from} -> {to}")]
    UnsupportedFormat { from: String, to: String },

    /// Archive members resolve to more than one backend.
    #[error("Archive contains files handled by different converters: {backends:?}")]
    MixedFormatArchive { backends: Vec<String> },

    /// Engine binary not found.
    #[error("{engine} not found at path: {path}")]
    EngineNotFound { engine: String, path: PathBuf },

    /// The engine reported a failure.
    #[error("Conversion failed: {reason}")]
    ConversionFailed {
        reason: String,
        kind: Option<String>,
        stderr: Option<String>,
    },

    /// The remote service reported a failure for a job.
    #[error("Remote job failed: {message}")]
    RemoteJobFailed {
        message: String,
        job_id: Option<String>,
        auth: Option<String>,
        from: String,
        to: String,
    },

    /// The input's content hash has too many recent remote failures.
    #[error("Too many recent failures converting {name}, try again later")]
    RateLimited { name: String, hash: String },

    /// A worker did not reach the expected protocol stage in time.
    #[error("Timed out waiting for {stage} after {timeout_secs} seconds")]
    ProtocolTimeout { stage: String, timeout_secs: u64 },

    /// Transport level failure talking to the remote service.
    #[error("Network error: {0}")]
    Network(String),

    /// Archive could not be read or written.
    #[error("Archive error: {0}")]
    Archive(String),

    /// I/O error during conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job was cancelled.
    #[error("Conversion cancelled")]
    Cancelled,
}

impl ConverterError {
    /// Creates a new conversion failed error with stderr output.
    pub fn conversion_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ConversionFailed {
            reason: reason.into(),
            kind: None,
            stderr,
        }
    }

    /// Creates a conversion failed error carrying an engine error kind.
    pub fn engine_failure(reason: impl Into<String>, kind: Option<String>) -> Self {
        Self::ConversionFailed {
            reason: reason.into(),
            kind,
            stderr: None,
        }
    }

    /// Creates a new unsupported format error.
    pub fn unsupported(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a new protocol timeout error.
    pub fn timeout(stage: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::ProtocolTimeout {
            stage: stage.into(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Whether this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this failure counts as a strike against the input's content hash.
    pub fn is_strike(&self) -> bool {
        matches!(self, Self::RemoteJobFailed { .. })
    }

    /// Engine-provided error kind, when one was reported.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::ConversionFailed { kind, .. } => kind.as_deref(),
            _ => None,
        }
    }
}
