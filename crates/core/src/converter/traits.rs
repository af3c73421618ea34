//! Trait definitions for the converter module.

use async_trait::async_trait;

use super::capabilities::FormatDescriptor;
use super::error::ConverterError;
use super::readiness::Readiness;
use super::types::{BackendStatus, ConversionInput, ConvertedFile, ProgressReporter};

/// A conversion engine that can turn one format into another.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the name of this backend.
    fn name(&self) -> &str;

    /// Formats this backend can read and/or write.
    fn supported_formats(&self) -> &[FormatDescriptor];

    /// Whether `convert` emits incremental progress.
    fn reports_progress(&self) -> bool {
        false
    }

    /// Readiness tracker for this backend.
    fn readiness(&self) -> &Readiness;

    /// Current readiness.
    fn status(&self) -> BackendStatus {
        self.readiness().status()
    }

    /// Loads engine assets and drives readiness toward `ready` or `error`.
    async fn preload(&self) {
        self.readiness().mark_ready();
    }

    /// Converts `input` to the `to` format.
    ///
    /// Must fail with [`ConverterError::Cancelled`] once `input.cancel` fires.
    async fn convert(
        &self,
        input: ConversionInput,
        to: &str,
        progress: ProgressReporter,
    ) -> Result<ConvertedFile, ConverterError>;

    /// Cancels the in-flight conversion for `job_id`, if any.
    async fn cancel(&self, job_id: &str);

    /// Whether the backend is usable right now.
    async fn health_check(&self) -> bool {
        true
    }

    /// Looks up the descriptor for a normalized format.
    fn format(&self, extension: &str) -> Option<&FormatDescriptor> {
        self.supported_formats()
            .iter()
            .find(|f| f.extension() == extension)
    }

    /// Whether `extension` appears in the catalog in any direction.
    fn supports(&self, extension: &str) -> bool {
        self.format(extension).is_some()
    }

    /// All catalog extensions.
    fn format_strings(&self) -> Vec<&str> {
        self.supported_formats()
            .iter()
            .map(|f| f.extension())
            .collect()
    }
}
