//! Mock conversion backend for testing.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::converter::{
    catalog, Backend, ConversionInput, ConvertedFile, ConverterError, FormatDescriptor,
    ProgressReporter, Readiness,
};

/// A recorded conversion call for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedConversion {
    pub job_id: String,
    pub name: String,
    pub from: String,
    pub to: String,
}

/// Mock implementation of the Backend trait.
///
/// Provides controllable behavior for testing:
/// - Track conversions and cancellations for assertions
/// - Simulate failures and slow conversions
/// - Emit progress updates
/// - Observe how many conversions ran at once
///
/// Clones share all recorded state.
///
/// # Example
///
/// ```rust,ignore
/// use vert_core::testing::MockBackend;
///
/// let backend = MockBackend::new("imagemagick")
///     .with_formats(&[(".png", true, true, true), (".jpg", true, true, true)]);
///
/// backend.set_next_error(ConverterError::conversion_failed("boom", None)).await;
///
/// let conversions = backend.recorded_conversions().await;
/// assert_eq!(conversions.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockBackend {
    name: String,
    formats: Vec<FormatDescriptor>,
    readiness: Readiness,
    reports_progress: bool,
    /// Recorded conversions.
    conversions: Arc<RwLock<Vec<RecordedConversion>>>,
    /// Job ids passed to `cancel`.
    cancels: Arc<RwLock<Vec<String>>>,
    /// If set, the next conversion will fail with this error.
    next_error: Arc<RwLock<Option<ConverterError>>>,
    /// Simulated conversion duration.
    delay: Arc<RwLock<Duration>>,
    /// Output bytes; the input is echoed when unset.
    output: Arc<RwLock<Option<Bytes>>>,
    healthy: Arc<RwLock<bool>>,
    /// Time `cancel` takes to return.
    cancel_delay: Duration,
    /// Keep converting after the job's token fires.
    ignores_cancel: bool,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Create a ready mock backend with an empty catalog.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            formats: Vec::new(),
            readiness: Readiness::ready(name),
            reports_progress: false,
            conversions: Arc::new(RwLock::new(Vec::new())),
            cancels: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            output: Arc::new(RwLock::new(None)),
            healthy: Arc::new(RwLock::new(true)),
            cancel_delay: Duration::ZERO,
            ignores_cancel: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the catalog from `(extension, from, to, native)` rows.
    pub fn with_formats(mut self, rows: &[(&str, bool, bool, bool)]) -> Self {
        self.formats = catalog(rows);
        self
    }

    /// Emit 25/50/75 progress updates while converting.
    pub fn with_progress(mut self, reports: bool) -> Self {
        self.reports_progress = reports;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Arc::new(RwLock::new(delay)),
            ..self
        }
    }

    /// Make `cancel` take `delay` before returning.
    pub fn with_cancel_delay(mut self, delay: Duration) -> Self {
        self.cancel_delay = delay;
        self
    }

    /// Finish conversions even after cancellation, like an engine that
    /// cannot be interrupted.
    pub fn ignoring_cancel(mut self) -> Self {
        self.ignores_cancel = true;
        self
    }

    /// Start not ready, with the given readiness timeout.
    pub fn not_ready(mut self, timeout: Duration) -> Self {
        self.readiness = Readiness::new(self.name.clone(), timeout);
        self
    }

    /// Get all recorded conversions.
    pub async fn recorded_conversions(&self) -> Vec<RecordedConversion> {
        self.conversions.read().await.clone()
    }

    /// Get the number of conversions started.
    pub async fn conversion_count(&self) -> usize {
        self.conversions.read().await.len()
    }

    /// Job ids passed to `cancel`.
    pub async fn recorded_cancels(&self) -> Vec<String> {
        self.cancels.read().await.clone()
    }

    /// Configure the next conversion to fail with the given error.
    pub async fn set_next_error(&self, error: ConverterError) {
        *self.next_error.write().await = Some(error);
    }

    /// Set the simulated conversion duration.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Return `data` from every conversion instead of echoing the input.
    pub async fn set_output(&self, data: Bytes) {
        *self.output.write().await = Some(data);
    }

    pub async fn set_healthy(&self, healthy: bool) {
        *self.healthy.write().await = healthy;
    }

    /// Highest number of conversions observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        input: &ConversionInput,
        to: &str,
        progress: &ProgressReporter,
    ) -> Result<ConvertedFile, ConverterError> {
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let delay = *self.delay.read().await;
        let steps: &[f64] = if self.reports_progress {
            &[25.0, 50.0, 75.0]
        } else {
            &[]
        };
        let pause = delay / (steps.len() as u32 + 1);
        let cancel = if self.ignores_cancel {
            CancellationToken::new()
        } else {
            input.cancel.clone()
        };

        for step in steps {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConverterError::Cancelled),
                _ = tokio::time::sleep(pause) => progress.report(*step),
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConverterError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }

        let data = self
            .output
            .read()
            .await
            .clone()
            .unwrap_or_else(|| input.data.clone());
        Ok(ConvertedFile::new(input.output_name(to), to, data))
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_formats(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    fn reports_progress(&self) -> bool {
        self.reports_progress
    }

    fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    async fn convert(
        &self,
        input: ConversionInput,
        to: &str,
        progress: ProgressReporter,
    ) -> Result<ConvertedFile, ConverterError> {
        self.conversions.write().await.push(RecordedConversion {
            job_id: input.job_id.clone(),
            name: input.name.clone(),
            from: input.from.clone(),
            to: to.to_string(),
        });

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.run(&input, to, &progress).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn cancel(&self, job_id: &str) {
        self.cancels.write().await.push(job_id.to_string());
        tokio::time::sleep(self.cancel_delay).await;
    }

    async fn health_check(&self) -> bool {
        *self.healthy.read().await
    }
}
