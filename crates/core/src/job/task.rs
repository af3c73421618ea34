//! A single file's conversion lifecycle.

use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{dedupe_names, ArchiveCodec, ArchiveEntry, ARCHIVE_FORMAT};
use crate::converter::{
    file_stem, format_of, normalize_format, select_backend, Backend, BackendRegistry,
    ConversionInput, ConvertOptions, ConvertedFile, ConverterError, ProgressReporter,
};
use crate::metrics;

use super::types::{normalize_file_name, short_id, JobState, JobStatus};

/// Default bound for concurrent archive member conversions.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Hardware parallelism, or [`DEFAULT_PARALLELISM`] when unknown.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_PARALLELISM)
}

#[derive(Debug, Default)]
struct JobInner {
    to: String,
    state: JobState,
    result: Option<ConvertedFile>,
    error: Option<String>,
    token: CancellationToken,
    queued: bool,
}

/// Publishes `value` only if it moves progress forward.
fn advance(progress: &watch::Sender<f64>, value: f64) {
    progress.send_if_modified(|current| {
        if value > *current {
            *current = value;
            true
        } else {
            false
        }
    });
}

/// Per-member progress of an archive job, published as the mean.
#[derive(Clone)]
struct MemberProgress {
    slots: Arc<Mutex<Vec<f64>>>,
    progress: Arc<watch::Sender<f64>>,
}

impl MemberProgress {
    fn new(count: usize, progress: Arc<watch::Sender<f64>>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(vec![0.0; count])),
            progress,
        }
    }

    fn set(&self, index: usize, value: f64) {
        let mean = self.slots.lock().ok().map(|mut slots| {
            slots[index] = value;
            slots.iter().sum::<f64>() / slots.len() as f64
        });
        if let Some(mean) = mean {
            advance(&self.progress, mean);
        }
    }
}

/// Why an archive job has no backend.
#[derive(Debug, Clone)]
enum ArchiveRouteError {
    Unreadable(String),
    Mixed(Vec<String>),
}

impl From<ArchiveRouteError> for ConverterError {
    fn from(err: ArchiveRouteError) -> Self {
        match err {
            ArchiveRouteError::Unreadable(message) => ConverterError::Archive(message),
            ArchiveRouteError::Mixed(backends) => ConverterError::MixedFormatArchive { backends },
        }
    }
}

/// Resolves the one backend shared by every member of an archive.
fn route_archive(
    name: &str,
    data: &[u8],
    registry: &BackendRegistry,
    codec: &dyn ArchiveCodec,
) -> Result<Arc<dyn Backend>, ArchiveRouteError> {
    let entries = codec
        .extract(data)
        .map_err(|e| ArchiveRouteError::Unreadable(e.to_string()))?;
    if entries.is_empty() {
        return Err(ArchiveRouteError::Unreadable(format!("{} contains no files", name)));
    }
    let formats: Vec<String> = entries.iter().map(|e| e.format()).collect();
    registry
        .resolve_archive(formats.iter().map(String::as_str))
        .map_err(|e| match e {
            ConverterError::MixedFormatArchive { backends } => ArchiveRouteError::Mixed(backends),
            other => ArchiveRouteError::Unreadable(other.to_string()),
        })
}

/// The unit of work for one submitted file.
///
/// Eligible backends are fixed at creation from the source format. The
/// concrete backend is picked per run from the current target.
pub struct Job {
    id: String,
    name: String,
    from: String,
    input: Bytes,
    backends: Vec<Arc<dyn Backend>>,
    codec: Arc<dyn ArchiveCodec>,
    options: ConvertOptions,
    max_parallel: usize,
    route_error: Option<ArchiveRouteError>,
    inner: Mutex<JobInner>,
    progress: Arc<watch::Sender<f64>>,
}

impl Job {
    /// Creates a job whose eligible backends come from `registry`.
    ///
    /// Archives are bound to the backend shared by all their members. An
    /// archive whose members need different backends gets none and fails
    /// with [`ConverterError::MixedFormatArchive`] when converted.
    pub fn new(
        name: &str,
        data: Bytes,
        to: &str,
        registry: &BackendRegistry,
        codec: Arc<dyn ArchiveCodec>,
    ) -> Self {
        let name = normalize_file_name(name);
        let from = format_of(&name);
        if !codec.is_archive(&from) {
            let backends = registry.eligible(&from);
            return Self::with_backends(name, data, to, backends, codec);
        }

        match route_archive(&name, &data, registry, codec.as_ref()) {
            Ok(backend) => Self::with_backends(name, data, to, vec![backend], codec),
            Err(e) => {
                debug!("Archive {} has no single backend: {:?}", name, e);
                let mut job = Self::with_backends(name, data, to, Vec::new(), codec);
                job.route_error = Some(e);
                job
            }
        }
    }

    /// Creates an archive job bound to the one backend shared by all members.
    pub fn for_archive(
        name: &str,
        data: Bytes,
        to: &str,
        backend: Arc<dyn Backend>,
        codec: Arc<dyn ArchiveCodec>,
    ) -> Self {
        Self::with_backends(normalize_file_name(name), data, to, vec![backend], codec)
    }

    fn with_backends(
        name: String,
        input: Bytes,
        to: &str,
        backends: Vec<Arc<dyn Backend>>,
        codec: Arc<dyn ArchiveCodec>,
    ) -> Self {
        let (progress, _) = watch::channel(0.0);
        Self {
            id: short_id(),
            from: format_of(&name),
            name,
            input,
            backends,
            codec,
            options: ConvertOptions::default(),
            max_parallel: available_parallelism(),
            route_error: None,
            inner: Mutex::new(JobInner {
                to: normalize_format(to),
                ..JobInner::default()
            }),
            progress: Arc::new(progress),
        }
    }

    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    /// Bounds concurrent member conversions for archive jobs.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn input(&self) -> &Bytes {
        &self.input
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub fn is_archive(&self) -> bool {
        self.codec.is_archive(&self.from)
    }

    pub fn to(&self) -> String {
        self.inner.lock().map(|i| i.to.clone()).unwrap_or_default()
    }

    /// Changes the target format for the next run.
    pub fn set_to(&self, to: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.to = normalize_format(to);
        }
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().map(|i| i.state).unwrap_or_default()
    }

    pub fn progress(&self) -> f64 {
        *self.progress.borrow()
    }

    /// Progress updates for this job.
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }

    pub fn result(&self) -> Option<ConvertedFile> {
        self.inner.lock().ok().and_then(|i| i.result.clone())
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|i| i.error.clone())
    }

    /// Backend that would handle the current source and target.
    pub fn find_backend(&self) -> Option<Arc<dyn Backend>> {
        if self.is_archive() {
            return self.backends.first().cloned();
        }
        select_backend(&self.backends, &self.from, &self.to())
    }

    pub fn status(&self) -> JobStatus {
        let backend = self.find_backend().map(|b| b.name().to_string());
        let (to, state, result_format, error) = match self.inner.lock() {
            Ok(inner) => (
                inner.to.clone(),
                inner.state,
                inner.result.as_ref().map(|r| r.format.clone()),
                inner.error.clone(),
            ),
            Err(_) => (String::new(), JobState::Error, None, None),
        };
        JobStatus {
            id: self.id.clone(),
            name: self.name.clone(),
            from: self.from.clone(),
            to,
            state,
            progress: self.progress(),
            backend,
            result_format,
            error,
        }
    }

    /// Marks the job as waiting for a queue slot.
    ///
    /// The returned token fires if the job is cancelled before it starts.
    /// A job that is already converting keeps its current token.
    pub fn enqueue(&self) -> CancellationToken {
        match self.inner.lock() {
            Ok(inner) if inner.state == JobState::Processing => inner.token.clone(),
            Ok(mut inner) => {
                inner.queued = true;
                inner.token = CancellationToken::new();
                inner.token.clone()
            }
            Err(_) => CancellationToken::new(),
        }
    }

    /// Converts the input to the current target.
    ///
    /// Returns `Ok(None)` when the run was cancelled. Failures leave the job
    /// in `error` with the message recorded.
    pub async fn convert(&self) -> Result<Option<ConvertedFile>, ConverterError> {
        let to = self.to();
        let backend = self.find_backend();

        let token = {
            let Ok(mut inner) = self.inner.lock() else {
                return Err(ConverterError::conversion_failed("Job state unavailable", None));
            };
            if inner.state == JobState::Processing {
                warn!(job_id = %self.id, "Job is already converting");
                return Ok(None);
            }
            let queued = std::mem::take(&mut inner.queued);
            if queued && inner.token.is_cancelled() {
                debug!(job_id = %self.id, "Skipping job cancelled while queued");
                return Ok(None);
            }
            if backend.is_some() {
                if !queued {
                    inner.token = CancellationToken::new();
                }
                inner.state = JobState::Processing;
                inner.result = None;
                inner.error = None;
            }
            inner.token.clone()
        };

        let Some(backend) = backend else {
            let err = match &self.route_error {
                Some(route) => ConverterError::from(route.clone()),
                None => ConverterError::unsupported(&self.from, &to),
            };
            self.fail(&err);
            return Err(err);
        };
        self.progress.send_replace(0.0);

        info!(
            job_id = %self.id,
            backend = %backend.name(),
            "Converting {} to {}",
            self.name,
            to
        );
        let started = Instant::now();
        metrics::JOBS_IN_FLIGHT.inc();
        let outcome = if self.is_archive() {
            self.convert_archive(&backend, &to, &token).await
        } else {
            self.convert_single(&backend, &to, &token).await
        };
        metrics::JOBS_IN_FLIGHT.dec();
        metrics::CONVERSION_DURATION
            .with_label_values(&[backend.name()])
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(file) => {
                // a cancel that raced the finish keeps the job cancelled
                let finished = match self.inner.lock() {
                    Ok(mut inner)
                        if inner.state == JobState::Processing && !token.is_cancelled() =>
                    {
                        inner.state = JobState::Done;
                        inner.result = Some(file.clone());
                        true
                    }
                    _ => false,
                };
                if !finished {
                    return Ok(self.finish_cancelled(backend.name()));
                }
                self.progress.send_replace(100.0);
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&[backend.name(), "done"])
                    .inc();
                info!(job_id = %self.id, "Converted {} to {}", self.name, file.name);
                Ok(Some(file))
            }
            Err(e)
                if !e.is_cancelled()
                    && !token.is_cancelled()
                    && self.state() == JobState::Processing =>
            {
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&[backend.name(), "error"])
                    .inc();
                self.fail(&e);
                Err(e)
            }
            Err(_) => Ok(self.finish_cancelled(backend.name())),
        }
    }

    fn finish_cancelled(&self, backend: &str) -> Option<ConvertedFile> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = JobState::Cancelled;
            inner.result = None;
        }
        metrics::CONVERSIONS_TOTAL
            .with_label_values(&[backend, "cancelled"])
            .inc();
        info!(job_id = %self.id, "Conversion of {} cancelled", self.name);
        None
    }

    fn fail(&self, err: &ConverterError) {
        error!(job_id = %self.id, "Conversion of {} failed: {}", self.name, err);
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = JobState::Error;
            inner.result = None;
            inner.error = Some(err.to_string());
        }
    }

    async fn convert_single(
        &self,
        backend: &Arc<dyn Backend>,
        to: &str,
        token: &CancellationToken,
    ) -> Result<ConvertedFile, ConverterError> {
        let input = ConversionInput::new(self.id.clone(), self.name.clone(), self.input.clone())
            .with_cancel(token.clone())
            .with_options(self.options.clone());
        let progress = Arc::clone(&self.progress);
        let reporter = ProgressReporter::new(move |p| advance(&progress, p));
        backend.convert(input, to, reporter).await
    }

    /// Expands the archive, converts every member on `backend` under a
    /// bounded sub-queue and packs the outputs into a new archive.
    ///
    /// Job progress is the mean of member progress. Any member failure or
    /// cancellation fails the whole archive.
    async fn convert_archive(
        &self,
        backend: &Arc<dyn Backend>,
        to: &str,
        token: &CancellationToken,
    ) -> Result<ConvertedFile, ConverterError> {
        let entries = self.codec.extract(&self.input)?;
        if entries.is_empty() {
            return Err(ConverterError::Archive(format!("{} contains no files", self.name)));
        }

        let count = entries.len();
        let tracker = MemberProgress::new(count, Arc::clone(&self.progress));
        let semaphore = Semaphore::new(self.max_parallel);
        debug!(job_id = %self.id, members = count, "Converting archive members");

        let members = entries.into_iter().enumerate().map(|(index, entry)| {
            let tracker = tracker.clone();
            let semaphore = &semaphore;
            async move {
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ConverterError::Cancelled),
                    permit = semaphore.acquire() => permit.map_err(|_| ConverterError::Cancelled)?,
                };

                let reporter = if backend.reports_progress() {
                    let tracker = tracker.clone();
                    ProgressReporter::new(move |p| tracker.set(index, p))
                } else {
                    ProgressReporter::noop()
                };

                let input = ConversionInput::new(
                    format!("{}-{}", self.id, index),
                    entry.name.clone(),
                    entry.data.clone(),
                )
                .with_cancel(token.child_token())
                .with_options(self.options.clone());
                let converted = backend.convert(input, to, reporter).await?;

                tracker.set(index, 100.0);
                Ok(ArchiveEntry::new(converted.name, converted.data))
            }
        });

        let mut converted = futures::future::try_join_all(members).await?;
        dedupe_names(&mut converted);
        let data = self.codec.create(&converted)?;
        Ok(ConvertedFile::new(
            format!("{}{}", file_stem(&self.name), ARCHIVE_FORMAT),
            ARCHIVE_FORMAT,
            data,
        ))
    }

    /// Cancels the job.
    ///
    /// A running job asks its backend to stop and ends without a result.
    /// A queued job is only marked so it never starts; no backend is touched.
    pub async fn cancel(&self) {
        let (running, token) = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.state == JobState::Processing {
                inner.state = JobState::Cancelled;
                inner.result = None;
                (true, inner.token.clone())
            } else if inner.queued {
                // stays queued so the pending run sees the cancelled token
                inner.state = JobState::Cancelled;
                inner.result = None;
                inner.error = None;
                (false, inner.token.clone())
            } else {
                debug!(job_id = %self.id, "Nothing to cancel");
                return;
            }
        };
        token.cancel();

        if running {
            info!(job_id = %self.id, "Cancelling conversion of {}", self.name);
            // archive members stop through the shared token
            if !self.is_archive() {
                if let Some(backend) = self.find_backend() {
                    backend.cancel(&self.id).await;
                }
            }
        } else {
            self.progress.send_replace(0.0);
            info!(job_id = %self.id, "Cancelled queued job {}", self.name);
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("from", &self.from)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ZipCodec;
    use crate::testing::fixtures;
    use crate::testing::MockBackend;
    use std::time::Duration;

    fn codec() -> Arc<dyn ArchiveCodec> {
        Arc::new(ZipCodec)
    }

    fn image_job(backend: &MockBackend, name: &str, to: &str) -> Job {
        let registry = BackendRegistry::new(vec![Arc::new(backend.clone())]);
        Job::new(name, Bytes::from_static(b"<svg/>"), to, &registry, codec())
    }

    async fn wait_for_state(job: &Job, state: JobState) {
        for _ in 0..200 {
            if job.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached {}", state);
    }

    #[tokio::test]
    async fn test_svg_to_png_single_invocation() {
        let backend = fixtures::image_backend();
        let job = image_job(&backend, "logo.svg", "png");

        let result = job.convert().await.unwrap().unwrap();

        assert_eq!(result.format, ".png");
        assert_eq!(result.name, "logo.png");
        assert_eq!(job.state(), JobState::Done);
        assert_eq!(job.progress(), 100.0);
        assert_eq!(backend.conversion_count().await, 1);
    }

    #[tokio::test]
    async fn test_name_extension_normalized() {
        let backend = fixtures::image_backend();
        let job = image_job(&backend, "Logo.SVG", ".PNG");
        assert_eq!(job.name(), "Logo.svg");
        assert_eq!(job.from(), ".svg");
        assert_eq!(job.to(), ".png");
    }

    #[tokio::test]
    async fn test_unsupported_target_fails() {
        let backend = fixtures::image_backend();
        let job = image_job(&backend, "logo.svg", ".mp3");

        let err = job.convert().await.unwrap_err();
        assert!(matches!(err, ConverterError::UnsupportedFormat { .. }));
        assert_eq!(job.state(), JobState::Error);
        assert!(job.error().is_some());
        assert_eq!(backend.conversion_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_then_retry_resets() {
        let backend = fixtures::image_backend();
        backend
            .set_next_error(ConverterError::conversion_failed("corrupt input", None))
            .await;
        let job = image_job(&backend, "logo.svg", ".png");

        assert!(job.convert().await.is_err());
        assert_eq!(job.state(), JobState::Error);
        assert_eq!(job.error().as_deref(), Some("Conversion failed: corrupt input"));

        assert!(job.convert().await.unwrap().is_some());
        assert_eq!(job.state(), JobState::Done);
        assert_eq!(job.error(), None);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_never_runs() {
        let backend = fixtures::image_backend();
        let job = image_job(&backend, "logo.svg", ".png");

        let token = job.enqueue();
        job.cancel().await;
        assert!(token.is_cancelled());
        assert_eq!(job.state(), JobState::Cancelled);

        assert_eq!(job.convert().await.unwrap(), None);
        assert_eq!(job.result(), None);
        assert_eq!(backend.conversion_count().await, 0);
        assert!(backend.recorded_cancels().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let backend = fixtures::image_backend().with_delay(Duration::from_secs(10));
        let job = Arc::new(image_job(&backend, "logo.svg", ".png"));

        let running = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.convert().await })
        };
        wait_for_state(&job, JobState::Processing).await;

        job.cancel().await;
        let outcome = running.await.unwrap().unwrap();

        assert_eq!(outcome, None);
        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(job.result(), None);
        assert_eq!(backend.recorded_cancels().await, vec![job.id().to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_drops_previous_result() {
        let backend = fixtures::image_backend();
        let job = image_job(&backend, "logo.svg", ".png");
        job.convert().await.unwrap().unwrap();

        job.enqueue();
        job.cancel().await;
        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(job.result(), None);
        assert_eq!(job.progress(), 0.0);

        assert_eq!(job.convert().await.unwrap(), None);
        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(job.result(), None);
        assert_eq!(backend.conversion_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_slow_backend_cancel_keeps_job_cancelled() {
        let backend = fixtures::image_backend()
            .with_delay(Duration::from_millis(100))
            .with_cancel_delay(Duration::from_millis(300))
            .ignoring_cancel();
        let job = Arc::new(image_job(&backend, "logo.svg", ".png"));

        let running = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.convert().await })
        };
        wait_for_state(&job, JobState::Processing).await;

        // the conversion finishes while the backend is still cancelling
        job.cancel().await;
        let outcome = running.await.unwrap().unwrap();

        assert_eq!(outcome, None);
        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(job.result(), None);
    }

    #[tokio::test]
    async fn test_cancel_idle_job_is_noop() {
        let backend = fixtures::image_backend();
        let job = image_job(&backend, "logo.svg", ".png");
        job.cancel().await;
        assert_eq!(job.state(), JobState::Idle);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let backend = fixtures::video_backend();
        let registry = BackendRegistry::new(vec![Arc::new(backend.clone())]);
        let job = Job::new("clip.mkv", Bytes::from_static(b"frames"), ".mp4", &registry, codec());

        let mut updates = job.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let collector = {
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                while updates.changed().await.is_ok() {
                    let value = *updates.borrow_and_update();
                    seen.lock().unwrap().push(value);
                    if value >= 100.0 {
                        break;
                    }
                }
            })
        };

        job.convert().await.unwrap();
        collector.await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(seen.last(), Some(&100.0));
    }

    #[tokio::test]
    async fn test_archive_members_converted_and_repacked() {
        let backend = fixtures::image_backend().with_progress(true);
        let data = fixtures::zip(&[("a.png", b"one"), ("b.png", b"two"), ("c.png", b"three")]);
        let job = Job::for_archive("shots.zip", data, ".jpg", Arc::new(backend.clone()), codec())
            .with_max_parallel(2);

        let result = job.convert().await.unwrap().unwrap();

        assert_eq!(result.name, "shots.zip");
        assert_eq!(result.format, ".zip");
        assert_eq!(job.progress(), 100.0);
        assert_eq!(backend.conversion_count().await, 3);
        assert!(backend.max_in_flight() <= 2);

        let mut names: Vec<String> = ZipCodec
            .extract(&result.data)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[tokio::test]
    async fn test_archive_member_cancellation_cancels_job() {
        let backend = fixtures::image_backend();
        backend.set_next_error(ConverterError::Cancelled).await;
        let data = fixtures::zip(&[("a.png", b"one")]);
        let job = Job::for_archive("shots.zip", data, ".jpg", Arc::new(backend), codec());

        assert_eq!(job.convert().await.unwrap(), None);
        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(job.result(), None);
    }

    #[tokio::test]
    async fn test_archive_member_name_clash_renamed() {
        let backend = fixtures::image_backend();
        let data = fixtures::zip(&[("a.png", b"one"), ("a.jpg", b"two")]);
        let job = Job::for_archive("shots.zip", data, ".webp", Arc::new(backend), codec());

        let result = job.convert().await.unwrap().unwrap();

        let names: Vec<String> = ZipCodec
            .extract(&result.data)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.webp", "a (1).webp"]);
    }

    #[tokio::test]
    async fn test_mixed_archive_job_fails_with_mixed_format() {
        let images = fixtures::image_backend();
        let audio = fixtures::audio_backend();
        let registry =
            BackendRegistry::new(vec![Arc::new(images.clone()), Arc::new(audio.clone())]);
        let data = fixtures::zip(&[("cover.png", b"img"), ("intro.wav", b"pcm")]);
        let job = Job::new("mixed.zip", data, ".jpg", &registry, codec());

        let err = job.convert().await.unwrap_err();

        match err {
            ConverterError::MixedFormatArchive { backends } => {
                assert_eq!(backends, vec!["ffmpeg", "imagemagick"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(job.state(), JobState::Error);
        assert_eq!(images.conversion_count().await, 0);
        assert_eq!(audio.conversion_count().await, 0);
    }

    #[tokio::test]
    async fn test_shared_backend_archive_via_new() {
        let images = fixtures::image_backend();
        let registry = BackendRegistry::new(vec![
            Arc::new(images.clone()),
            Arc::new(fixtures::audio_backend()),
        ]);
        let data = fixtures::zip(&[("a.png", b"one"), ("b.jpg", b"two")]);
        let job = Job::new("shots.zip", data, ".webp", &registry, codec());

        let backend = job.find_backend().map(|b| b.name().to_string());
        assert_eq!(backend.as_deref(), Some("imagemagick"));
        assert!(job.convert().await.unwrap().is_some());
        assert_eq!(images.conversion_count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_archive_fails() {
        let backend = fixtures::image_backend();
        let job = Job::for_archive("empty.zip", fixtures::zip(&[]), ".jpg", Arc::new(backend), codec());
        assert!(matches!(job.convert().await, Err(ConverterError::Archive(_))));
        assert_eq!(job.state(), JobState::Error);
    }
}
