//! Batch orchestrator implementation.
//!
//! Holds the submitted jobs and runs them through one bounded queue:
//! - Routing: archives stay whole when one backend handles every member
//! - Conversion: at most `parallelism()` jobs in flight, admitted in order
//! - Download: single results or every result packed into one archive

use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::archive::{dedupe_names, ArchiveCodec, ArchiveEntry, ARCHIVE_FORMAT};
use crate::converter::{
    file_stem, format_of, normalize_format, BackendRegistry, ConvertOptions, ConvertedFile,
    ConverterError,
};
use crate::job::{normalize_file_name, Job, JobState, JobStatus};

use super::config::OrchestratorConfig;
use super::sink::DownloadSink;
use super::types::{BatchSummary, OrchestratorError, OrchestratorStatus};

/// Name substituted for `%name%` when downloading several files at once.
const BATCH_NAME: &str = "Multi";

/// Expands a download name template.
///
/// `%date%` becomes a filesystem-safe UTC timestamp.
pub fn format_filename(template: &str, name: &str, extension: &str) -> String {
    let date = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    template
        .replace("%date%", &date)
        .replace("%name%", name)
        .replace("%extension%", extension.trim_start_matches('.'))
}

/// The batch orchestrator: owns the jobs and bounds concurrent conversions.
pub struct Orchestrator {
    registry: Arc<BackendRegistry>,
    codec: Arc<dyn ArchiveCodec>,
    config: OrchestratorConfig,
    options: ConvertOptions,
    jobs: RwLock<Vec<Arc<Job>>>,
    queue: Arc<Semaphore>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        registry: Arc<BackendRegistry>,
        codec: Arc<dyn ArchiveCodec>,
        config: OrchestratorConfig,
    ) -> Self {
        let queue = Arc::new(Semaphore::new(config.parallelism()));
        Self {
            registry,
            codec,
            config,
            options: ConvertOptions::default(),
            jobs: RwLock::new(Vec::new()),
            queue,
        }
    }

    /// Engine options applied to jobs added afterwards.
    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Preloads every registered backend.
    pub async fn preload(&self) {
        self.registry.preload_all().await;
    }

    /// Adds a file, returning the ids of the jobs created for it.
    ///
    /// Archives whose members all resolve to one backend become a single
    /// job; other archives are expanded into one job per member. `to`
    /// defaults to the first other writable format of the chosen backend.
    pub async fn add(
        &self,
        name: &str,
        data: Bytes,
        to: Option<&str>,
    ) -> Result<Vec<String>, OrchestratorError> {
        let planned = self.plan(name, data, to)?;
        let ids: Vec<String> = planned.iter().map(|job| job.id().to_string()).collect();
        self.jobs
            .write()
            .await
            .extend(planned.into_iter().map(Arc::new));
        Ok(ids)
    }

    fn plan(&self, name: &str, data: Bytes, to: Option<&str>) -> Result<Vec<Job>, OrchestratorError> {
        let name = normalize_file_name(name);
        let from = format_of(&name);

        if !self.codec.is_archive(&from) {
            let to = to
                .map(normalize_format)
                .or_else(|| self.registry.default_target(&from))
                .unwrap_or_default();
            debug!("Adding {} as {} -> {}", name, from, to);
            let job = Job::new(&name, data, &to, &self.registry, Arc::clone(&self.codec))
                .with_options(self.options.clone());
            return Ok(vec![job]);
        }

        let entries = self.codec.extract(&data)?;
        if entries.is_empty() {
            return Err(ConverterError::Archive(format!("{} contains no files", name)).into());
        }
        let formats: Vec<String> = entries.iter().map(|e| e.format()).collect();

        match self.registry.resolve_archive(formats.iter().map(String::as_str)) {
            Ok(backend) => {
                let to = to
                    .map(normalize_format)
                    .or_else(|| self.registry.default_target(&formats[0]))
                    .unwrap_or_default();
                info!(
                    backend = %backend.name(),
                    "Keeping archive {} ({} files) as one job",
                    name,
                    entries.len()
                );
                let job = Job::for_archive(&name, data, &to, backend, Arc::clone(&self.codec))
                    .with_options(self.options.clone())
                    .with_max_parallel(self.config.parallelism());
                Ok(vec![job])
            }
            Err(e) => {
                info!("Expanding archive {}: {}", name, e);
                let mut jobs = Vec::with_capacity(entries.len());
                for entry in entries {
                    jobs.extend(self.plan(&entry.name, entry.data, to)?);
                }
                Ok(jobs)
            }
        }
    }

    pub async fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs.read().await.clone()
    }

    pub async fn job(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().await.iter().find(|j| j.id() == id).cloned()
    }

    async fn require(&self, id: &str) -> Result<Arc<Job>, OrchestratorError> {
        self.job(id)
            .await
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))
    }

    /// Changes the target format of a job for its next run.
    pub async fn set_target(&self, id: &str, to: &str) -> Result<(), OrchestratorError> {
        self.require(id).await?.set_to(to);
        Ok(())
    }

    /// Converts every job through the shared queue.
    ///
    /// Jobs are admitted in submission order and complete in any order.
    /// A failed job does not stop the others.
    pub async fn convert_all(&self) -> BatchSummary {
        let jobs = self.jobs().await;
        info!(
            jobs = jobs.len(),
            max_parallel = self.config.parallelism(),
            "Converting all jobs"
        );

        let runs = jobs.into_iter().map(|job| {
            let token = job.enqueue();
            let queue = Arc::clone(&self.queue);
            async move {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = queue.acquire_owned() => permit.ok(),
                };
                // a job cancelled while queued returns at once
                let outcome = job.convert().await;
                drop(permit);
                outcome
            }
        });

        let mut summary = BatchSummary::default();
        for outcome in futures::future::join_all(runs).await {
            match outcome {
                Ok(Some(_)) => summary.done += 1,
                Ok(None) => summary.cancelled += 1,
                Err(_) => summary.failed += 1,
            }
        }
        info!(
            done = summary.done,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Batch finished"
        );
        summary
    }

    /// Converts one job, waiting for a queue slot like `convert_all` does.
    pub async fn convert(&self, id: &str) -> Result<Option<ConvertedFile>, OrchestratorError> {
        let job = self.require(id).await?;
        let token = job.enqueue();
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&self.queue).acquire_owned() => permit.ok(),
        };
        let outcome = job.convert().await;
        drop(permit);
        Ok(outcome?)
    }

    pub async fn cancel(&self, id: &str) -> Result<(), OrchestratorError> {
        self.require(id).await?.cancel().await;
        Ok(())
    }

    pub async fn cancel_all(&self) {
        let jobs = self.jobs().await;
        info!(jobs = jobs.len(), "Cancelling all jobs");
        futures::future::join_all(jobs.iter().map(|job| job.cancel())).await;
    }

    /// Cancels and drops a job.
    pub async fn remove(&self, id: &str) -> Result<(), OrchestratorError> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let index = jobs
                .iter()
                .position(|j| j.id() == id)
                .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))?;
            jobs.remove(index)
        };
        job.cancel().await;
        Ok(())
    }

    /// Cancels and drops every job.
    pub async fn clear(&self) {
        let jobs = std::mem::take(&mut *self.jobs.write().await);
        futures::future::join_all(jobs.iter().map(|job| job.cancel())).await;
    }

    /// Names of the backends the current jobs would run on.
    pub async fn required_backends(&self) -> Vec<String> {
        self.jobs
            .read()
            .await
            .iter()
            .filter_map(|job| job.find_backend())
            .map(|b| b.name().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether the batch can start: there are jobs, each has a ready
    /// backend and none is converting.
    pub async fn ready(&self) -> bool {
        let jobs = self.jobs.read().await;
        !jobs.is_empty()
            && jobs.iter().all(|job| {
                job.state() != JobState::Processing
                    && job
                        .find_backend()
                        .map(|b| b.readiness().is_ready())
                        .unwrap_or(false)
            })
    }

    /// Whether every job has a result.
    pub async fn results(&self) -> bool {
        let jobs = self.jobs.read().await;
        !jobs.is_empty() && jobs.iter().all(|job| job.result().is_some())
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let jobs: Vec<JobStatus> = self.jobs.read().await.iter().map(|j| j.status()).collect();
        OrchestratorStatus {
            jobs,
            backends: self.registry.statuses(),
            ready: self.ready().await,
            results: self.results().await,
            max_parallel: self.config.parallelism(),
        }
    }

    /// Writes one job's result, named by the filename template.
    pub async fn download(
        &self,
        id: &str,
        sink: &dyn DownloadSink,
    ) -> Result<String, OrchestratorError> {
        let job = self.require(id).await?;
        let result = job
            .result()
            .ok_or_else(|| OrchestratorError::NotDone(id.to_string()))?;

        let name = format!(
            "{}{}",
            format_filename(&self.config.filename_format, &file_stem(job.name()), job.from()),
            result.format
        );
        sink.write(&name, result.data).await?;
        info!(job_id = %id, "Downloaded {}", name);
        Ok(name)
    }

    /// Packs every result into one archive and writes it.
    ///
    /// Jobs without a result are logged and left out. Fails only when there
    /// are no jobs or no results at all.
    pub async fn download_all(&self, sink: &dyn DownloadSink) -> Result<String, OrchestratorError> {
        let jobs = self.jobs().await;
        if jobs.is_empty() {
            return Err(OrchestratorError::NoJobs);
        }

        let mut entries = Vec::with_capacity(jobs.len());
        for job in &jobs {
            match job.result() {
                Some(result) => entries.push(ArchiveEntry::new(
                    format!("{}{}", file_stem(job.name()), result.format),
                    result.data,
                )),
                None => error!(job_id = %job.id(), "{} has no result, skipping", job.name()),
            }
        }
        if entries.is_empty() {
            return Err(OrchestratorError::NoResults);
        }
        if entries.len() < jobs.len() {
            warn!("Downloading {} of {} files", entries.len(), jobs.len());
        }

        dedupe_names(&mut entries);
        let data = self.codec.create(&entries)?;
        let name = format!(
            "{}{}",
            format_filename(&self.config.filename_format, BATCH_NAME, ""),
            ARCHIVE_FORMAT
        );
        sink.write(&name, data).await?;
        info!(files = entries.len(), "Downloaded {}", name);
        Ok(name)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ZipCodec;
    use crate::testing::{fixtures, MemorySink};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(fixtures::registry()),
            Arc::new(ZipCodec),
            OrchestratorConfig::default().with_max_parallel(2),
        )
    }

    #[test]
    fn test_format_filename() {
        assert_eq!(format_filename("VERT_%name%", "song", ".flac"), "VERT_song");
        assert_eq!(format_filename("%name%.%extension%", "song", ".flac"), "song.flac");
        let dated = format_filename("%name%-%date%", "a", "");
        assert!(dated.starts_with("a-20"));
        assert!(!dated.contains(':'));
    }

    #[tokio::test]
    async fn test_add_defaults_target() {
        let orchestrator = orchestrator();
        let ids = orchestrator
            .add("Song.FLAC", Bytes::from_static(b"fLaC"), None)
            .await
            .unwrap();

        let job = orchestrator.job(&ids[0]).await.unwrap();
        assert_eq!(job.name(), "Song.flac");
        assert_eq!(job.to(), ".mp3");
        assert_eq!(job.find_backend().unwrap().name(), "ffmpeg");
    }

    #[tokio::test]
    async fn test_add_unified_archive_is_one_job() {
        let orchestrator = orchestrator();
        let data = fixtures::zip(&[("a.png", b"1"), ("b.jpg", b"2")]);

        let ids = orchestrator.add("pics.zip", data, Some("webp")).await.unwrap();

        assert_eq!(ids.len(), 1);
        let job = orchestrator.job(&ids[0]).await.unwrap();
        assert!(job.is_archive());
        assert_eq!(job.to(), ".webp");
        assert_eq!(orchestrator.required_backends().await, vec!["imagemagick"]);
    }

    #[tokio::test]
    async fn test_add_mixed_archive_is_expanded() {
        let orchestrator = orchestrator();
        let data = fixtures::zip(&[("a.png", b"1"), ("b.wav", b"2")]);

        let ids = orchestrator.add("mixed.zip", data, None).await.unwrap();

        assert_eq!(ids.len(), 2);
        let names: Vec<String> = orchestrator
            .jobs()
            .await
            .iter()
            .map(|j| j.name().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.wav"]);
        assert_eq!(
            orchestrator.required_backends().await,
            vec!["ffmpeg", "imagemagick"]
        );
    }

    #[tokio::test]
    async fn test_add_empty_archive_fails() {
        let orchestrator = orchestrator();
        let err = orchestrator
            .add("empty.zip", fixtures::zip(&[]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Converter(ConverterError::Archive(_))));
        assert!(orchestrator.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let orchestrator = orchestrator();
        assert!(matches!(
            orchestrator.cancel("missing").await,
            Err(OrchestratorError::JobNotFound(_))
        ));
        assert!(matches!(
            orchestrator.remove("missing").await,
            Err(OrchestratorError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ready_and_results() {
        let orchestrator = orchestrator();
        assert!(!orchestrator.ready().await);
        assert!(!orchestrator.results().await);

        orchestrator
            .add("a.png", Bytes::from_static(b"1"), Some(".jpg"))
            .await
            .unwrap();
        assert!(orchestrator.ready().await);
        assert!(!orchestrator.results().await);

        let summary = orchestrator.convert_all().await;
        assert_eq!(summary.done, 1);
        assert!(orchestrator.results().await);
    }

    #[tokio::test]
    async fn test_download_all_requires_jobs() {
        let orchestrator = orchestrator();
        let sink = MemorySink::new();
        assert!(matches!(
            orchestrator.download_all(&sink).await,
            Err(OrchestratorError::NoJobs)
        ));

        orchestrator
            .add("a.png", Bytes::from_static(b"1"), Some(".jpg"))
            .await
            .unwrap();
        assert!(matches!(
            orchestrator.download_all(&sink).await,
            Err(OrchestratorError::NoResults)
        ));
    }

    #[tokio::test]
    async fn test_download_single_uses_template() {
        let orchestrator = orchestrator();
        let ids = orchestrator
            .add("track.wav", Bytes::from_static(b"RIFF"), Some(".flac"))
            .await
            .unwrap();
        let sink = MemorySink::new();

        assert!(matches!(
            orchestrator.download(&ids[0], &sink).await,
            Err(OrchestratorError::NotDone(_))
        ));

        orchestrator.convert(&ids[0]).await.unwrap();
        let name = orchestrator.download(&ids[0], &sink).await.unwrap();

        assert_eq!(name, "VERT_track.flac");
        assert_eq!(sink.get("VERT_track.flac").await, Some(Bytes::from_static(b"RIFF")));
    }

    #[tokio::test]
    async fn test_clear_drops_jobs() {
        let orchestrator = orchestrator();
        orchestrator
            .add("a.png", Bytes::from_static(b"1"), None)
            .await
            .unwrap();
        orchestrator.clear().await;
        assert!(orchestrator.jobs().await.is_empty());
        assert!(orchestrator.status().await.jobs.is_empty());
    }
}
