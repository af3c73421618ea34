//! Orchestrator lifecycle integration tests.
//!
//! These tests drive batches through the orchestrator with mock backends:
//! add -> convert_all -> (cancel) -> download

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use vert_core::{
    testing::{fixtures, MemorySink, MockBackend},
    ArchiveCodec, BackendRegistry, ConverterError, DirectorySink, JobState, Orchestrator,
    OrchestratorConfig, ZipCodec,
};

/// Test helper holding the mocks behind an orchestrator.
struct TestHarness {
    images: MockBackend,
    audio: MockBackend,
    orchestrator: Arc<Orchestrator>,
}

impl TestHarness {
    fn new(max_parallel: usize) -> Self {
        Self::with_backends(fixtures::image_backend(), fixtures::audio_backend(), max_parallel)
    }

    fn with_backends(images: MockBackend, audio: MockBackend, max_parallel: usize) -> Self {
        let registry = BackendRegistry::new(vec![
            Arc::new(images.clone()),
            Arc::new(audio.clone()),
            Arc::new(fixtures::video_backend()),
        ]);
        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            Arc::new(ZipCodec),
            OrchestratorConfig::default().with_max_parallel(max_parallel),
        );
        Self {
            images,
            audio,
            orchestrator: Arc::new(orchestrator),
        }
    }

    async fn add(&self, name: &str, to: &str) -> String {
        let ids = self
            .orchestrator
            .add(name, Bytes::from(name.as_bytes().to_vec()), Some(to))
            .await
            .expect("add should succeed");
        assert_eq!(ids.len(), 1);
        ids.into_iter().next().unwrap()
    }

    async fn wait_for_state(&self, id: &str, state: JobState) {
        let job = self.orchestrator.job(id).await.expect("job exists");
        tokio::time::timeout(Duration::from_secs(5), async {
            while job.state() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {} never reached {}", id, state));
    }
}

#[tokio::test]
async fn test_svg_to_png_end_to_end() {
    let harness = TestHarness::new(4);
    let id = harness.add("logo.svg", ".png").await;

    let summary = harness.orchestrator.convert_all().await;

    assert_eq!(summary.done, 1);
    assert_eq!(harness.orchestrator.jobs().await.len(), 1);
    assert_eq!(harness.images.conversion_count().await, 1);

    let job = harness.orchestrator.job(&id).await.unwrap();
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(job.progress(), 100.0);
    let result = job.result().unwrap();
    assert_eq!(result.format, ".png");
    assert_eq!(result.name, "logo.png");
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let images = fixtures::image_backend().with_delay(Duration::from_millis(40));
    let harness = TestHarness::with_backends(images, fixtures::audio_backend(), 2);
    for i in 0..6 {
        harness.add(&format!("shot-{}.png", i), ".webp").await;
    }

    let summary = harness.orchestrator.convert_all().await;

    assert_eq!(summary.done, 6);
    assert!(harness.images.max_in_flight() <= 2);
    assert!(harness.images.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_cancel_queued_job_never_reaches_backend() {
    let images = fixtures::image_backend().with_delay(Duration::from_millis(200));
    let harness = TestHarness::with_backends(images, fixtures::audio_backend(), 1);
    let first = harness.add("a.png", ".jpg").await;
    harness.add("b.png", ".jpg").await;
    let third = harness.add("c.png", ".jpg").await;

    let run = {
        let orchestrator = Arc::clone(&harness.orchestrator);
        tokio::spawn(async move { orchestrator.convert_all().await })
    };
    harness.wait_for_state(&first, JobState::Processing).await;
    harness.orchestrator.cancel(&third).await.unwrap();

    let summary = run.await.unwrap();
    assert_eq!(summary.done, 2);
    assert_eq!(summary.cancelled, 1);

    let job = harness.orchestrator.job(&third).await.unwrap();
    assert_eq!(job.state(), JobState::Cancelled);
    assert_eq!(job.result(), None);
    let converted: Vec<String> = harness
        .images
        .recorded_conversions()
        .await
        .into_iter()
        .map(|c| c.job_id)
        .collect();
    assert_eq!(converted.len(), 2);
    assert!(!converted.contains(&third));
    assert!(harness.images.recorded_cancels().await.is_empty());
}

#[tokio::test]
async fn test_cancel_all_stops_running_and_queued() {
    let images = fixtures::image_backend().with_delay(Duration::from_secs(30));
    let harness = TestHarness::with_backends(images, fixtures::audio_backend(), 1);
    let first = harness.add("a.png", ".jpg").await;
    harness.add("b.png", ".jpg").await;

    let run = {
        let orchestrator = Arc::clone(&harness.orchestrator);
        tokio::spawn(async move { orchestrator.convert_all().await })
    };
    harness.wait_for_state(&first, JobState::Processing).await;
    harness.orchestrator.cancel_all().await;

    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("batch should stop after cancel_all")
        .unwrap();
    assert_eq!(summary.cancelled, 2);
    assert_eq!(harness.images.conversion_count().await, 1);
    assert_eq!(harness.images.recorded_cancels().await, vec![first]);
    assert!(!harness.orchestrator.results().await);
}

#[tokio::test]
async fn test_failure_does_not_stop_batch() {
    let harness = TestHarness::new(1);
    harness
        .audio
        .set_next_error(ConverterError::conversion_failed("bad header", None))
        .await;
    let failed = harness.add("broken.wav", ".mp3").await;
    harness.add("a.png", ".jpg").await;
    harness.add("song.flac", ".wav").await;

    let summary = harness.orchestrator.convert_all().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.done, 2);
    let status = harness.orchestrator.status().await;
    let broken = status.jobs.iter().find(|j| j.id == failed).unwrap();
    assert_eq!(broken.state, JobState::Error);
    assert_eq!(broken.error.as_deref(), Some("Conversion failed: bad header"));
}

#[tokio::test]
async fn test_download_all_skips_jobs_without_results() {
    let harness = TestHarness::new(4);
    harness.add("a.png", ".jpg").await;
    harness.add("b.wav", ".flac").await;
    // no backend writes mp3 from png
    harness.add("c.png", ".mp3").await;

    let summary = harness.orchestrator.convert_all().await;
    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed, 1);

    let sink = MemorySink::new();
    let name = harness.orchestrator.download_all(&sink).await.unwrap();
    assert_eq!(name, "VERT_Multi.zip");

    let archive = sink.get(&name).await.unwrap();
    let entries = ZipCodec.extract(&archive).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.jpg", "b.flac"]);
    assert_eq!(entries[0].data, Bytes::from_static(b"a.png"));
}

#[tokio::test]
async fn test_archive_kept_whole_when_one_backend_fits() {
    let harness = TestHarness::new(4);
    let data = fixtures::zip(&[("a.png", b"one"), ("b.jpg", b"two")]);
    let ids = harness
        .orchestrator
        .add("Shots.ZIP", data, Some(".webp"))
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let summary = harness.orchestrator.convert_all().await;
    assert_eq!(summary.done, 1);
    assert_eq!(harness.images.conversion_count().await, 2);

    let job = harness.orchestrator.job(&ids[0]).await.unwrap();
    let result = job.result().unwrap();
    assert_eq!(result.name, "Shots.zip");
    let members = ZipCodec.extract(&result.data).unwrap();
    let names: Vec<&str> = members.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.webp", "b.webp"]);
}

#[tokio::test]
async fn test_mixed_archive_expanded_into_jobs() {
    let harness = TestHarness::new(4);
    let data = fixtures::zip(&[("cover.png", b"img"), ("intro.wav", b"pcm")]);
    let ids = harness.orchestrator.add("album.zip", data, None).await.unwrap();
    assert_eq!(ids.len(), 2);

    let summary = harness.orchestrator.convert_all().await;
    assert_eq!(summary.done, 2);
    assert_eq!(harness.images.conversion_count().await, 1);
    assert_eq!(harness.audio.conversion_count().await, 1);

    let targets: Vec<String> = harness
        .orchestrator
        .status()
        .await
        .jobs
        .into_iter()
        .map(|j| j.to)
        .collect();
    assert_eq!(targets, vec![".jpg", ".mp3"]);
}

#[tokio::test]
async fn test_download_all_to_directory() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let harness = TestHarness::new(2);
    harness.add("a.png", ".jpg").await;
    harness.orchestrator.convert_all().await;

    let sink = DirectorySink::new(temp_dir.path().join("out"));
    let name = harness.orchestrator.download_all(&sink).await.unwrap();

    let written = std::fs::read(temp_dir.path().join("out").join(&name)).unwrap();
    let entries = ZipCodec.extract(&written).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "a.jpg");
}

#[tokio::test]
async fn test_reconvert_after_target_change() {
    let harness = TestHarness::new(2);
    let id = harness.add("a.png", ".jpg").await;
    harness.orchestrator.convert_all().await;

    harness.orchestrator.set_target(&id, "WEBP").await.unwrap();
    let result = harness.orchestrator.convert(&id).await.unwrap().unwrap();

    assert_eq!(result.format, ".webp");
    assert_eq!(harness.images.conversion_count().await, 2);
}

#[tokio::test]
async fn test_download_all_renames_clashing_outputs() {
    let harness = TestHarness::new(2);
    harness.add("photo.png", ".webp").await;
    harness.add("photo.jpg", ".webp").await;

    let summary = harness.orchestrator.convert_all().await;
    assert_eq!(summary.done, 2);

    let sink = MemorySink::new();
    let name = harness.orchestrator.download_all(&sink).await.unwrap();

    let entries = ZipCodec.extract(&sink.get(&name).await.unwrap()).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["photo.webp", "photo (1).webp"]);
    assert_eq!(entries[1].data, Bytes::from_static(b"photo.jpg"));
}

#[tokio::test]
async fn test_cancelled_rerun_leaves_no_stale_result() {
    let harness = TestHarness::new(1);
    let first = harness.add("a.png", ".jpg").await;
    let second = harness.add("b.png", ".jpg").await;
    assert_eq!(harness.orchestrator.convert_all().await.done, 2);

    harness.images.set_delay(Duration::from_millis(200)).await;
    let run = {
        let orchestrator = Arc::clone(&harness.orchestrator);
        tokio::spawn(async move { orchestrator.convert_all().await })
    };
    harness.wait_for_state(&first, JobState::Processing).await;
    harness.orchestrator.cancel(&second).await.unwrap();

    let summary = run.await.unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(summary.cancelled, 1);
    assert!(!harness.orchestrator.results().await);

    let job = harness.orchestrator.job(&second).await.unwrap();
    assert_eq!(job.result(), None);

    let sink = MemorySink::new();
    let name = harness.orchestrator.download_all(&sink).await.unwrap();
    let entries = ZipCodec.extract(&sink.get(&name).await.unwrap()).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.jpg"]);
}
