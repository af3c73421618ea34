//! Message protocol between a local backend and its isolated engine worker.
//!
//! A worker announces `Ready`, answers `Load` with `Loaded`, then handles a
//! single `Convert` request, streaming `Progress` and ending with `Finished`
//! or `Error`. Workers are single use and terminated after the exchange.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::EngineTimeouts;
use super::error::ConverterError;
use super::readiness::Readiness;
use super::types::{ConversionInput, ProgressReporter};

/// Requests sent from the backend to a worker.
#[derive(Debug, Clone)]
pub enum EngineRequest {
    /// Hands the worker its engine assets.
    Load { assets: Bytes },
    Convert {
        name: String,
        from: String,
        to: String,
        data: Bytes,
        options: EngineOptions,
    },
}

/// Engine arguments resolved for one conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOptions {
    pub quality: Option<u8>,
    pub keep_metadata: bool,
}

/// Responses streamed from a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineResponse {
    Ready,
    Loaded,
    Progress { percent: f64 },
    Finished { output: Bytes, is_archive: bool },
    Error { message: String, kind: Option<String> },
}

impl EngineResponse {
    fn label(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Loaded => "loaded",
            Self::Progress { .. } => "progress",
            Self::Finished { .. } => "finished",
            Self::Error { .. } => "error",
        }
    }
}

/// Output of a completed worker exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub data: Bytes,
    pub is_archive: bool,
}

/// Backend side of a running worker.
pub struct WorkerHandle {
    requests: mpsc::Sender<EngineRequest>,
    responses: mpsc::Receiver<EngineResponse>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(
        requests: mpsc::Sender<EngineRequest>,
        responses: mpsc::Receiver<EngineResponse>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            requests,
            responses,
            task,
        }
    }

    pub async fn send(&self, request: EngineRequest) -> Result<(), ConverterError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ConverterError::conversion_failed("Engine worker exited", None))
    }

    pub async fn next(&mut self) -> Option<EngineResponse> {
        self.responses.recv().await
    }

    /// Waits for a specific non-progress message within `timeout`.
    ///
    /// An `Error` message fails immediately; progress messages are skipped.
    async fn wait_for(
        &mut self,
        expected: &'static str,
        timeout: Duration,
    ) -> Result<EngineResponse, ConverterError> {
        let wait = async {
            loop {
                match self.responses.recv().await {
                    Some(EngineResponse::Error { message, kind }) => {
                        return Err(ConverterError::engine_failure(message, kind));
                    }
                    Some(EngineResponse::Progress { .. }) => continue,
                    Some(response) if response.label() == expected => return Ok(response),
                    Some(other) => {
                        debug!("Ignoring unexpected {} message", other.label());
                    }
                    None => {
                        return Err(ConverterError::conversion_failed(
                            "Engine worker exited",
                            None,
                        ));
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ConverterError::timeout(expected, timeout))?
    }

    pub fn terminate(self) {
        self.task.abort();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns workers for one engine.
#[async_trait]
pub trait EngineRuntime: Send + Sync {
    /// Engine name for logs and errors.
    fn name(&self) -> &str;

    /// Verifies the engine can run and returns assets handed to each worker.
    async fn load_assets(&self) -> Result<Bytes, ConverterError>;

    /// Spawns a fresh single-use worker.
    fn spawn(&self) -> WorkerHandle;
}

/// Removes an active job entry when the conversion ends, however it ends.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<String, CancellationToken>>,
    job_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.job_id);
        }
    }
}

/// Drives the worker protocol on behalf of a local backend.
pub struct EngineDriver {
    runtime: Arc<dyn EngineRuntime>,
    timeouts: EngineTimeouts,
    readiness: Readiness,
    assets: tokio::sync::OnceCell<Bytes>,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl EngineDriver {
    pub fn new(
        runtime: Arc<dyn EngineRuntime>,
        timeouts: EngineTimeouts,
        readiness_timeout: Duration,
    ) -> Self {
        let readiness = Readiness::new(runtime.name().to_string(), readiness_timeout);
        Self {
            runtime,
            timeouts,
            readiness,
            assets: tokio::sync::OnceCell::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Loads engine assets once and marks the backend ready or errored.
    pub async fn preload(&self) {
        self.readiness.mark_downloading();
        match self.assets().await {
            Ok(_) => self.readiness.mark_ready(),
            Err(e) => {
                warn!(backend = %self.runtime.name(), "Engine failed to load: {}", e);
                self.readiness.mark_error();
            }
        }
    }

    async fn assets(&self) -> Result<Bytes, ConverterError> {
        self.assets
            .get_or_try_init(|| self.runtime.load_assets())
            .await
            .cloned()
    }

    /// Number of conversions currently registered.
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Runs one conversion on a fresh worker.
    pub async fn run(
        &self,
        input: &ConversionInput,
        to: &str,
        options: EngineOptions,
        progress: &ProgressReporter,
    ) -> Result<EngineOutput, ConverterError> {
        let token = input.cancel.child_token();
        if let Ok(mut active) = self.active.lock() {
            active.insert(input.job_id.clone(), token.clone());
        }
        let _guard = ActiveGuard {
            active: &self.active,
            job_id: input.job_id.clone(),
        };

        let assets = self.assets().await?;
        let mut worker = self.runtime.spawn();

        let exchange = async {
            worker.wait_for("ready", self.timeouts.handshake).await?;
            worker.send(EngineRequest::Load { assets }).await?;
            worker.wait_for("loaded", self.timeouts.load).await?;
            worker
                .send(EngineRequest::Convert {
                    name: input.name.clone(),
                    from: input.from.clone(),
                    to: to.to_string(),
                    data: input.data.clone(),
                    options,
                })
                .await?;

            let converting = async {
                loop {
                    match worker.next().await {
                        Some(EngineResponse::Progress { percent }) => progress.report(percent),
                        Some(EngineResponse::Finished { output, is_archive }) => {
                            return Ok(EngineOutput {
                                data: output,
                                is_archive,
                            });
                        }
                        Some(EngineResponse::Error { message, kind }) => {
                            return Err(ConverterError::engine_failure(message, kind));
                        }
                        Some(other) => debug!("Ignoring unexpected {} message", other.label()),
                        None => {
                            return Err(ConverterError::conversion_failed(
                                "Engine worker exited before finishing",
                                None,
                            ));
                        }
                    }
                }
            };
            tokio::time::timeout(self.timeouts.conversion, converting)
                .await
                .map_err(|_| ConverterError::timeout("conversion", self.timeouts.conversion))?
        };

        let result = tokio::select! {
            _ = token.cancelled() => Err(ConverterError::Cancelled),
            result = exchange => result,
        };
        worker.terminate();
        result
    }

    /// Cancels the conversion registered under `job_id`.
    pub fn cancel(&self, job_id: &str) {
        let token = self
            .active
            .lock()
            .ok()
            .and_then(|mut active| active.remove(job_id));
        match token {
            Some(token) => {
                debug!(job_id = %job_id, backend = %self.runtime.name(), "Cancelling conversion");
                token.cancel();
            }
            None => warn!(
                job_id = %job_id,
                backend = %self.runtime.name(),
                "No active conversion to cancel"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Worker behavior scripted per test.
    #[derive(Clone)]
    enum Script {
        Complete,
        Silent,
        FailLoad,
        Hang,
    }

    struct ScriptedRuntime {
        script: Script,
        spawned: Arc<AtomicUsize>,
        fail_assets: bool,
    }

    impl ScriptedRuntime {
        fn new(script: Script) -> Self {
            Self {
                script,
                spawned: Arc::new(AtomicUsize::new(0)),
                fail_assets: false,
            }
        }
    }

    #[async_trait]
    impl EngineRuntime for ScriptedRuntime {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn load_assets(&self) -> Result<Bytes, ConverterError> {
            if self.fail_assets {
                Err(ConverterError::conversion_failed("missing wasm", None))
            } else {
                Ok(Bytes::from_static(b"assets"))
            }
        }

        fn spawn(&self) -> WorkerHandle {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let (req_tx, mut req_rx) = mpsc::channel(4);
            let (resp_tx, resp_rx) = mpsc::channel(16);
            let script = self.script.clone();
            let task = tokio::spawn(async move {
                if matches!(script, Script::Silent) {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    return;
                }
                let _ = resp_tx.send(EngineResponse::Ready).await;
                while let Some(request) = req_rx.recv().await {
                    match request {
                        EngineRequest::Load { .. } => {
                            if matches!(script, Script::FailLoad) {
                                let _ = resp_tx
                                    .send(EngineResponse::Error {
                                        message: "corrupt module".to_string(),
                                        kind: Some("load".to_string()),
                                    })
                                    .await;
                                return;
                            }
                            let _ = resp_tx.send(EngineResponse::Loaded).await;
                        }
                        EngineRequest::Convert { data, .. } => {
                            if matches!(script, Script::Hang) {
                                tokio::time::sleep(Duration::from_secs(60)).await;
                            }
                            let _ = resp_tx
                                .send(EngineResponse::Progress { percent: 50.0 })
                                .await;
                            let _ = resp_tx
                                .send(EngineResponse::Finished {
                                    output: data,
                                    is_archive: false,
                                })
                                .await;
                        }
                    }
                }
            });
            WorkerHandle::new(req_tx, resp_rx, task)
        }
    }

    fn timeouts() -> EngineTimeouts {
        EngineTimeouts {
            handshake: Duration::from_millis(100),
            load: Duration::from_millis(100),
            conversion: Duration::from_secs(5),
        }
    }

    fn input() -> ConversionInput {
        ConversionInput::new("job-1", "a.png", Bytes::from_static(b"pixels"))
    }

    #[tokio::test]
    async fn test_full_exchange() {
        let runtime = Arc::new(ScriptedRuntime::new(Script::Complete));
        let spawned = Arc::clone(&runtime.spawned);
        let driver = EngineDriver::new(runtime, timeouts(), Duration::from_secs(30));
        driver.preload().await;
        assert!(driver.readiness().is_ready());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |p| sink.lock().unwrap().push(p));

        let output = driver
            .run(&input(), ".jpg", EngineOptions::default(), &reporter)
            .await
            .unwrap();
        assert_eq!(output.data, Bytes::from_static(b"pixels"));
        assert_eq!(*seen.lock().unwrap(), vec![50.0]);
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert_eq!(driver.active_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let driver = EngineDriver::new(
            Arc::new(ScriptedRuntime::new(Script::Silent)),
            timeouts(),
            Duration::from_secs(30),
        );
        let err = driver
            .run(&input(), ".jpg", EngineOptions::default(), &ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, ConverterError::ProtocolTimeout { ref stage, .. } if stage == "ready"));
    }

    #[tokio::test]
    async fn test_load_error_surfaces_kind() {
        let driver = EngineDriver::new(
            Arc::new(ScriptedRuntime::new(Script::FailLoad)),
            timeouts(),
            Duration::from_secs(30),
        );
        let err = driver
            .run(&input(), ".jpg", EngineOptions::default(), &ProgressReporter::noop())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some("load"));
    }

    #[tokio::test]
    async fn test_cancel_terminates_worker() {
        let driver = Arc::new(EngineDriver::new(
            Arc::new(ScriptedRuntime::new(Script::Hang)),
            timeouts(),
            Duration::from_secs(30),
        ));

        let running = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move {
                driver
                    .run(&input(), ".jpg", EngineOptions::default(), &ProgressReporter::noop())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(driver.active_count(), 1);
        driver.cancel("job-1");

        let err = running.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(driver.active_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_assets_mark_error() {
        let mut runtime = ScriptedRuntime::new(Script::Complete);
        runtime.fail_assets = true;
        let driver = EngineDriver::new(Arc::new(runtime), timeouts(), Duration::from_secs(30));
        driver.preload().await;
        assert_eq!(
            driver.readiness().status(),
            crate::converter::BackendStatus::Error
        );
    }
}
