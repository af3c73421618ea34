//! Engine runtime that runs a command-line tool as the isolated worker.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use super::engine::{EngineOptions, EngineRequest, EngineResponse, EngineRuntime, WorkerHandle};
use super::error::ConverterError;
use crate::archive::{ArchiveCodec, ArchiveEntry, ZipCodec};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Stateful parser turning tool output lines into percentages.
pub type ProgressParser = Box<dyn FnMut(&str) -> Option<f64> + Send>;

/// How to invoke one command-line engine.
pub trait ToolCommand: Send + Sync + 'static {
    /// Engine name.
    fn engine(&self) -> &str;

    /// Path to the binary.
    fn program(&self) -> &Path;

    /// Arguments that make the binary print its version and exit.
    fn version_args(&self) -> Vec<String> {
        vec!["-version".to_string()]
    }

    /// Arguments converting `input` into `output`.
    fn args(&self, input: &Path, output: &Path, to: &str, options: &EngineOptions) -> Vec<String>;

    /// Where the tool actually writes the output for `to`.
    fn output_path(&self, output: &Path, _to: &str) -> PathBuf {
        output.to_path_buf()
    }

    /// Parser for progress lines on stderr, if the tool reports any.
    fn progress_parser(&self) -> Option<ProgressParser> {
        None
    }

    /// Maps a failed run to an error kind.
    fn failure_kind(&self, _exit_code: Option<i32>, _stderr: &str) -> Option<String> {
        None
    }
}

/// Scratch directory removed when the worker finishes or is aborted.
struct Scratch(PathBuf);

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Runs a [`ToolCommand`] in a child process per conversion.
pub struct ProcessRuntime<T: ToolCommand> {
    tool: Arc<T>,
    temp_dir: PathBuf,
}

impl<T: ToolCommand> ProcessRuntime<T> {
    pub fn new(tool: T, temp_dir: PathBuf) -> Self {
        Self {
            tool: Arc::new(tool),
            temp_dir,
        }
    }

    fn not_found(tool: &T, e: std::io::Error) -> ConverterError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConverterError::EngineNotFound {
                engine: tool.engine().to_string(),
                path: tool.program().to_path_buf(),
            }
        } else {
            ConverterError::Io(e)
        }
    }

    async fn run_tool(
        tool: &T,
        temp_dir: &Path,
        from: &str,
        to: &str,
        data: &[u8],
        options: &EngineOptions,
        responses: &mpsc::Sender<EngineResponse>,
    ) -> Result<(Bytes, bool), ConverterError> {
        let scratch = Scratch(temp_dir.join(uuid::Uuid::new_v4().to_string()));
        tokio::fs::create_dir_all(&scratch.0).await?;

        let input_path = scratch.0.join(format!("input{}", from));
        let requested = scratch.0.join(format!("output{}", to));
        tokio::fs::write(&input_path, data).await?;

        let args = tool.args(&input_path, &requested, to, options);
        let output_path = tool.output_path(&requested, to);
        debug!(engine = %tool.engine(), "Running {:?} {:?}", tool.program(), args);

        let mut child = Command::new(tool.program())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Self::not_found(tool, e))?;

        let mut tail: Vec<String> = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            let mut parser = tool.progress_parser();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percent) = parser.as_mut().and_then(|p| p(&line)) {
                    let _ = responses.send(EngineResponse::Progress { percent }).await;
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let stderr = tail.join("\n");
            let kind = tool.failure_kind(status.code(), &stderr);
            return Err(ConverterError::ConversionFailed {
                reason: format!("{} exited with code: {:?}", tool.engine(), status.code()),
                kind,
                stderr: if stderr.is_empty() { None } else { Some(stderr) },
            });
        }

        if tokio::fs::try_exists(&output_path).await? {
            let output = tokio::fs::read(&output_path).await?;
            return Ok((Bytes::from(output), false));
        }

        // Some tools split multi-frame inputs into output-0.ext, output-1.ext, ...
        let mut frames = Vec::new();
        let mut dir = tokio::fs::read_dir(&scratch.0).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("output-") {
                frames.push(ArchiveEntry::new(name, tokio::fs::read(entry.path()).await?));
            }
        }
        if frames.is_empty() {
            return Err(ConverterError::conversion_failed("Output file not created", None));
        }
        frames.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((ZipCodec.create(&frames)?, true))
    }
}

#[async_trait]
impl<T: ToolCommand> EngineRuntime for ProcessRuntime<T> {
    fn name(&self) -> &str {
        self.tool.engine()
    }

    async fn load_assets(&self) -> Result<Bytes, ConverterError> {
        let output = Command::new(self.tool.program())
            .args(self.tool.version_args())
            .output()
            .await
            .map_err(|e| Self::not_found(&self.tool, e))?;

        if !output.status.success() {
            return Err(ConverterError::conversion_failed(
                format!("{} version check failed", self.tool.engine()),
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            ));
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        Ok(Bytes::new())
    }

    fn spawn(&self) -> WorkerHandle {
        let (req_tx, mut req_rx) = mpsc::channel(4);
        let (resp_tx, resp_rx) = mpsc::channel(64);
        let tool = Arc::clone(&self.tool);
        let temp_dir = self.temp_dir.clone();

        let task = tokio::spawn(async move {
            if resp_tx.send(EngineResponse::Ready).await.is_err() {
                return;
            }
            let mut loaded = false;
            while let Some(request) = req_rx.recv().await {
                match request {
                    EngineRequest::Load { .. } => {
                        loaded = true;
                        let _ = resp_tx.send(EngineResponse::Loaded).await;
                    }
                    EngineRequest::Convert {
                        from,
                        to,
                        data,
                        options,
                        ..
                    } => {
                        let response = if !loaded {
                            EngineResponse::Error {
                                message: "Convert received before load".to_string(),
                                kind: None,
                            }
                        } else {
                            match Self::run_tool(&tool, &temp_dir, &from, &to, &data, &options, &resp_tx)
                                .await
                            {
                                Ok((output, is_archive)) => EngineResponse::Finished { output, is_archive },
                                Err(e) => EngineResponse::Error {
                                    kind: e.kind().map(str::to_string),
                                    message: e.to_string(),
                                },
                            }
                        };
                        let _ = resp_tx.send(response).await;
                        return;
                    }
                }
            }
        });

        WorkerHandle::new(req_tx, resp_rx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MissingTool;

    impl ToolCommand for MissingTool {
        fn engine(&self) -> &str {
            "missing"
        }

        fn program(&self) -> &Path {
            Path::new("/nonexistent/vert-missing-tool")
        }

        fn args(&self, input: &Path, output: &Path, _to: &str, _options: &EngineOptions) -> Vec<String> {
            vec![
                input.to_string_lossy().to_string(),
                output.to_string_lossy().to_string(),
            ]
        }
    }

    #[tokio::test]
    async fn test_missing_binary_reports_not_found() {
        let temp = tempfile::TempDir::new().unwrap();
        let runtime = ProcessRuntime::new(MissingTool, temp.path().to_path_buf());
        let err = runtime.load_assets().await.unwrap_err();
        assert!(matches!(err, ConverterError::EngineNotFound { ref engine, .. } if engine == "missing"));
    }

    #[tokio::test]
    async fn test_worker_reports_spawn_failure_as_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let runtime = ProcessRuntime::new(MissingTool, temp.path().to_path_buf());
        let mut worker = runtime.spawn();

        assert_eq!(worker.next().await, Some(EngineResponse::Ready));
        worker
            .send(EngineRequest::Load {
                assets: Bytes::new(),
            })
            .await
            .unwrap();
        assert_eq!(worker.next().await, Some(EngineResponse::Loaded));
        worker
            .send(EngineRequest::Convert {
                name: "a.png".to_string(),
                from: ".png".to_string(),
                to: ".jpg".to_string(),
                data: Bytes::from_static(b"x"),
                options: EngineOptions::default(),
            })
            .await
            .unwrap();

        match worker.next().await {
            Some(EngineResponse::Error { message, .. }) => assert!(message.contains("not found")),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
