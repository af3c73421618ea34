//! Pandoc-based document backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::capabilities::{catalog, FormatDescriptor};
use super::config::EngineConfig;
use super::engine::{EngineDriver, EngineOptions};
use super::error::ConverterError;
use super::process::{ProcessRuntime, ToolCommand};
use super::readiness::Readiness;
use super::traits::Backend;
use super::types::{ConversionInput, ConvertedFile, ProgressReporter};
use crate::archive::ARCHIVE_FORMAT;

const UNKNOWN_READER: &str = "PandocUnknownReaderError";
const UNKNOWN_WRITER: &str = "PandocUnknownWriterError";
const PARSE_ERROR: &str = "PandocParseError";

fn pandoc_formats() -> Vec<FormatDescriptor> {
    catalog(&[
        (".docx", true, true, true),
        (".doc", true, true, true),
        (".md", true, true, true),
        (".html", true, true, true),
        (".rtf", true, true, true),
        (".csv", true, true, true),
        (".tsv", true, true, true),
        // must be pandoc-produced json
        (".json", true, true, true),
        (".rst", true, true, true),
        (".epub", true, true, true),
        (".odt", true, true, true),
        (".docbook", true, true, true),
    ])
}

/// Pandoc reader/writer name for an extension.
fn pandoc_format_name(extension: &str) -> String {
    match extension.trim_start_matches('.') {
        "md" => "markdown".to_string(),
        other => other.to_string(),
    }
}

/// Builds `pandoc` invocations.
#[derive(Debug, Clone)]
pub struct PandocCommand {
    program: PathBuf,
}

impl PandocCommand {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl ToolCommand for PandocCommand {
    fn engine(&self) -> &str {
        "pandoc"
    }

    fn program(&self) -> &Path {
        &self.program
    }

    fn version_args(&self) -> Vec<String> {
        vec!["--version".to_string()]
    }

    fn args(&self, input: &Path, output: &Path, to: &str, _options: &EngineOptions) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ext) = input.extension() {
            args.extend([
                "-f".to_string(),
                pandoc_format_name(&ext.to_string_lossy()),
            ]);
        }
        args.extend([
            "-t".to_string(),
            pandoc_format_name(to),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
            input.to_string_lossy().to_string(),
        ]);
        args
    }

    fn failure_kind(&self, exit_code: Option<i32>, _stderr: &str) -> Option<String> {
        let kind = match exit_code? {
            21 => UNKNOWN_READER,
            22 => UNKNOWN_WRITER,
            64 => PARSE_ERROR,
            _ => return None,
        };
        Some(kind.to_string())
    }
}

/// Rewrites engine failures into user-facing messages by error kind.
fn describe_failure(err: ConverterError, from: &str, to: &str) -> ConverterError {
    let (reason, kind, stderr) = match err {
        ConverterError::ConversionFailed {
            reason,
            kind,
            stderr,
        } => (reason, kind, stderr),
        other => return other,
    };
    let detail = stderr.as_deref().unwrap_or(&reason);

    let message = match kind.as_deref() {
        Some(UNKNOWN_READER) => format!("{} is not a supported input format for documents.", from),
        Some(UNKNOWN_WRITER) => format!("{} is not a supported output format for documents.", to),
        Some(PARSE_ERROR) if detail.contains("JSON missing pandoc-api-version") => {
            "This JSON file was not produced by pandoc and cannot be converted.".to_string()
        }
        Some(kind) => format!("[{}] {}", kind, reason),
        None => reason,
    };

    ConverterError::ConversionFailed {
        reason: message,
        kind,
        stderr,
    }
}

/// Document conversion through a local pandoc binary.
pub struct PandocBackend {
    formats: Vec<FormatDescriptor>,
    driver: EngineDriver,
}

impl PandocBackend {
    pub fn new(config: &EngineConfig) -> Self {
        let command = PandocCommand::new(config.pandoc_path.clone());
        let runtime = Arc::new(ProcessRuntime::new(command, config.temp_dir.join("pandoc")));
        Self {
            formats: pandoc_formats(),
            driver: EngineDriver::new(runtime, config.timeouts(), config.readiness_timeout()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[async_trait]
impl Backend for PandocBackend {
    fn name(&self) -> &str {
        "pandoc"
    }

    fn supported_formats(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    fn readiness(&self) -> &Readiness {
        self.driver.readiness()
    }

    async fn preload(&self) {
        self.driver.preload().await;
    }

    async fn convert(
        &self,
        input: ConversionInput,
        to: &str,
        progress: ProgressReporter,
    ) -> Result<ConvertedFile, ConverterError> {
        let output = self
            .driver
            .run(&input, to, EngineOptions::default(), &progress)
            .await
            .map_err(|e| describe_failure(e, &input.from, to))?;

        let format = if output.is_archive { ARCHIVE_FORMAT } else { to };
        Ok(ConvertedFile::new(input.output_name(format), format, output.data))
    }

    async fn cancel(&self, job_id: &str) {
        self.driver.cancel(job_id);
    }
}
