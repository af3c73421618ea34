//! FFmpeg-based audio backend.

use async_trait::async_trait;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::capabilities::{catalog, FormatDescriptor};
use super::config::EngineConfig;
use super::engine::{EngineDriver, EngineOptions};
use super::error::ConverterError;
use super::process::{ProcessRuntime, ProgressParser, ToolCommand};
use super::readiness::Readiness;
use super::traits::Backend;
use super::types::{ConversionInput, ConvertedFile, ProgressReporter};

/// Video containers. Readable and writable, but the remote service handles them natively.
const VIDEO_FORMATS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "webm", "ts", "mts", "m2ts", "wmv", "mpg", "mpeg", "flv", "f4v",
    "vob", "m4v", "3gp", "3g2", "mxf", "ogv", "rm", "rmvb", "divx",
];

/// Formats where re-encoding to a lossy target should fall back to safe defaults.
const LOSSLESS_FORMATS: &[&str] = &[".flac", ".m4a", ".caf", ".alac", ".wav", ".dsd", ".dsf", ".dff"];

fn ffmpeg_formats() -> Vec<FormatDescriptor> {
    let mut formats = catalog(&[
        (".mp3", true, true, true),
        (".wav", true, true, true),
        (".flac", true, true, true),
        (".ogg", true, true, true),
        (".mogg", true, false, true),
        (".oga", true, true, true),
        (".opus", true, true, true),
        (".aac", true, true, true),
        (".alac", true, true, true),
        (".m4a", true, true, true),
        (".caf", true, false, true),
        (".wma", true, true, true),
        (".amr", true, true, true),
        (".ac3", true, true, true),
        (".aiff", true, true, true),
        (".aifc", true, true, true),
        (".aif", true, true, true),
        (".mp1", true, false, true),
        (".mp2", true, true, true),
        (".mpc", true, false, true),
        (".dsd", true, false, true),
        (".dsf", true, false, true),
        (".dff", true, false, true),
        (".mqa", true, false, true),
        (".au", true, true, true),
        (".m4b", true, true, true),
        (".voc", true, true, true),
        (".weba", true, true, true),
    ]);
    let video: Vec<(&str, bool, bool, bool)> =
        VIDEO_FORMATS.iter().map(|f| (*f, true, true, false)).collect();
    formats.extend(catalog(&video));
    formats
}

/// Audio codec for a target extension, when ffmpeg's default is not right.
fn audio_codec(to: &str, is_alac: bool) -> Option<&'static str> {
    if is_alac {
        return Some("alac");
    }
    match to {
        ".mp3" => Some("libmp3lame"),
        ".flac" => Some("flac"),
        ".ogg" | ".oga" => Some("libvorbis"),
        ".opus" => Some("libopus"),
        ".wav" => Some("pcm_s16le"),
        ".aiff" | ".aif" | ".aifc" => Some("pcm_s16be"),
        ".m4a" | ".m4b" | ".aac" => Some("aac"),
        ".wma" => Some("wmav2"),
        ".ac3" => Some("ac3"),
        _ => None,
    }
}

/// Builds ffmpeg invocations.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    program: PathBuf,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(program: PathBuf, log_level: impl Into<String>) -> Self {
        Self {
            program,
            log_level: log_level.into(),
        }
    }

    /// Builds ffmpeg arguments for an audio conversion.
    fn build_args(&self, input: &Path, output: &Path, to: &str, options: &EngineOptions) -> Vec<String> {
        let output = self.output_path(output, to);
        let is_alac = to == ".alac";
        let to = if is_alac { ".m4a" } else { to };
        let from = input
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let lossless_to_lossy =
            LOSSLESS_FORMATS.contains(&from.as_str()) && !LOSSLESS_FORMATS.contains(&to);

        let mut args = vec![
            "-y".to_string(), // Overwrite output
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];

        if !options.keep_metadata {
            args.extend(
                ["-map_metadata", "-1", "-map_chapters", "-1", "-map", "a"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }

        if let Some(codec) = audio_codec(to, is_alac) {
            args.extend(["-c:a".to_string(), codec.to_string()]);
        }

        if lossless_to_lossy {
            args.extend(["-b:a".to_string(), "128k".to_string()]);
            let rate = if to == ".opus" { "48000" } else { "44100" };
            args.extend(["-ar".to_string(), rate.to_string()]);
        } else if to == ".opus" {
            // opus has no 44.1kHz mode
            args.extend(["-ar".to_string(), "48000".to_string()]);
        }

        // Log level and progress
        args.extend([
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ]);

        args.push(output.to_string_lossy().to_string());
        args
    }
}

/// Parses `Duration:` from the input banner and `out_time_ms=` from progress lines.
fn ffmpeg_progress_parser() -> ProgressParser {
    let duration_re = Regex::new(r"Duration: (\d+):(\d+):(\d+(?:\.\d+)?)").ok();
    let time_re = Regex::new(r"out_time_ms=(\d+)").ok();
    let mut duration_secs: Option<f64> = None;

    Box::new(move |line: &str| {
        if duration_secs.is_none() {
            if let Some(caps) = duration_re.as_ref().and_then(|re| re.captures(line)) {
                let h: f64 = caps[1].parse().unwrap_or(0.0);
                let m: f64 = caps[2].parse().unwrap_or(0.0);
                let s: f64 = caps[3].parse().unwrap_or(0.0);
                duration_secs = Some(h * 3600.0 + m * 60.0 + s);
                return None;
            }
        }

        let caps = time_re.as_ref()?.captures(line)?;
        let micros: f64 = caps[1].parse().ok()?;
        let duration = duration_secs.filter(|d| *d > 0.0)?;
        // out_time_ms is in microseconds
        Some((micros / 1_000_000.0 / duration * 100.0).min(100.0))
    })
}

impl ToolCommand for FfmpegCommand {
    fn engine(&self) -> &str {
        "ffmpeg"
    }

    fn program(&self) -> &Path {
        &self.program
    }

    fn args(&self, input: &Path, output: &Path, to: &str, options: &EngineOptions) -> Vec<String> {
        self.build_args(input, output, to, options)
    }

    fn output_path(&self, output: &Path, to: &str) -> PathBuf {
        if to == ".alac" {
            output.with_extension("m4a")
        } else {
            output.to_path_buf()
        }
    }

    fn progress_parser(&self) -> Option<ProgressParser> {
        Some(ffmpeg_progress_parser())
    }

    fn failure_kind(&self, _exit_code: Option<i32>, stderr: &str) -> Option<String> {
        if stderr.contains("Specified sample rate") && stderr.contains("is not supported") {
            Some("invalid_rate".to_string())
        } else if stderr.contains("matches no streams") {
            Some("no_audio".to_string())
        } else {
            None
        }
    }
}

/// Audio conversion through a local ffmpeg binary.
pub struct FfmpegBackend {
    formats: Vec<FormatDescriptor>,
    driver: EngineDriver,
    keep_metadata: bool,
}

impl FfmpegBackend {
    /// Creates a new FFmpeg backend with the given configuration.
    pub fn new(config: &EngineConfig) -> Self {
        let command = FfmpegCommand::new(config.ffmpeg_path.clone(), config.ffmpeg_log_level.clone());
        let runtime = Arc::new(ProcessRuntime::new(command, config.temp_dir.join("ffmpeg")));
        Self {
            formats: ffmpeg_formats(),
            driver: EngineDriver::new(runtime, config.timeouts(), config.readiness_timeout()),
            keep_metadata: config.keep_metadata,
        }
    }

    /// Creates a backend with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[async_trait]
impl Backend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn supported_formats(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    fn reports_progress(&self) -> bool {
        true
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
        let options = EngineOptions {
            quality: input.options.quality,
            keep_metadata: input.options.keep_metadata.unwrap_or(self.keep_metadata),
        };
        let output = self.driver.run(&input, to, options, &progress).await?;

        if output.data.is_empty() {
            return Err(ConverterError::conversion_failed("empty file returned", None));
        }

        // ALAC is written into an m4a container.
        let format = if to == ".alac" { ".m4a" } else { to };
        Ok(ConvertedFile::new(input.output_name(format), format, output.data))
    }

    async fn cancel(&self, job_id: &str) {
        self.driver.cancel(job_id);
    }
}
