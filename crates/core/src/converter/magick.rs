//! ImageMagick-based image backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::capabilities::{catalog, FormatDescriptor};
use super::config::EngineConfig;
use super::engine::{EngineDriver, EngineOptions};
use super::error::ConverterError;
use super::process::{ProcessRuntime, ToolCommand};
use super::readiness::Readiness;
use super::traits::Backend;
use super::types::{ConversionInput, ConvertedFile, ProgressReporter};
use crate::archive::ARCHIVE_FORMAT;

fn magick_formats() -> Vec<FormatDescriptor> {
    catalog(&[
        (".png", true, true, true),
        (".jpeg", true, true, true),
        (".jpg", true, true, true),
        (".webp", true, true, true),
        (".gif", true, true, true),
        (".svg", true, true, true),
        (".jxl", true, true, true),
        (".avif", true, true, true),
        (".heic", true, false, true),
        (".heif", true, false, true),
        (".ico", true, true, true),
        (".bmp", true, true, true),
        (".cur", true, true, true),
        (".ani", true, false, true),
        (".icns", true, false, true),
        (".nef", true, false, true),
        (".cr2", true, false, true),
        (".hdr", true, true, true),
        (".jpe", true, true, true),
        (".mat", true, true, true),
        (".pbm", true, true, true),
        (".pfm", true, true, true),
        (".pgm", true, true, true),
        (".pnm", true, true, true),
        (".ppm", true, true, true),
        (".tiff", true, true, true),
        (".jfif", true, true, true),
        (".eps", false, true, true),
        (".psd", true, true, true),
        // raw camera formats
        (".arw", true, false, true),
        (".tif", true, true, true),
        (".dng", true, false, true),
        (".xcf", true, false, true),
        (".rw2", true, false, true),
        (".raf", true, false, true),
        (".orf", true, false, true),
        (".pef", true, false, true),
        (".mos", true, false, true),
        (".raw", true, false, true),
        (".dcr", true, false, true),
        (".crw", true, false, true),
        (".cr3", true, false, true),
        (".3fr", true, false, true),
        (".erf", true, false, true),
        (".mrw", true, false, true),
        (".mef", true, false, true),
        (".nrw", true, false, true),
        (".srw", true, false, true),
        (".sr2", true, false, true),
        (".srf", true, false, true),
    ])
}

/// Builds `magick` invocations.
#[derive(Debug, Clone)]
pub struct MagickCommand {
    program: PathBuf,
}

impl MagickCommand {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl ToolCommand for MagickCommand {
    fn engine(&self) -> &str {
        "imagemagick"
    }

    fn program(&self) -> &Path {
        &self.program
    }

    fn args(&self, input: &Path, output: &Path, _to: &str, options: &EngineOptions) -> Vec<String> {
        let mut args = vec![input.to_string_lossy().to_string()];
        if let Some(quality) = options.quality {
            args.extend(["-quality".to_string(), quality.to_string()]);
        }
        if !options.keep_metadata {
            args.push("-strip".to_string());
        }
        args.push(output.to_string_lossy().to_string());
        args
    }
}

/// Image conversion through a local ImageMagick binary.
pub struct MagickBackend {
    formats: Vec<FormatDescriptor>,
    driver: EngineDriver,
    quality: u8,
    keep_metadata: bool,
}

impl MagickBackend {
    pub fn new(config: &EngineConfig) -> Self {
        let command = MagickCommand::new(config.magick_path.clone());
        let runtime = Arc::new(ProcessRuntime::new(command, config.temp_dir.join("magick")));
        Self {
            formats: magick_formats(),
            driver: EngineDriver::new(runtime, config.timeouts(), config.readiness_timeout()),
            quality: config.magick_quality,
            keep_metadata: config.keep_metadata,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&EngineConfig::default())
    }

    fn engine_options(&self, input: &ConversionInput) -> EngineOptions {
        EngineOptions {
            quality: Some(input.options.quality.unwrap_or(self.quality)),
            keep_metadata: input.options.keep_metadata.unwrap_or(self.keep_metadata),
        }
    }
}

#[async_trait]
impl Backend for MagickBackend {
    fn name(&self) -> &str {
        "imagemagick"
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
        let options = self.engine_options(&input);
        let mut input = input;

        // SVG is rasterized to PNG before any other conversion.
        if input.from == ".svg" {
            debug!(job_id = %input.job_id, "Rasterizing svg to png");
            let raster = self.driver.run(&input, ".png", options.clone(), &progress).await?;
            if to == ".png" || raster.is_archive {
                return Ok(finish(&input, to, raster.data, raster.is_archive));
            }
            input.name = input.output_name(".png");
            input.from = ".png".to_string();
            input.data = raster.data;
        }

        let output = self.driver.run(&input, to, options, &progress).await?;
        Ok(finish(&input, to, output.data, output.is_archive))
    }

    async fn cancel(&self, job_id: &str) {
        self.driver.cancel(job_id);
    }
}

/// Names the output; multi-image results come back as an archive.
fn finish(input: &ConversionInput, to: &str, data: bytes::Bytes, is_archive: bool) -> ConvertedFile {
    let format = if is_archive { ARCHIVE_FORMAT } else { to };
    ConvertedFile::new(input.output_name(format), format, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_args_include_quality_and_strip() {
        let cmd = MagickCommand::new(PathBuf::from("magick"));
        let args = cmd.args(
            Path::new("/tmp/input.png"),
            Path::new("/tmp/output.jpg"),
            ".jpg",
            &EngineOptions {
                quality: Some(85),
                keep_metadata: false,
            },
        );
        assert_eq!(
            args,
            vec!["/tmp/input.png", "-quality", "85", "-strip", "/tmp/output.jpg"]
        );
    }

    #[test]
    fn test_default_quality_from_config() {
        let backend = MagickBackend::with_defaults();
        let input = ConversionInput::new("j", "a.png", Bytes::new());
        assert_eq!(backend.engine_options(&input).quality, Some(100));
        assert!(backend.engine_options(&input).keep_metadata);
    }

    #[test]
    fn test_catalog() {
        let backend = MagickBackend::with_defaults();
        assert!(backend.format(".svg").unwrap().is_native());
        assert!(!backend.format(".eps").unwrap().from_supported());
        assert!(!backend.format(".heic").unwrap().to_supported());
    }

    #[test]
    fn test_finish_archive_naming() {
        let input = ConversionInput::new("j", "anim.gif", Bytes::new());
        let file = finish(&input, ".png", Bytes::from_static(b"zip"), true);
        assert_eq!(file.name, "anim.zip");
        assert_eq!(file.format, ".zip");
    }
}
