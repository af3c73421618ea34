//! Conversion backends and their shared plumbing.
//!
//! A [`Backend`] advertises a catalog of [`FormatDescriptor`]s and converts
//! one input at a time. Local backends run their engine through the worker
//! protocol in [`engine`]; the remote backend lives in [`crate::remote`].
//!
//! # Example
//!
//! ```ignore
//! use vert_core::converter::{Backend, ConversionInput, MagickBackend, ProgressReporter};
//!
//! let backend = MagickBackend::with_defaults();
//! backend.preload().await;
//!
//! let input = ConversionInput::new("job-1", "photo.png", bytes);
//! let result = backend.convert(input, ".jpg", ProgressReporter::noop()).await?;
//! println!("{} ({} bytes)", result.name, result.data.len());
//! ```

mod capabilities;
mod config;
pub mod engine;
mod error;
mod ffmpeg;
mod magick;
mod pandoc;
pub mod process;
mod readiness;
mod registry;
mod traits;
mod types;

pub use capabilities::{file_stem, format_of, native_first, normalize_format, FormatDescriptor};
pub(crate) use capabilities::catalog;
pub use config::{EngineConfig, EngineTimeouts};
pub use error::{ConverterError, FormatError};
pub use ffmpeg::{FfmpegBackend, FfmpegCommand};
pub use magick::{MagickBackend, MagickCommand};
pub use pandoc::{PandocBackend, PandocCommand};
pub use readiness::Readiness;
pub use registry::{select_backend, BackendRegistry};
pub use traits::Backend;
pub use types::{BackendStatus, ConversionInput, ConvertOptions, ConvertedFile, ProgressReporter};
