//! Testing utilities and mock implementations.
//!
//! Mocks stand in for conversion backends, instance probes and download
//! targets so jobs and the orchestrator can be exercised without engines
//! or a vertd server.
//!
//! # Example
//!
//! ```rust,ignore
//! use vert_core::testing::{fixtures, MemorySink};
//!
//! let registry = fixtures::registry();
//! let sink = MemorySink::new();
//!
//! // Build an Orchestrator over the registry, convert, then inspect the sink.
//! ```

mod memory_sink;
mod mock_backend;
mod mock_probe;

pub use memory_sink::MemorySink;
pub use mock_backend::{MockBackend, RecordedConversion};
pub use mock_probe::MockProbe;

/// Test fixtures and helper functions.
pub mod fixtures {
    use bytes::Bytes;
    use std::sync::Arc;

    use super::MockBackend;
    use crate::archive::{ArchiveCodec, ArchiveEntry, ZipCodec};
    use crate::converter::BackendRegistry;

    /// Mock image backend named "imagemagick".
    pub fn image_backend() -> MockBackend {
        MockBackend::new("imagemagick").with_formats(&[
            (".png", true, true, true),
            (".jpg", true, true, true),
            (".webp", true, true, true),
            (".svg", true, false, true),
        ])
    }

    /// Mock audio backend named "ffmpeg" that can also pull audio out of video.
    pub fn audio_backend() -> MockBackend {
        MockBackend::new("ffmpeg")
            .with_formats(&[
                (".mp3", true, true, true),
                (".wav", true, true, true),
                (".flac", true, true, true),
                (".mp4", true, false, false),
                (".mkv", true, false, false),
            ])
            .with_progress(true)
    }

    /// Mock remote video backend named "vertd".
    pub fn video_backend() -> MockBackend {
        MockBackend::new("vertd")
            .with_formats(&[
                (".mp4", true, true, true),
                (".mkv", true, true, true),
                (".gif", true, true, true),
            ])
            .with_progress(true)
    }

    /// Registry of image, audio and video mocks in that order.
    pub fn registry() -> BackendRegistry {
        BackendRegistry::new(vec![
            Arc::new(image_backend()),
            Arc::new(audio_backend()),
            Arc::new(video_backend()),
        ])
    }

    /// Builds a zip archive from `(name, contents)` pairs.
    pub fn zip(members: &[(&str, &[u8])]) -> Bytes {
        let entries: Vec<ArchiveEntry> = members
            .iter()
            .map(|(name, data)| ArchiveEntry::new(*name, data.to_vec()))
            .collect();
        ZipCodec
            .create(&entries)
            .expect("fixture archive should encode")
    }
}
