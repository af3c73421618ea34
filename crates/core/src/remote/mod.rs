//! Remote conversion service support.
//!
//! [`RemoteJobClient`] drives one job through upload, the WebSocket job
//! session and download, reporting progress weighted per [`Phase`].
//! [`VertdBackend`] exposes it as a regular [`crate::converter::Backend`].

mod backend;
mod client;
mod config;
mod progress;
pub mod protocol;

pub use backend::{VertdBackend, VERTD_BACKEND};
pub use client::RemoteJobClient;
pub use config::RemoteConfig;
pub use progress::{estimate, Phase, PhaseTracker};
pub use protocol::{ConversionSpeed, UploadResponse};
