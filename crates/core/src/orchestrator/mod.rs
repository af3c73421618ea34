//! Batch orchestrator for conversion jobs.
//!
//! The orchestrator owns every submitted job and drives them through one
//! bounded queue:
//! - **Add**: files are routed to backends; archives stay whole or are expanded
//! - **Convert**: at most `max_parallel` conversions in flight
//! - **Download**: results go to a [`DownloadSink`], singly or as one archive

mod config;
mod runner;
mod sink;
mod types;

pub use config::OrchestratorConfig;
pub use runner::{format_filename, Orchestrator};
pub use sink::{DirectorySink, DownloadSink};
pub use types::{BatchSummary, OrchestratorError, OrchestratorStatus};
