//! Types for the batch orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::converter::{BackendStatus, ConverterError};
use crate::job::JobStatus;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Nothing has been added.
    #[error("no jobs to download")]
    NoJobs,

    /// No job has a result yet.
    #[error("no converted files to download")]
    NoResults,

    /// A single job was asked for before it finished.
    #[error("job {0} has no result")]
    NotDone(String),

    #[error(transparent)]
    Converter(#[from] ConverterError),

    /// Writing a download failed.
    #[error("download failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome counts of a `convert_all` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.done + self.failed + self.cancelled
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Every held job, in submission order.
    pub jobs: Vec<JobStatus>,
    /// Readiness of every registered backend.
    pub backends: Vec<(String, BackendStatus)>,
    /// Jobs can be started: required backends ready, nothing processing.
    pub ready: bool,
    /// Every job has a result.
    pub results: bool,
    /// Size of the conversion queue.
    pub max_parallel: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_summary_total() {
        let summary = BatchSummary {
            done: 3,
            failed: 1,
            cancelled: 2,
        };
        assert_eq!(summary.total(), 6);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            OrchestratorError::JobNotFound("ab12cd34".into()).to_string(),
            "job not found: ab12cd34"
        );
        let err: OrchestratorError = ConverterError::Cancelled.into();
        assert_eq!(err.to_string(), ConverterError::Cancelled.to_string());
    }
}
