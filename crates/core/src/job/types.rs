//! Types for conversion jobs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::converter::{file_stem, format_of};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Processing,
    Cancelled,
    Done,
    Error,
}

impl JobState {
    /// Whether the job finished one way or another.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Done | Self::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Cancelled => "cancelled",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub from: String,
    pub to: String,
    pub state: JobState,
    /// Percentage, 0-100.
    pub progress: f64,
    /// Backend chosen for the current source and target.
    pub backend: Option<String>,
    /// Format of the result, once done.
    pub result_format: Option<String>,
    /// Failure message, when the job is in `error`.
    pub error: Option<String>,
}

/// Short random job identifier.
pub fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Lower-cases the extension of `name`, leaving the stem untouched.
pub fn normalize_file_name(name: &str) -> String {
    let ext = format_of(name);
    if ext.is_empty() {
        name.to_string()
    } else {
        format!("{}{}", file_stem(name), ext)
    }
}
