//! Per-file conversion jobs.
//!
//! A [`Job`] owns one input, picks its backend from the current target and
//! tracks state, progress and result across runs.

mod task;
mod types;

pub use task::{available_parallelism, Job, DEFAULT_PARALLELISM};
pub use types::{normalize_file_name, short_id, JobState, JobStatus};
