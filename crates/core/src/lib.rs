//! File conversion orchestration core.
//!
//! Routes submitted files to conversion backends by capability, runs them
//! through a bounded queue with per-job cancellation, and drives the remote
//! vertd job protocol with instance selection and rate limiting.

pub mod archive;
pub mod config;
pub mod converter;
pub mod instance;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod remote;
pub mod testing;

pub use archive::{dedupe_names, ArchiveCodec, ArchiveEntry, ZipCodec, ARCHIVE_FORMAT};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError, StateConfig};
pub use converter::{
    normalize_format, select_backend, Backend, BackendRegistry, BackendStatus, ConversionInput,
    ConvertOptions, ConvertedFile, ConverterError, EngineConfig, FfmpegBackend, FormatDescriptor,
    FormatError, MagickBackend, PandocBackend, ProgressReporter, Readiness,
};
pub use instance::{
    Blocklist, Coordinates, InstanceConfig, InstanceMode, InstanceSelector, IpApiLocator,
    SqliteStateStore, StateStore, StoreError,
};
pub use job::{Job, JobState, JobStatus};
pub use orchestrator::{
    BatchSummary, DirectorySink, DownloadSink, Orchestrator, OrchestratorConfig,
    OrchestratorError, OrchestratorStatus,
};
pub use remote::{RemoteConfig, RemoteJobClient, VertdBackend};
