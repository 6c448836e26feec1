pub mod config;
pub mod container;
pub mod download;
pub mod error;
pub mod fallback;
pub mod ledger;
pub mod link;
pub mod maintenance;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod sqlite;
pub mod storage;
pub mod watermark;

pub use config::{
    load_config, ClipgrabConfig, CropCorner, CropSection, DownloadSection, EncodeProfile,
    LedgerSection, PathsSection, ResolverSection, WatermarkSection,
};
pub use container::{detect_container, sniff_file, ContainerKind};
pub use download::{DownloadError, DownloadOutcome, DownloadResult, StreamDownloader};
pub use error::{ConfigError, Result};
pub use ledger::{
    LedgerError, LedgerResult, SqliteTaskLedger, SqliteTaskLedgerBuilder, TaskEntry, TaskFilter,
    TaskLedger, TaskRecord, TaskStatus,
};
pub use link::{ClassifiedLink, LinkClassifier, LinkError, LinkResult, Platform, RiskLevel};
pub use maintenance::{
    cleanup_expired, sweep_stale_work_dirs, task_progress, CleanupReport, ProgressStatus,
    TaskProgress,
};
pub use pipeline::{
    AcquisitionPipeline, AcquisitionReport, AcquisitionRequest, AcquisitionService,
    FailureDiagnostics, PipelineError, PipelinePaths, PipelineResult, RunOptions,
    ServiceResponse,
};
pub use progress::{ProgressEvent, ProgressSink, ProgressStage};
pub use resolver::{
    FixtureSourceProvider, HttpSourceProvider, ResolveError, ResolvedSource, SourceProvider,
    SourceResolver,
};
pub use retry::{Backoff, RetryPolicy};
pub use storage::{ArtifactStore, LocalArtifactStore, StorageError, StoredArtifact};
pub use watermark::{
    CommandExecutor, ProcessedArtifact, ProcessingStrategy, SystemCommandExecutor,
    WatermarkError, WatermarkProcessor,
};
