use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::download::DownloadError;
use crate::link::LinkError;
use crate::resolver::ResolveError;
use crate::storage::StorageError;
use crate::watermark::WatermarkError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    UnsupportedLink(#[from] LinkError),
    #[error(transparent)]
    ResolutionExhausted(#[from] ResolveError),
    #[error("download failed: {0}")]
    DownloadFailed(#[from] DownloadError),
    #[error("processing failed: {0}")]
    Processing(#[from] WatermarkError),
    #[error("storage failed: {0}")]
    StorageFailed(#[from] StorageError),
    #[error("request exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl PipelineError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PipelineError::Io {
            source,
            path: path.into(),
        }
    }

    /// Stable machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedLink(_) => "unsupported_link",
            PipelineError::ResolutionExhausted(_) => "resolution_exhausted",
            PipelineError::DownloadFailed(_) => "download_failed",
            PipelineError::StorageFailed(_) => "storage_failed",
            PipelineError::DeadlineExceeded(_) => "deadline_exceeded",
            PipelineError::Processing(_) | PipelineError::Io { .. } => "io",
        }
    }

    /// Only a bad input is pointless to submit again.
    pub fn retryable(&self) -> bool {
        !matches!(self, PipelineError::UnsupportedLink(_))
    }

    pub fn diagnostics(&self) -> FailureDiagnostics {
        match self {
            PipelineError::ResolutionExhausted(error) => FailureDiagnostics {
                strategies_tried: error
                    .strategies_tried()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                last_status: error.last_status(),
                attempts: None,
            },
            PipelineError::DownloadFailed(error) => FailureDiagnostics {
                strategies_tried: match error {
                    DownloadError::Exhausted { failures, .. } => {
                        let mut labels: Vec<String> = Vec::new();
                        for failure in failures {
                            if !labels.contains(&failure.strategy) {
                                labels.push(failure.strategy.clone());
                            }
                        }
                        labels
                    }
                    _ => Vec::new(),
                },
                last_status: error.last_status(),
                attempts: error.attempts(),
            },
            _ => FailureDiagnostics::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureDiagnostics {
    pub strategies_tried: Vec<String>,
    pub last_status: Option<u16>,
    pub attempts: Option<u32>,
}
