use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type WatermarkResult<T> = Result<T, WatermarkError>;

/// Encoder trouble never surfaces here; only the final copy can fail.
#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    CropReencode,
    FullReencode,
    PassthroughCopy,
}

impl ProcessingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStrategy::CropReencode => "crop_reencode",
            ProcessingStrategy::FullReencode => "full_reencode",
            ProcessingStrategy::PassthroughCopy => "passthrough_copy",
        }
    }
}

impl fmt::Display for ProcessingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedArtifact {
    pub local_path: PathBuf,
    pub strategy_used: ProcessingStrategy,
    pub byte_size: u64,
}
