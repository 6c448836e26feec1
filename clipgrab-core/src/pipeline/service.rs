use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ledger::{TaskLedger, TaskRecord};
use crate::progress::{ProgressEvent, ProgressSink, ProgressStage};
use crate::storage::ArtifactStore;
use crate::watermark::ProcessingStrategy;

use super::{AcquisitionPipeline, FailureDiagnostics, PipelineError, PipelineResult, RunOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionRequest {
    pub raw_link: String,
}

impl AcquisitionRequest {
    pub fn new(raw_link: impl Into<String>) -> Self {
        Self {
            raw_link: raw_link.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceResponse {
    Success {
        request_id: String,
        durable_reference: String,
        title: Option<String>,
        duration_seconds: Option<f64>,
        byte_size: u64,
        strategy_used: ProcessingStrategy,
        expires_at: DateTime<Utc>,
    },
    Failure {
        kind: String,
        message: String,
        retryable: bool,
        diagnostics: FailureDiagnostics,
    },
}

impl ServiceResponse {
    pub fn failure(error: &PipelineError) -> Self {
        ServiceResponse::Failure {
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.retryable(),
            diagnostics: error.diagnostics(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ServiceResponse::Success { .. })
    }
}

/// Invocation boundary: runs the pipeline, uploads the artifact and records
/// the task so it can expire later.
pub struct AcquisitionService {
    pipeline: AcquisitionPipeline,
    store: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn TaskLedger>,
    expiry: chrono::Duration,
    deadline: Option<Duration>,
}

impl AcquisitionService {
    pub fn new(
        pipeline: AcquisitionPipeline,
        store: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn TaskLedger>,
        expiry_hours: i64,
    ) -> Self {
        Self {
            pipeline,
            store,
            ledger,
            expiry: chrono::Duration::hours(expiry_hours),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn pipeline(&self) -> &AcquisitionPipeline {
        &self.pipeline
    }

    pub async fn handle(&self, request: &AcquisitionRequest) -> ServiceResponse {
        self.handle_with_progress(request, None).await
    }

    pub async fn handle_with_progress(
        &self,
        request: &AcquisitionRequest,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> ServiceResponse {
        match self.acquire(&request.raw_link, progress).await {
            Ok(response) => response,
            Err(error) => ServiceResponse::failure(&error),
        }
    }

    async fn acquire(
        &self,
        raw_link: &str,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> PipelineResult<ServiceResponse> {
        let options = RunOptions {
            deadline: self.deadline,
            progress: progress.clone(),
        };
        let report = self.pipeline.run_with(raw_link, options).await?;
        let sink = progress
            .map(|sender| ProgressSink::new(sender, report.request_id.clone()))
            .unwrap_or_default();

        sink.emit(ProgressStage::Storing, 0);
        let local = &report.artifact.local_path;
        let extension = local
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or("mp4");
        let key = format!("processed/{}.{extension}", report.request_id);
        let stored = self.store.put(local, &key).await;
        if let Err(error) = fs::remove_file(local).await {
            debug!(path = %local.display(), error = %error, "failed to remove local output");
        }
        let stored = match stored {
            Ok(stored) => stored,
            Err(error) => {
                let error = PipelineError::StorageFailed(error);
                warn!(request_id = %report.request_id, error = %error, "artifact upload failed");
                self.pipeline.log_failure(error.kind(), &error);
                return Err(error);
            }
        };
        sink.emit(ProgressStage::Storing, 100);

        let created_at = Utc::now();
        let mut record = TaskRecord::new(&report.request_id, &stored.reference, created_at);
        record.original_link = Some(report.link.normalized_url.clone());
        record.platform = Some(report.link.platform.as_str().to_string());
        record.title = report.title.clone();
        record.strategy_used = Some(report.artifact.strategy_used.as_str().to_string());
        record.byte_size = Some(stored.byte_size);
        record.checksum = Some(stored.checksum.clone());
        let expires_at = match self.ledger.record(&record) {
            Ok(expires_at) => expires_at,
            Err(error) => {
                warn!(request_id = %report.request_id, error = %error, "failed to record task; continuing");
                created_at + self.expiry
            }
        };
        sink.emit(ProgressStage::Completed, 100);
        info!(
            request_id = %report.request_id,
            reference = %stored.reference,
            expires_at = %expires_at,
            "acquisition stored"
        );

        Ok(ServiceResponse::Success {
            request_id: report.request_id,
            durable_reference: stored.reference,
            title: report.title,
            duration_seconds: report.duration_seconds,
            byte_size: stored.byte_size,
            strategy_used: report.artifact.strategy_used,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownloadSection, ResolverSection, WatermarkSection};
    use crate::download::StreamDownloader;
    use crate::ledger::SqliteTaskLedger;
    use crate::pipeline::PipelinePaths;
    use crate::resolver::{FixtureSourceProvider, SourceResolver};
    use crate::storage::LocalArtifactStore;
    use crate::watermark::WatermarkProcessor;
    use tempfile::TempDir;

    #[tokio::test]
    async fn unsupported_link_becomes_a_non_retryable_failure() {
        let dir = TempDir::new().unwrap();
        let pipeline = AcquisitionPipeline::new(
            SourceResolver::new(
                Arc::new(FixtureSourceProvider::default()),
                ResolverSection::default(),
            ),
            StreamDownloader::new(DownloadSection::default()).unwrap(),
            WatermarkProcessor::new(WatermarkSection::default()),
            PipelinePaths {
                work_root: dir.path().join("work"),
                output_dir: dir.path().join("output"),
                logs_dir: dir.path().join("logs"),
            },
        );
        let ledger = SqliteTaskLedger::new(dir.path().join("tasks.sqlite")).unwrap();
        ledger.initialize().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("store")).unwrap();
        let service = AcquisitionService::new(pipeline, Arc::new(store), Arc::new(ledger), 24);

        let response = service
            .handle(&AcquisitionRequest::new("   "))
            .await;
        assert!(!response.is_success());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["outcome"], "failure");
        assert_eq!(value["kind"], "unsupported_link");
        assert_eq!(value["retryable"], false);
    }
}
