pub mod error;
pub mod service;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tempfile::TempDir;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ClipgrabConfig;
use crate::download::{DownloadOutcome, StreamDownloader};
use crate::link::{ClassifiedLink, LinkClassifier};
use crate::progress::{ProgressEvent, ProgressSink, ProgressStage};
use crate::resolver::{SourceProvider, SourceResolver};
use crate::watermark::{ProcessedArtifact, ProcessingStrategy, WatermarkProcessor};

pub use error::{FailureDiagnostics, PipelineError, PipelineResult};
pub use service::{AcquisitionRequest, AcquisitionService, ServiceResponse};

/// Every request id and work directory starts with this.
pub const WORK_DIR_PREFIX: &str = "task_";
/// Extension of passthrough outputs whose bytes match no known container.
pub const UNRECOGNIZED_EXTENSION: &str = "bin";
pub const FAILURE_LOG: &str = "acquisition_failures.log";

#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub work_root: PathBuf,
    pub output_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl PipelinePaths {
    pub fn from_config(config: &ClipgrabConfig) -> Self {
        Self {
            work_root: config.work_dir(),
            output_dir: config.output_dir(),
            logs_dir: config.logs_dir(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunOptions {
    pub deadline: Option<Duration>,
    pub progress: Option<mpsc::Sender<ProgressEvent>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionReport {
    pub request_id: String,
    pub link: ClassifiedLink,
    pub title: Option<String>,
    pub duration_seconds: Option<f64>,
    /// `download.local_path` pointed into the work directory, which is gone by now.
    pub download: DownloadOutcome,
    pub artifact: ProcessedArtifact,
}

/// Runs classify, resolve, download and process for one link, strictly in
/// sequence. Intermediates live in a per-request directory that is removed
/// whether the request succeeds, fails or is dropped.
pub struct AcquisitionPipeline {
    classifier: LinkClassifier,
    resolver: SourceResolver,
    downloader: StreamDownloader,
    processor: WatermarkProcessor,
    paths: PipelinePaths,
}

impl AcquisitionPipeline {
    pub fn new(
        resolver: SourceResolver,
        downloader: StreamDownloader,
        processor: WatermarkProcessor,
        paths: PipelinePaths,
    ) -> Self {
        Self {
            classifier: LinkClassifier::new(),
            resolver,
            downloader,
            processor,
            paths,
        }
    }

    pub fn from_config(
        config: &ClipgrabConfig,
        provider: Arc<dyn SourceProvider>,
    ) -> PipelineResult<Self> {
        let resolver = SourceResolver::new(provider, config.resolver.clone());
        let downloader = StreamDownloader::new(config.download.clone())?;
        let processor = WatermarkProcessor::new(config.watermark.clone());
        Ok(Self::new(
            resolver,
            downloader,
            processor,
            PipelinePaths::from_config(config),
        ))
    }

    pub fn with_classifier(mut self, classifier: LinkClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &LinkClassifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    pub fn failure_log(&self) -> PathBuf {
        self.paths.logs_dir.join(FAILURE_LOG)
    }

    pub async fn run(&self, raw_link: &str) -> PipelineResult<AcquisitionReport> {
        self.run_with(raw_link, RunOptions::default()).await
    }

    pub async fn run_with_deadline(
        &self,
        raw_link: &str,
        deadline: Duration,
    ) -> PipelineResult<AcquisitionReport> {
        let options = RunOptions {
            deadline: Some(deadline),
            ..RunOptions::default()
        };
        self.run_with(raw_link, options).await
    }

    pub async fn run_with(
        &self,
        raw_link: &str,
        options: RunOptions,
    ) -> PipelineResult<AcquisitionReport> {
        let request_id = new_request_id();
        let progress = options
            .progress
            .map(|sender| ProgressSink::new(sender, request_id.clone()))
            .unwrap_or_default();

        let work = self.execute(&request_id, raw_link, &progress);
        let result = match options.deadline {
            // Dropping `work` on expiry aborts HTTP calls, kills the encoder
            // and removes the work directory.
            Some(deadline) => match timeout(deadline, work).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::DeadlineExceeded(deadline)),
            },
            None => work.await,
        };

        if let Err(error) = &result {
            warn!(request_id = %request_id, kind = error.kind(), error = %error, "acquisition failed");
            self.log_failure(error.kind(), error);
        }
        result
    }

    async fn execute(
        &self,
        request_id: &str,
        raw_link: &str,
        progress: &ProgressSink,
    ) -> PipelineResult<AcquisitionReport> {
        progress.emit(ProgressStage::Resolving, 0);
        let link = self.classifier.classify(raw_link)?;
        info!(
            request_id,
            platform = %link.platform,
            short_form = link.is_short_form,
            "link classified"
        );
        let source = self.resolver.resolve(&link).await?;
        progress.emit(ProgressStage::Resolving, 100);

        let work_dir = self.create_work_dir(request_id).await?;
        let input = work_dir
            .path()
            .join(format!("input.{}", source.container_format));
        let download = self.downloader.download(&source, &input, progress).await?;

        progress.emit(ProgressStage::Processing, 0);
        let processed_path = work_dir.path().join("output.mp4");
        let processed = self
            .processor
            .process(&download.local_path, &processed_path)
            .await?;
        progress.emit(ProgressStage::Processing, 100);

        // passthrough output is named after the bytes that arrived
        let extension = match (processed.strategy_used, download.detected_container) {
            (ProcessingStrategy::PassthroughCopy, Some(kind)) => kind.extension(),
            (ProcessingStrategy::PassthroughCopy, None) => UNRECOGNIZED_EXTENSION,
            _ => "mp4",
        };
        let final_path = self
            .paths
            .output_dir
            .join(format!("{request_id}.{extension}"));
        move_file(&processed.local_path, &final_path).await?;
        info!(
            request_id,
            strategy = %processed.strategy_used,
            bytes = processed.byte_size,
            path = %final_path.display(),
            "acquisition finished"
        );

        Ok(AcquisitionReport {
            request_id: request_id.to_string(),
            link,
            title: source.title,
            duration_seconds: source.duration_seconds,
            download,
            artifact: ProcessedArtifact {
                local_path: final_path,
                ..processed
            },
        })
    }

    async fn create_work_dir(&self, request_id: &str) -> PipelineResult<TempDir> {
        let root = &self.paths.work_root;
        fs::create_dir_all(root)
            .await
            .map_err(|source| PipelineError::io(source, root))?;
        tempfile::Builder::new()
            .prefix(&format!("{request_id}_"))
            .tempdir_in(root)
            .map_err(|source| PipelineError::io(source, root))
    }

    pub(crate) fn log_failure(&self, stage: &str, error: &PipelineError) {
        let path = self.failure_log();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(file, "{} [{}] {}", Utc::now().to_rfc3339(), stage, error);
        }
    }
}

pub fn new_request_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{WORK_DIR_PREFIX}{}_{}",
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

async fn move_file(from: &Path, to: &Path) -> PipelineResult<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| PipelineError::io(source, parent))?;
    }
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Work and output directories may sit on different filesystems.
    if let Err(source) = fs::copy(from, to).await {
        let _ = fs::remove_file(to).await;
        return Err(PipelineError::io(source, to));
    }
    fs::remove_file(from)
        .await
        .map_err(|source| PipelineError::io(source, from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownloadSection, ResolverSection, WatermarkSection};
    use crate::resolver::{ProviderRequest, ProviderResponse, ProviderResult};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct StalledProvider;

    #[async_trait]
    impl SourceProvider for StalledProvider {
        async fn expand(
            &self,
            _url: &str,
            _headers: &BTreeMap<String, String>,
        ) -> ProviderResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }

        async fn fetch(&self, _request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ProviderResponse {
                status: 200,
                final_url: String::new(),
                body: String::new(),
            })
        }
    }

    fn pipeline(dir: &TempDir) -> AcquisitionPipeline {
        AcquisitionPipeline::new(
            SourceResolver::new(Arc::new(StalledProvider), ResolverSection::default()),
            StreamDownloader::new(DownloadSection::default()).unwrap(),
            WatermarkProcessor::new(WatermarkSection::default()),
            PipelinePaths {
                work_root: dir.path().join("work"),
                output_dir: dir.path().join("output"),
                logs_dir: dir.path().join("logs"),
            },
        )
    }

    #[test]
    fn request_ids_are_unique_and_prefixed() {
        let first = new_request_id();
        let second = new_request_id();
        assert!(first.starts_with(WORK_DIR_PREFIX));
        assert_ne!(first, second);
        assert_eq!(first.rsplit('_').next().map(str::len), Some(8));
    }

    #[tokio::test]
    async fn unsupported_link_fails_fast_and_is_logged() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        let error = pipeline.run("check out my cat").await.unwrap_err();
        assert_eq!(error.kind(), "unsupported_link");
        assert!(!error.retryable());
        assert!(!dir.path().join("work").exists());

        let log = std::fs::read_to_string(pipeline.failure_log()).unwrap();
        assert!(log.contains("[unsupported_link]"));
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_drops_a_stalled_request() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        let error = pipeline
            .run_with_deadline("https://b23.tv/abc123", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::DeadlineExceeded(_)));
        assert_eq!(error.kind(), "deadline_exceeded");
        assert!(error.retryable());
        assert!(error.diagnostics().strategies_tried.is_empty());
    }
}
