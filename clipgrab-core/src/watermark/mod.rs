pub mod executor;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{CropCorner, CropSection, EncodeProfile, WatermarkSection};
use crate::container::sniff_file;
use crate::fallback::{first_success, BoxedStrategy, Strategy};

pub use executor::{CommandExecutor, SystemCommandExecutor};
pub use types::{ProcessedArtifact, ProcessingStrategy, WatermarkError, WatermarkResult};

type StageStrategy = BoxedStrategy<Job, StageOutput, StageError>;

/// What a successful stage wrote to the output path.
struct StageOutput {
    strategy: ProcessingStrategy,
    byte_size: u64,
}

#[derive(Debug, Error)]
enum StageError {
    #[error("failed to launch encoder: {0}")]
    Launch(std::io::Error),
    #[error("encoder exited with {0}")]
    Exit(std::process::ExitStatus),
    #[error("encoder timed out after {0:?}")]
    Timeout(Duration),
    #[error("encoder produced no output")]
    EmptyOutput,
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Crops or re-encodes a downloaded file, degrading to a plain copy so the
/// caller always gets an artifact back.
pub struct WatermarkProcessor {
    config: WatermarkSection,
    executor: Arc<dyn CommandExecutor>,
}

impl WatermarkProcessor {
    pub fn new(config: WatermarkSection) -> Self {
        Self {
            config,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub async fn process(&self, input: &Path, output: &Path) -> WatermarkResult<ProcessedArtifact> {
        let detected = match sniff_file(input).await {
            Ok(kind) => kind,
            Err(error) => {
                warn!(path = %input.display(), error = %error, "could not read input header");
                None
            }
        };

        let mut strategies: Vec<StageStrategy> = Vec::new();
        match detected {
            Some(kind) => {
                info!(container = %kind, "input recognized, starting encoder chain");
                strategies.push(Box::new(EncoderStage {
                    strategy: ProcessingStrategy::CropReencode,
                    args: crop_args(&self.config.crop, &self.config.crop_encode),
                }));
                strategies.push(Box::new(EncoderStage {
                    strategy: ProcessingStrategy::FullReencode,
                    args: full_args(&self.config.full_encode),
                }));
            }
            None => {
                warn!(path = %input.display(), "input matches no container signature, skipping encoder");
            }
        }
        strategies.push(Box::new(Passthrough));

        let job = Job {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            ffmpeg: PathBuf::from(&self.config.ffmpeg_path),
            timeout: Duration::from_secs(self.config.timeout_seconds.max(1)),
            executor: Arc::clone(&self.executor),
        };

        match first_success("watermark", &strategies, &job, |_| false).await {
            Ok(success) => {
                let StageOutput {
                    strategy,
                    byte_size,
                } = success.value;
                info!(strategy = %strategy, bytes = byte_size, "processing finished");
                Ok(ProcessedArtifact {
                    local_path: output.to_path_buf(),
                    strategy_used: strategy,
                    byte_size,
                })
            }
            Err(mut exhausted) => {
                let failure = exhausted.failures.pop();
                let source = match failure.map(|failure| failure.error) {
                    Some(StageError::Io { source, .. }) | Some(StageError::Launch(source)) => source,
                    Some(other) => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
                    None => std::io::Error::new(std::io::ErrorKind::Other, "no processing stage ran"),
                };
                Err(WatermarkError::Io {
                    source,
                    path: output.to_path_buf(),
                })
            }
        }
    }
}

/// Per-call state shared by the stages.
struct Job {
    input: PathBuf,
    output: PathBuf,
    ffmpeg: PathBuf,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

struct EncoderStage {
    strategy: ProcessingStrategy,
    args: EncoderArgs,
}

#[async_trait]
impl Strategy<Job> for EncoderStage {
    type Output = StageOutput;
    type Error = StageError;

    fn label(&self) -> String {
        self.strategy.as_str().to_string()
    }

    async fn attempt(&self, job: &Job) -> Result<StageOutput, StageError> {
        let args = self.args.render(&job.input, &job.output);
        let result = match timeout(job.timeout, job.executor.run(&job.ffmpeg, &args)).await {
            Err(_) => Err(StageError::Timeout(job.timeout)),
            Ok(Err(error)) => Err(StageError::Launch(error)),
            Ok(Ok(status)) if !status.success() => Err(StageError::Exit(status)),
            Ok(Ok(_)) => match fs::metadata(&job.output).await {
                Ok(meta) if meta.len() > 0 => Ok(StageOutput {
                    strategy: self.strategy,
                    byte_size: meta.len(),
                }),
                _ => Err(StageError::EmptyOutput),
            },
        };
        if result.is_err() {
            remove_partial(&job.output).await;
        }
        result
    }
}

struct Passthrough;

#[async_trait]
impl Strategy<Job> for Passthrough {
    type Output = StageOutput;
    type Error = StageError;

    fn label(&self) -> String {
        ProcessingStrategy::PassthroughCopy.as_str().to_string()
    }

    async fn attempt(&self, job: &Job) -> Result<StageOutput, StageError> {
        let byte_size = fs::copy(&job.input, &job.output)
            .await
            .map_err(|source| StageError::Io {
                source,
                path: job.output.clone(),
            })?;
        Ok(StageOutput {
            strategy: ProcessingStrategy::PassthroughCopy,
            byte_size,
        })
    }
}

async fn remove_partial(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %error, "failed to remove partial output");
        }
    }
}

/// ffmpeg arguments around the input and output paths. The output path is always last.
#[derive(Debug, Clone)]
struct EncoderArgs {
    before_input: Vec<String>,
    after_input: Vec<String>,
}

impl EncoderArgs {
    fn render(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-hide_banner".into(), "-loglevel".into(), "error".into()];
        args.extend(self.before_input.iter().cloned());
        args.push("-i".into());
        args.push(input.to_string_lossy().to_string());
        args.extend(self.after_input.iter().cloned());
        args.push(output.to_string_lossy().to_string());
        args
    }
}

pub fn crop_filter(crop: &CropSection) -> String {
    let (w, h) = (crop.width, crop.height);
    let (x, y) = match crop.corner {
        CropCorner::BottomRight => ("0".to_string(), "0".to_string()),
        CropCorner::BottomLeft => (w.to_string(), "0".to_string()),
        CropCorner::TopRight => ("0".to_string(), h.to_string()),
        CropCorner::TopLeft => (w.to_string(), h.to_string()),
    };
    format!("crop=iw-{w}:ih-{h}:{x}:{y}")
}

fn encode_args(profile: &EncodeProfile) -> Vec<String> {
    let mut args = vec![
        "-c:v".to_string(),
        profile.video_codec.clone(),
        "-preset".into(),
        profile.preset.clone(),
        "-crf".into(),
        profile.crf.to_string(),
        "-c:a".into(),
        profile.audio_codec.clone(),
    ];
    if let Some(bitrate) = &profile.audio_bitrate {
        args.push("-b:a".into());
        args.push(bitrate.clone());
    }
    args.push("-movflags".into());
    args.push("+faststart".into());
    args
}

fn crop_args(crop: &CropSection, profile: &EncodeProfile) -> EncoderArgs {
    let mut after_input = vec!["-vf".to_string(), crop_filter(crop)];
    after_input.extend(encode_args(profile));
    EncoderArgs {
        before_input: Vec::new(),
        after_input,
    }
}

fn full_args(profile: &EncodeProfile) -> EncoderArgs {
    EncoderArgs {
        before_input: vec![
            "-fflags".into(),
            "+genpts+discardcorrupt".into(),
            "-err_detect".into(),
            "ignore_err".into(),
        ],
        after_input: encode_args(profile),
    }
}
