#![allow(dead_code)]

use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clipgrab_core::config::{DownloadSection, ResolverSection, WatermarkSection};
use clipgrab_core::resolver::{FixtureResponse, FixtureSourceProvider};
use clipgrab_core::{
    AcquisitionPipeline, CommandExecutor, PipelinePaths, SourceResolver, StreamDownloader,
    WatermarkProcessor,
};
use serde_json::json;
use tempfile::TempDir;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
#[cfg(windows)]
use std::os::windows::process::ExitStatusExt;

pub const SHORT_LINK: &str = "https://b23.tv/abc123";
pub const VIDEO_PAGE: &str = "https://www.bilibili.com/video/BV1GJ411x7h7?share_source=copy_web";
pub const VIEW_API: &str = "https://api.bilibili.com/x/web-interface/view";
pub const PLAYURL_API: &str = "https://api.bilibili.com/x/player/playurl";

/// Two megabytes that sniff as ISO-BMFF.
pub fn mp4_payload() -> Vec<u8> {
    let mut body = b"\0\0\0\x20ftypisom\0\0\x02\0isomiso2avc1mp41".to_vec();
    body.resize(2 * 1024 * 1024, 0x5a);
    body
}

/// Bilibili fixtures whose play address points at `media_url`.
pub fn bilibili_fixtures(media_url: &str) -> FixtureSourceProvider {
    FixtureSourceProvider::default()
        .with_redirect(SHORT_LINK, VIDEO_PAGE)
        .with_response(
            VIEW_API,
            FixtureResponse::json(json!({
                "code": 0,
                "data": {"cid": 279786, "title": "night market walk", "duration": 184}
            })),
        )
        .with_response(
            PLAYURL_API,
            FixtureResponse::json(json!({
                "code": 0,
                "data": {"format": "mp4720", "durl": [{"url": media_url, "backup_url": []}]}
            })),
        )
}

#[derive(Clone, Default)]
pub struct EncoderCalls(Arc<Mutex<Vec<Vec<String>>>>);

impl EncoderCalls {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Pretends to be ffmpeg: writes a small mp4 to the last argument.
pub struct HealthyEncoder {
    pub calls: EncoderCalls,
}

#[async_trait]
impl CommandExecutor for HealthyEncoder {
    async fn run(&self, _program: &Path, args: &[String]) -> std::io::Result<ExitStatus> {
        self.calls.0.lock().unwrap().push(args.to_vec());
        let output = args.last().cloned().unwrap_or_default();
        std::fs::write(output, b"\0\0\0\x18ftypmp42cropped-output")?;
        Ok(ExitStatus::from_raw(0))
    }
}

pub fn paths(dir: &TempDir) -> PipelinePaths {
    PipelinePaths {
        work_root: dir.path().join("work"),
        output_dir: dir.path().join("output"),
        logs_dir: dir.path().join("logs"),
    }
}

pub fn pipeline(
    dir: &TempDir,
    provider: FixtureSourceProvider,
) -> (AcquisitionPipeline, Arc<FixtureSourceProvider>, EncoderCalls) {
    let provider = Arc::new(provider);
    let calls = EncoderCalls::default();
    let processor = WatermarkProcessor::new(WatermarkSection::default()).with_executor(Arc::new(
        HealthyEncoder {
            calls: calls.clone(),
        },
    ));
    let pipeline = AcquisitionPipeline::new(
        SourceResolver::new(provider.clone(), ResolverSection::default()),
        StreamDownloader::new(DownloadSection::default()).unwrap(),
        processor,
        paths(dir),
    );
    (pipeline, provider, calls)
}

pub fn entries(path: &Path) -> usize {
    std::fs::read_dir(path).map(|dir| dir.count()).unwrap_or(0)
}
