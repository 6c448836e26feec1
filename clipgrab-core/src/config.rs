use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const IPHONE_USER_AGENT: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) AppleWebKit/605.1.15";
const ANDROID_USER_AGENT: &str =
    "Mozilla/5.0 (Android 10; Mobile; rv:81.0) Gecko/81.0 Firefox/81.0";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClipgrabConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub resolver: ResolverSection,
    #[serde(default)]
    pub download: DownloadSection,
    #[serde(default)]
    pub watermark: WatermarkSection,
    #[serde(default)]
    pub ledger: LedgerSection,
}

impl ClipgrabConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.work_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir)
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.storage_dir)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.logs_dir)
    }

    pub fn ledger_db(&self) -> PathBuf {
        self.resolve_path(&self.paths.ledger_db)
    }

    pub fn validate(&self) -> Result<()> {
        if self.download.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "download.max_attempts",
                reason: "must be greater than zero".into(),
            });
        }
        if self.download.max_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "download.max_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.resolver.desktop_user_agents.is_empty() {
            return Err(ConfigError::Invalid {
                field: "resolver.desktop_user_agents",
                reason: "at least one user agent is required".into(),
            });
        }
        if self.resolver.mobile_user_agents.is_empty() {
            return Err(ConfigError::Invalid {
                field: "resolver.mobile_user_agents",
                reason: "at least one user agent is required".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub work_dir: String,
    pub output_dir: String,
    pub storage_dir: String,
    pub logs_dir: String,
    pub ledger_db: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir()
                .join("clipgrab")
                .to_string_lossy()
                .to_string(),
            work_dir: "work".into(),
            output_dir: "output".into(),
            storage_dir: "storage".into(),
            logs_dir: "logs".into(),
            ledger_db: "tasks.sqlite".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSection {
    pub request_timeout_seconds: u64,
    pub expand_timeout_seconds: u64,
    pub max_redirects: usize,
    pub desktop_user_agents: Vec<String>,
    pub mobile_user_agents: Vec<String>,
    pub accept: String,
    pub bilibili_quality: u32,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

impl ResolverSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn expand_timeout(&self) -> Duration {
        Duration::from_secs(self.expand_timeout_seconds)
    }

    /// Cookie configured for a platform key such as `douyin`; blank values count as absent.
    pub fn cookie_for(&self, platform: &str) -> Option<&str> {
        self.cookies
            .get(platform)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            expand_timeout_seconds: 5,
            max_redirects: 5,
            desktop_user_agents: vec![DESKTOP_USER_AGENT.into()],
            mobile_user_agents: vec![IPHONE_USER_AGENT.into(), ANDROID_USER_AGENT.into()],
            accept: "application/json, text/plain, */*".into(),
            bilibili_quality: 64,
            cookies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub max_attempts: u32,
    pub backoff_step_seconds: u64,
    pub backoff_cap_seconds: u64,
    /// Longest wait for the response head or the next body chunk.
    pub read_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub max_bytes: u64,
    pub max_redirects: usize,
    pub secondary_user_agent: String,
    pub max_mirrors: usize,
    pub progress_step_percent: u8,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step_seconds: 2,
            backoff_cap_seconds: 60,
            read_timeout_seconds: 30,
            connect_timeout_seconds: 10,
            max_bytes: 100 * 1024 * 1024,
            max_redirects: 5,
            secondary_user_agent: ANDROID_USER_AGENT.into(),
            max_mirrors: 2,
            progress_step_percent: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropCorner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CropSection {
    pub corner: CropCorner,
    pub width: u32,
    pub height: u32,
}

impl Default for CropSection {
    fn default() -> Self {
        Self {
            corner: CropCorner::BottomRight,
            width: 100,
            height: 80,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncodeProfile {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatermarkSection {
    pub ffmpeg_path: String,
    pub timeout_seconds: u64,
    pub crop: CropSection,
    pub crop_encode: EncodeProfile,
    pub full_encode: EncodeProfile,
}

impl Default for WatermarkSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            timeout_seconds: 300,
            crop: CropSection::default(),
            crop_encode: EncodeProfile {
                video_codec: "libx264".into(),
                preset: "fast".into(),
                crf: 23,
                audio_codec: "copy".into(),
                audio_bitrate: None,
            },
            full_encode: EncodeProfile {
                video_codec: "libx264".into(),
                preset: "ultrafast".into(),
                crf: 30,
                audio_codec: "aac".into(),
                audio_bitrate: Some("128k".into()),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSection {
    pub expiry_hours: i64,
    pub stale_work_dir_minutes: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            expiry_hours: 24,
            stale_work_dir_minutes: 120,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClipgrabConfig> {
    let path = path.as_ref();
    let mut config: ClipgrabConfig = load_toml(path)?;
    let base = Path::new(&config.paths.base_dir);
    if base.is_relative() {
        if let Some(parent) = path.parent() {
            config.paths.base_dir = parent.join(base).to_string_lossy().to_string();
        }
    }
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
