use std::collections::BTreeMap;

use serde::Serialize;
use url::Url;

use crate::link::Platform;

use super::error::StrategyError;

pub const USER_AGENT: &str = "User-Agent";
pub const ACCEPT: &str = "Accept";
pub const REFERER: &str = "Referer";
pub const COOKIE: &str = "Cookie";

const MEDIA_ACCEPT: &str = "*/*";

/// A playable media location plus everything needed to fetch it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSource {
    pub platform: Platform,
    pub media_url: String,
    pub request_headers: BTreeMap<String, String>,
    pub title: Option<String>,
    pub duration_seconds: Option<f64>,
    pub container_format: String,
    pub backup_urls: Vec<String>,
}

impl ResolvedSource {
    pub fn builder(platform: Platform, media_url: impl Into<String>) -> ResolvedSourceBuilder {
        ResolvedSourceBuilder {
            platform,
            media_url: media_url.into(),
            headers: BTreeMap::new(),
            title: None,
            duration_seconds: None,
            container_format: None,
            backup_urls: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.request_headers, name)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSourceBuilder {
    platform: Platform,
    media_url: String,
    headers: BTreeMap<String, String>,
    title: Option<String>,
    duration_seconds: Option<f64>,
    container_format: Option<String>,
    backup_urls: Vec<String>,
}

impl ResolvedSourceBuilder {
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
        self
    }

    pub fn duration_seconds(mut self, duration: Option<f64>) -> Self {
        self.duration_seconds = duration.filter(|value| value.is_finite() && *value > 0.0);
        self
    }

    pub fn container_format(mut self, format: impl Into<String>) -> Self {
        self.container_format = Some(format.into());
        self
    }

    pub fn backup_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backup_urls.extend(urls.into_iter().map(Into::into));
        self
    }

    /// Validates the media URL and fills in `User-Agent`/`Accept` when the
    /// strategy did not set them.
    pub fn build(self, default_user_agent: &str) -> Result<ResolvedSource, StrategyError> {
        let media_url = validate_media_url(&self.media_url)
            .ok_or_else(|| StrategyError::InvalidSource(self.media_url.clone()))?;

        let mut request_headers = self.headers;
        if header_value(&request_headers, USER_AGENT).is_none() {
            request_headers.insert(USER_AGENT.into(), default_user_agent.into());
        }
        if header_value(&request_headers, ACCEPT).is_none() {
            request_headers.insert(ACCEPT.into(), MEDIA_ACCEPT.into());
        }

        let mut backup_urls: Vec<String> = Vec::new();
        for candidate in &self.backup_urls {
            if let Some(valid) = validate_media_url(candidate) {
                if valid != media_url && !backup_urls.contains(&valid) {
                    backup_urls.push(valid);
                }
            }
        }

        let container_format = self
            .container_format
            .unwrap_or_else(|| guess_container(&media_url).to_string());

        Ok(ResolvedSource {
            platform: self.platform,
            media_url,
            request_headers,
            title: self.title,
            duration_seconds: self.duration_seconds,
            container_format,
            backup_urls,
        })
    }
}

fn header_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Accepts absolute http(s) URLs; protocol-relative `//host/...` is upgraded to https.
pub fn validate_media_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let candidate = if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else {
        trimmed.to_string()
    };
    let parsed = Url::parse(&candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed.to_string())
}

fn guess_container(media_url: &str) -> &'static str {
    let path = Url::parse(media_url)
        .map(|url| url.path().to_ascii_lowercase())
        .unwrap_or_default();
    if path.ends_with(".flv") {
        "flv"
    } else if path.ends_with(".webm") {
        "webm"
    } else if path.ends_with(".ts") {
        "ts"
    } else {
        "mp4"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_injects_default_headers() {
        let source = ResolvedSource::builder(Platform::Bilibili, "https://cdn.example.com/v.flv?e=1")
            .header(REFERER, "https://www.bilibili.com")
            .title(Some("  demo  ".into()))
            .duration_seconds(Some(12.5))
            .build("ua/1.0")
            .unwrap();
        assert_eq!(source.header("user-agent"), Some("ua/1.0"));
        assert_eq!(source.header(ACCEPT), Some("*/*"));
        assert_eq!(source.header(REFERER), Some("https://www.bilibili.com"));
        assert_eq!(source.title.as_deref(), Some("demo"));
        assert_eq!(source.container_format, "flv");
    }

    #[test]
    fn strategy_headers_are_kept() {
        let source = ResolvedSource::builder(Platform::Tiktok, "https://cdn.example.com/v.mp4")
            .header("user-agent", "custom")
            .build("ua/1.0")
            .unwrap();
        assert_eq!(source.header(USER_AGENT), Some("custom"));
        assert_eq!(source.request_headers.len(), 2);
    }

    #[test]
    fn rejects_non_http_urls() {
        for raw in ["", "not a url", "ftp://cdn.example.com/v.mp4", "/relative/path.mp4"] {
            assert!(
                ResolvedSource::builder(Platform::Douyin, raw).build("ua").is_err(),
                "{raw:?}"
            );
        }
        let upgraded = ResolvedSource::builder(Platform::Douyin, "//cdn.example.com/v.mp4")
            .build("ua")
            .unwrap();
        assert_eq!(upgraded.media_url, "https://cdn.example.com/v.mp4");
    }

    #[test]
    fn invalid_and_duplicate_mirrors_are_dropped() {
        let source = ResolvedSource::builder(Platform::Bilibili, "https://a.example.com/v.mp4")
            .backup_urls([
                "https://a.example.com/v.mp4",
                "https://b.example.com/v.mp4",
                "garbage",
                "https://b.example.com/v.mp4",
            ])
            .build("ua")
            .unwrap();
        assert_eq!(source.backup_urls, vec!["https://b.example.com/v.mp4"]);
    }
}
