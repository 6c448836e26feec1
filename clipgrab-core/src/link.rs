use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const URL_CHARS: &str = r"[A-Za-z0-9\-._~:/?#\[\]@!$&'()*+,;=%]";
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', '\'', ']'];

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("unsupported link: {input}")]
    Unsupported { input: String },
    #[error("link {url} matches several platform signatures: {platforms:?}")]
    AmbiguousSignature { url: String, platforms: Vec<Platform> },
}

pub type LinkResult<T> = Result<T, LinkError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Bilibili,
    Douyin,
    Kuaishou,
    Tiktok,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Bilibili,
        Platform::Douyin,
        Platform::Kuaishou,
        Platform::Tiktok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Bilibili => "bilibili",
            Platform::Douyin => "douyin",
            Platform::Kuaishou => "kuaishou",
            Platform::Tiktok => "tiktok",
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        match self {
            Platform::Bilibili => RiskLevel::Medium,
            Platform::Douyin | Platform::Kuaishou | Platform::Tiktok => RiskLevel::High,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bilibili" => Ok(Self::Bilibili),
            "douyin" => Ok(Self::Douyin),
            "kuaishou" => Ok(Self::Kuaishou),
            "tiktok" => Ok(Self::Tiktok),
            other => Err(LinkError::Unsupported {
                input: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedLink {
    pub platform: Platform,
    pub raw_url: String,
    pub normalized_url: String,
    pub is_short_form: bool,
}

/// Patterns for one platform. `identifier` captures the content id in group 1
/// and also covers the hosts short links expand to.
#[derive(Debug, Clone)]
pub struct PlatformSignature {
    pub platform: Platform,
    long_form: Regex,
    short_form: Regex,
    identifier: Regex,
    canonical_prefix: &'static str,
}

impl PlatformSignature {
    pub fn new(
        platform: Platform,
        long_form: &str,
        short_form: &str,
        identifier: &str,
        canonical_prefix: &'static str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            platform,
            long_form: Regex::new(long_form)?,
            short_form: Regex::new(short_form)?,
            identifier: Regex::new(identifier)?,
            canonical_prefix,
        })
    }

    pub fn builtin(platform: Platform) -> Self {
        let built = match platform {
            Platform::Bilibili => Self::new(
                platform,
                r"(?i)^https?://(?:[\w-]+\.)*bilibili\.com/video/(BV[0-9A-Za-z]{10})",
                r"(?i)^https?://b23\.tv/[A-Za-z0-9_-]+",
                r"(?i)bilibili\.com/video/(BV[0-9A-Za-z]{10})",
                "https://www.bilibili.com/video/",
            ),
            Platform::Douyin => Self::new(
                platform,
                r"(?i)^https?://(?:[\w-]+\.)*(?:douyin|iesdouyin)\.com/(?:share/)?video/(\d+)",
                r"(?i)^https?://v\.douyin\.com/[A-Za-z0-9_-]+",
                r"(?i)(?:douyin|iesdouyin)\.com/(?:share/)?(?:video|note)/(\d+)",
                "https://www.douyin.com/video/",
            ),
            Platform::Kuaishou => Self::new(
                platform,
                r"(?i)^https?://(?:[\w-]+\.)*kuaishou\.com/short-video/([0-9A-Za-z]+)",
                r"(?i)^https?://v\.kuaishou\.com/[A-Za-z0-9_-]+",
                r"(?i)(?:kuaishou\.com/short-video|chenzhongtech\.com/fw/photo|kuaishou\.com/fw/photo)/([0-9A-Za-z]+)",
                "https://www.kuaishou.com/short-video/",
            ),
            Platform::Tiktok => Self::new(
                platform,
                r"(?i)^https?://(?:[\w-]+\.)*tiktok\.com/@[\w.-]+/video/(\d+)",
                r"(?i)^https?://(?:vm|vt)\.tiktok\.com/[A-Za-z0-9_-]+",
                r"(?i)tiktok\.com/@[\w.-]*/video/(\d+)",
                "https://www.tiktok.com/@_/video/",
            ),
        };
        built.expect("valid builtin signature")
    }

    pub fn matches_long_form(&self, url: &str) -> bool {
        self.long_form.is_match(url)
    }

    pub fn matches_short_form(&self, url: &str) -> bool {
        self.short_form.is_match(url)
    }

    pub fn extract_id(&self, url: &str) -> Option<String> {
        self.identifier
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
    }

    pub fn canonical_url(&self, id: &str) -> String {
        format!("{}{}", self.canonical_prefix, id)
    }
}

#[derive(Debug, Clone)]
pub struct LinkClassifier {
    signatures: Vec<PlatformSignature>,
    url_token: Regex,
    bare_token: Regex,
}

impl Default for LinkClassifier {
    fn default() -> Self {
        Self::with_signatures(
            Platform::ALL
                .iter()
                .map(|platform| PlatformSignature::builtin(*platform))
                .collect(),
        )
    }
}

impl LinkClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signatures(signatures: Vec<PlatformSignature>) -> Self {
        let url_token = Regex::new(&format!(r"(?i)https?://{URL_CHARS}+")).expect("valid regex");
        let bare_token = Regex::new(&format!(
            r"(?i)(?:[A-Za-z0-9-]+\.)+[A-Za-z]{{2,}}(?:/{URL_CHARS}*)?"
        ))
        .expect("valid regex");
        Self {
            signatures,
            url_token,
            bare_token,
        }
    }

    pub fn signature(&self, platform: Platform) -> Option<&PlatformSignature> {
        self.signatures
            .iter()
            .find(|signature| signature.platform == platform)
    }

    /// Pulls the first URL-shaped token out of pasted share text and makes sure it has a scheme.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(found) = self.url_token.find(trimmed) {
            return Some(strip_trailing(found.as_str()).to_string());
        }
        self.bare_token
            .find(trimmed)
            .map(|found| format!("https://{}", strip_trailing(found.as_str())))
    }

    pub fn classify(&self, raw: &str) -> LinkResult<ClassifiedLink> {
        let normalized = self.normalize(raw).ok_or_else(|| LinkError::Unsupported {
            input: raw.trim().to_string(),
        })?;

        let mut matched: Vec<(Platform, bool, bool)> = Vec::new();
        for signature in &self.signatures {
            let long = signature.matches_long_form(&normalized);
            let short = signature.matches_short_form(&normalized);
            if (long || short) && !matched.iter().any(|(p, _, _)| *p == signature.platform) {
                matched.push((signature.platform, long, short));
            }
        }

        match matched.as_slice() {
            [] => Err(LinkError::Unsupported { input: normalized }),
            [(platform, long, short)] => Ok(ClassifiedLink {
                platform: *platform,
                raw_url: raw.to_string(),
                normalized_url: normalized,
                is_short_form: *short && !*long,
            }),
            _ => Err(LinkError::AmbiguousSignature {
                url: normalized,
                platforms: matched.iter().map(|(platform, _, _)| *platform).collect(),
            }),
        }
    }
}

fn strip_trailing(token: &str) -> &str {
    token.trim_end_matches(TRAILING_PUNCTUATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_long_and_short_links() {
        let classifier = LinkClassifier::new();
        let samples = [
            ("https://www.bilibili.com/video/BV1xx411c7mu", Platform::Bilibili, false),
            ("https://b23.tv/abc123", Platform::Bilibili, true),
            ("https://www.douyin.com/share/video/7301234567890123456", Platform::Douyin, false),
            ("https://www.iesdouyin.com/share/video/7301234567890123456/", Platform::Douyin, false),
            ("https://v.douyin.com/iRNBho5/", Platform::Douyin, true),
            ("https://www.kuaishou.com/short-video/3xg9abcd1234", Platform::Kuaishou, false),
            ("https://v.kuaishou.com/KxYz12", Platform::Kuaishou, true),
            ("https://www.tiktok.com/@some.user/video/7234567890123456789", Platform::Tiktok, false),
            ("https://vm.tiktok.com/ZMabc123/", Platform::Tiktok, true),
            ("https://vt.tiktok.com/ZSxyz/", Platform::Tiktok, true),
        ];
        for (link, platform, short) in samples {
            let classified = classifier.classify(link).unwrap();
            assert_eq!(classified.platform, platform, "{link}");
            assert_eq!(classified.is_short_form, short, "{link}");
        }
    }

    #[test]
    fn strips_share_text_and_adds_scheme() {
        let classifier = LinkClassifier::new();
        let shared = "7.43 复制打开抖音，看看【某某的作品】 https://v.douyin.com/iRNBho5/ 复制此链接";
        let classified = classifier.classify(shared).unwrap();
        assert_eq!(classified.platform, Platform::Douyin);
        assert_eq!(classified.normalized_url, "https://v.douyin.com/iRNBho5/");
        assert_eq!(classified.raw_url, shared);

        let bare = classifier.classify("  b23.tv/abc123 ").unwrap();
        assert_eq!(bare.normalized_url, "https://b23.tv/abc123");
        assert!(bare.is_short_form);

        let punctuated = classifier
            .classify("watch this: https://www.bilibili.com/video/BV1xx411c7mu.")
            .unwrap();
        assert_eq!(
            punctuated.normalized_url,
            "https://www.bilibili.com/video/BV1xx411c7mu"
        );
    }

    #[test]
    fn rejects_unknown_and_empty_input() {
        let classifier = LinkClassifier::new();
        for input in [
            "",
            "   ",
            "https://www.youtube.com/watch?v=abc",
            "no link here at all",
            "https://example.com/?next=https://www.bilibili.com/video/BV1xx411c7mu",
        ] {
            assert!(
                matches!(classifier.classify(input), Err(LinkError::Unsupported { .. })),
                "{input:?}"
            );
        }
    }

    #[test]
    fn overlapping_signatures_are_a_configuration_error() {
        let overlapping = PlatformSignature::new(
            Platform::Kuaishou,
            r"^https?://b23\.tv/(\w+)",
            r"^$",
            r"b23\.tv/(\w+)",
            "https://b23.tv/",
        )
        .unwrap();
        let classifier = LinkClassifier::with_signatures(vec![
            PlatformSignature::builtin(Platform::Bilibili),
            overlapping,
        ]);
        match classifier.classify("https://b23.tv/abc123") {
            Err(LinkError::AmbiguousSignature { platforms, .. }) => {
                assert_eq!(platforms, vec![Platform::Bilibili, Platform::Kuaishou]);
            }
            other => panic!("expected ambiguity error, got {other:?}"),
        }
    }

    #[test]
    fn extracted_ids_round_trip_through_canonical_urls() {
        let samples = [
            (Platform::Bilibili, "https://m.bilibili.com/video/BV1xx411c7mu?p=1"),
            (Platform::Douyin, "https://www.iesdouyin.com/share/video/7301234567890123456/?region=CN"),
            (Platform::Kuaishou, "https://www.kuaishou.com/short-video/3xg9abcd1234?authorId=x"),
            (Platform::Kuaishou, "https://v.m.chenzhongtech.com/fw/photo/3xg9abcd1234?fid=1"),
            (Platform::Tiktok, "https://www.tiktok.com/@some.user/video/7234567890123456789?lang=en"),
        ];
        for (platform, url) in samples {
            let signature = PlatformSignature::builtin(platform);
            let id = signature.extract_id(url).unwrap();
            let canonical = signature.canonical_url(&id);
            assert_eq!(signature.extract_id(&canonical).as_deref(), Some(id.as_str()));
            assert_eq!(
                signature.canonical_url(&signature.extract_id(&canonical).unwrap()),
                canonical
            );
        }
    }

    #[test]
    fn risk_levels_follow_platform() {
        assert_eq!(Platform::Bilibili.risk_level(), RiskLevel::Medium);
        assert_eq!(Platform::Tiktok.risk_level(), RiskLevel::High);
        assert_eq!("douyin".parse::<Platform>().unwrap(), Platform::Douyin);
    }
}
