use std::fmt;

use thiserror::Error;

use crate::fallback::StrategyFailure;
use crate::link::Platform;

pub type ProviderResult<T> = Result<T, ProviderError>;
pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("too many redirects while expanding {url}")]
    TooManyRedirects { url: String },
    #[error("fixture error: {0}")]
    Fixture(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        let url = error
            .url()
            .map(|url| url.to_string())
            .unwrap_or_default();
        if error.is_timeout() {
            ProviderError::Timeout { url }
        } else if error.is_redirect() {
            ProviderError::TooManyRedirects { url }
        } else {
            ProviderError::Network(error.to_string())
        }
    }
}

/// Why one resolution strategy gave up.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("upstream returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("upstream error code {code}: {message}")]
    Api { code: i64, message: String },
    #[error("no cookie configured for {0}")]
    MissingCookie(&'static str),
    #[error("unexpected payload: {0}")]
    Payload(String),
    #[error("invalid media source: {0}")]
    InvalidSource(String),
}

impl StrategyError {
    pub fn payload(reason: impl Into<String>) -> Self {
        StrategyError::Payload(reason.into())
    }

    pub fn last_status(&self) -> Option<u16> {
        match self {
            StrategyError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StrategyError {
    fn from(error: serde_json::Error) -> Self {
        StrategyError::Payload(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to expand short link {url}: {source}")]
    Expansion { url: String, source: ProviderError },
    #[error("no {platform} content id in {url}")]
    MissingIdentifier { platform: Platform, url: String },
    #[error("every {platform} strategy failed for {content_id}: {}", FailureList(.failures))]
    Exhausted {
        platform: Platform,
        content_id: String,
        failures: Vec<StrategyFailure<StrategyError>>,
    },
}

impl ResolveError {
    /// Labels of the strategies that ran, in order.
    pub fn strategies_tried(&self) -> Vec<&str> {
        match self {
            ResolveError::Exhausted { failures, .. } => failures
                .iter()
                .map(|failure| failure.strategy.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn last_status(&self) -> Option<u16> {
        match self {
            ResolveError::Exhausted { failures, .. } => failures
                .iter()
                .rev()
                .find_map(|failure| failure.error.last_status()),
            _ => None,
        }
    }
}

struct FailureList<'a>(&'a [StrategyFailure<StrategyError>]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
