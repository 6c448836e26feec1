use std::path::PathBuf;

use thiserror::Error;

use crate::fallback::StrategyFailure;

pub type DownloadResult<T> = Result<T, DownloadError>;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} redirected more than {limit} times")]
    TooManyRedirects { url: String, limit: usize },
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("{url} answered with an empty HTML page ({content_type})")]
    NotMedia { url: String, content_type: String },
    #[error("{url} returned an empty body")]
    EmptyBody { url: String },
    #[error("{url} exceeds the {limit} byte ceiling")]
    TooLarge { url: String, limit: u64 },
    #[error("invalid request header {name}")]
    InvalidHeader { name: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("download failed after {attempts} attempt(s); last round: {}", join(.failures))]
    Exhausted {
        attempts: u32,
        failures: Vec<StrategyFailure<DownloadError>>,
    },
}

impl DownloadError {
    pub(crate) fn network(url: &str, error: reqwest::Error, redirect_limit: usize) -> Self {
        if error.is_timeout() {
            DownloadError::Timeout { url: url.to_string() }
        } else if error.is_redirect() {
            DownloadError::TooManyRedirects {
                url: url.to_string(),
                limit: redirect_limit,
            }
        } else {
            DownloadError::Network {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }

    /// Errors that stop all further candidates and attempts.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadError::NotMedia { .. }
                | DownloadError::TooLarge { .. }
                | DownloadError::InvalidHeader { .. }
                | DownloadError::Io { .. }
        )
    }

    pub fn last_status(&self) -> Option<u16> {
        match self {
            DownloadError::HttpStatus { status, .. } => Some(*status),
            DownloadError::Exhausted { failures, .. } => failures
                .iter()
                .rev()
                .find_map(|failure| failure.error.last_status()),
            _ => None,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            DownloadError::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

fn join(failures: &[StrategyFailure<DownloadError>]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
