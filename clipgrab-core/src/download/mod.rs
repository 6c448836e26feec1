pub mod error;
pub mod types;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::DownloadSection;
use crate::container::sniff_file;
use crate::fallback::{first_success, BoxedStrategy, FallbackExhausted, Strategy};
use crate::progress::{ProgressSink, ProgressStage};
use crate::resolver::ResolvedSource;
use crate::retry::RetryPolicy;

pub use error::{DownloadError, DownloadResult};
pub use types::DownloadOutcome;

use types::StreamedBody;

type CandidateStrategy = BoxedStrategy<Transfer, StreamedBody, DownloadError>;

/// Streams a resolved source to disk, varying headers and hosts between tries.
pub struct StreamDownloader {
    client: Client,
    config: DownloadSection,
    retry_policy: RetryPolicy,
}

impl StreamDownloader {
    pub fn new(config: DownloadSection) -> DownloadResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .redirect(Policy::limited(config.max_redirects))
            .build()
            .map_err(|error| DownloadError::Network {
                url: String::new(),
                reason: error.to_string(),
            })?;
        let retry_policy = RetryPolicy::linear(
            config.max_attempts,
            Duration::from_secs(config.backoff_step_seconds),
        )
        .with_sleep_cap(Duration::from_secs(config.backoff_cap_seconds));
        Ok(Self {
            client,
            config,
            retry_policy,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub async fn download(
        &self,
        source: &ResolvedSource,
        dest: &Path,
        progress: &ProgressSink,
    ) -> DownloadResult<DownloadOutcome> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }

        let candidates = self.candidates(source)?;
        let transfer = Transfer {
            client: self.client.clone(),
            dest: dest.to_path_buf(),
            max_bytes: self.config.max_bytes,
            read_timeout: Duration::from_secs(self.config.read_timeout_seconds.max(1)),
            max_redirects: self.config.max_redirects,
            progress_step: self.config.progress_step_percent.max(1),
            progress: progress.clone(),
        };

        let candidates = &candidates;
        let transfer_ref = &transfer;
        let outcome = self
            .retry_policy
            .run(
                "download",
                |attempt| async move {
                    debug!(attempt, candidates = candidates.len(), "download attempt started");
                    first_success("download", candidates, transfer_ref, DownloadError::is_terminal)
                        .await
                },
                |exhausted: &FallbackExhausted<DownloadError>| !exhausted.aborted,
            )
            .await;

        let (success, attempts) = match outcome {
            Ok(outcome) => (outcome.result, outcome.attempts),
            Err(mut failure) => {
                remove_partial(dest).await;
                if failure.error.aborted {
                    if let Some(terminal) = failure.error.failures.pop() {
                        return Err(terminal.error);
                    }
                }
                return Err(DownloadError::Exhausted {
                    attempts: failure.attempts,
                    failures: failure.error.failures,
                });
            }
        };

        let detected = sniff_file(dest).await.map_err(|source| DownloadError::Io {
            source,
            path: dest.to_path_buf(),
        })?;
        if detected.is_none() {
            warn!(
                path = %dest.display(),
                content_type = ?success.value.content_type,
                "downloaded bytes match no known container signature"
            );
        }
        info!(
            bytes = success.value.byte_size,
            variant = %success.strategy,
            attempts,
            "download finished"
        );

        Ok(DownloadOutcome {
            local_path: dest.to_path_buf(),
            byte_size: success.value.byte_size,
            declared_content_type: success.value.content_type,
            header_signature_match: detected.is_some(),
            detected_container: detected,
            source_url: success.value.url,
            variant: success.strategy,
            attempts,
        })
    }

    /// Primary headers, then the alternate user agent, then mirrors.
    fn candidates(&self, source: &ResolvedSource) -> DownloadResult<Vec<CandidateStrategy>> {
        let primary = header_map(&source.request_headers)?;
        let mut candidates: Vec<CandidateStrategy> = vec![Box::new(Candidate {
            label: "primary".into(),
            url: source.media_url.clone(),
            headers: primary.clone(),
        })];

        let secondary_agent = self.config.secondary_user_agent.trim();
        let current_agent = primary.get(USER_AGENT).and_then(|value| value.to_str().ok());
        if !secondary_agent.is_empty() && current_agent != Some(secondary_agent) {
            let mut secondary = primary.clone();
            let value = HeaderValue::from_str(secondary_agent).map_err(|_| {
                DownloadError::InvalidHeader {
                    name: USER_AGENT.to_string(),
                }
            })?;
            secondary.insert(USER_AGENT, value);
            candidates.push(Box::new(Candidate {
                label: "secondary".into(),
                url: source.media_url.clone(),
                headers: secondary,
            }));
        }

        for (index, mirror) in source
            .backup_urls
            .iter()
            .take(self.config.max_mirrors)
            .enumerate()
        {
            candidates.push(Box::new(Candidate {
                label: format!("mirror-{}", index + 1),
                url: mirror.clone(),
                headers: primary.clone(),
            }));
        }
        Ok(candidates)
    }
}

fn header_map(headers: &std::collections::BTreeMap<String, String>) -> DownloadResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let invalid = || DownloadError::InvalidHeader { name: name.clone() };
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.insert(name, value);
    }
    Ok(map)
}

async fn remove_partial(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %error, "failed to remove partial download");
        }
    }
}

/// Shared state for every candidate within one download.
struct Transfer {
    client: Client,
    dest: PathBuf,
    max_bytes: u64,
    /// Applied per read, so a slow but steady body never times out.
    read_timeout: Duration,
    max_redirects: usize,
    progress_step: u8,
    progress: ProgressSink,
}

struct Candidate {
    label: String,
    url: String,
    headers: HeaderMap,
}

#[async_trait]
impl Strategy<Transfer> for Candidate {
    type Output = StreamedBody;
    type Error = DownloadError;

    fn label(&self) -> String {
        self.label.clone()
    }

    async fn attempt(&self, transfer: &Transfer) -> DownloadResult<StreamedBody> {
        let result = stream_to_file(transfer, &self.url, &self.headers).await;
        if result.is_err() {
            remove_partial(&transfer.dest).await;
        }
        result
    }
}

async fn stream_to_file(
    transfer: &Transfer,
    url: &str,
    headers: &HeaderMap,
) -> DownloadResult<StreamedBody> {
    let request = transfer.client.get(url).headers(headers.clone()).send();
    let response = timeout(transfer.read_timeout, request)
        .await
        .map_err(|_| DownloadError::Timeout {
            url: url.to_string(),
        })?
        .map_err(|error| DownloadError::network(url, error, transfer.max_redirects))?;

    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let total = response.content_length().filter(|length| *length > 0);
    if let Some(length) = total {
        if length > transfer.max_bytes {
            return Err(DownloadError::TooLarge {
                url: url.to_string(),
                limit: transfer.max_bytes,
            });
        }
    }
    let final_url = response.url().to_string();

    let mut file = fs::File::create(&transfer.dest)
        .await
        .map_err(|source| DownloadError::Io {
            source,
            path: transfer.dest.clone(),
        })?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let mut reported: u8 = 0;
    loop {
        let next = timeout(transfer.read_timeout, stream.next())
            .await
            .map_err(|_| DownloadError::Timeout {
                url: url.to_string(),
            })?;
        let Some(chunk) = next else {
            break;
        };
        let data =
            chunk.map_err(|error| DownloadError::network(url, error, transfer.max_redirects))?;
        written += data.len() as u64;
        if written > transfer.max_bytes {
            return Err(DownloadError::TooLarge {
                url: url.to_string(),
                limit: transfer.max_bytes,
            });
        }
        file.write_all(&data)
            .await
            .map_err(|source| DownloadError::Io {
                source,
                path: transfer.dest.clone(),
            })?;
        if let Some(total) = total {
            let percent = (written.saturating_mul(100) / total).min(100) as u8;
            if percent >= reported.saturating_add(transfer.progress_step) {
                reported = percent;
                transfer.progress.emit(ProgressStage::Downloading, percent);
            }
        }
    }
    file.flush().await.map_err(|source| DownloadError::Io {
        source,
        path: transfer.dest.clone(),
    })?;

    if written == 0 {
        let html = content_type
            .as_deref()
            .map(|value| value.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false);
        if html {
            return Err(DownloadError::NotMedia {
                url: url.to_string(),
                content_type: content_type.unwrap_or_default(),
            });
        }
        return Err(DownloadError::EmptyBody {
            url: url.to_string(),
        });
    }

    Ok(StreamedBody {
        byte_size: written,
        content_type,
        url: final_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Platform;
    use crate::retry::Backoff;
    use tempfile::TempDir;

    const PRIMARY_UA: &str = "primary-agent/1.0";
    const SECONDARY_UA: &str = "secondary-agent/2.0";

    fn mp4_bytes(len: usize) -> Vec<u8> {
        let mut body = vec![0u8, 0, 0, 0x20];
        body.extend_from_slice(b"ftypisom");
        body.resize(len, 7);
        body
    }

    fn downloader(max_bytes: u64) -> StreamDownloader {
        let config = DownloadSection {
            max_attempts: 3,
            max_bytes,
            secondary_user_agent: SECONDARY_UA.into(),
            ..DownloadSection::default()
        };
        StreamDownloader::new(config)
            .unwrap()
            .with_retry_policy(RetryPolicy::new(3, Backoff::None))
    }

    /// One candidate, one attempt.
    fn single_shot(config: DownloadSection) -> StreamDownloader {
        let config = DownloadSection {
            secondary_user_agent: String::new(),
            ..config
        };
        StreamDownloader::new(config)
            .unwrap()
            .with_retry_policy(RetryPolicy::new(1, Backoff::None))
    }

    fn source(url: String, mirrors: Vec<String>) -> ResolvedSource {
        ResolvedSource::builder(Platform::Bilibili, url)
            .header("User-Agent", PRIMARY_UA)
            .backup_urls(mirrors)
            .build("unused")
            .unwrap()
    }

    #[tokio::test]
    async fn secondary_variant_rescues_blocked_primary() {
        let mut server = mockito::Server::new_async().await;
        let blocked = server
            .mock("GET", "/v.mp4")
            .match_header("user-agent", PRIMARY_UA)
            .with_status(403)
            .expect(1)
            .create_async()
            .await;
        let allowed = server
            .mock("GET", "/v.mp4")
            .match_header("user-agent", SECONDARY_UA)
            .with_status(200)
            .with_header("content-type", "video/mp4")
            .with_body(mp4_bytes(4096))
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.mp4");
        let outcome = downloader(1 << 20)
            .download(
                &source(format!("{}/v.mp4", server.url()), Vec::new()),
                &dest,
                &ProgressSink::disabled(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.variant, "secondary");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.byte_size, 4096);
        assert!(outcome.header_signature_match);
        assert_eq!(outcome.declared_content_type.as_deref(), Some("video/mp4"));
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 4096);
        blocked.assert_async().await;
        allowed.assert_async().await;
    }

    #[tokio::test]
    async fn mirrors_are_tried_and_calls_stay_within_budget() {
        let mut server = mockito::Server::new_async().await;
        let primary = server
            .mock("GET", "/v.mp4")
            .with_status(503)
            .expect(6)
            .create_async()
            .await;
        let mirror = server
            .mock("GET", "/mirror.mp4")
            .with_status(404)
            .expect(3)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.mp4");
        let error = downloader(1 << 20)
            .download(
                &source(
                    format!("{}/v.mp4", server.url()),
                    vec![format!("{}/mirror.mp4", server.url())],
                ),
                &dest,
                &ProgressSink::disabled(),
            )
            .await
            .unwrap_err();

        match &error {
            DownloadError::Exhausted { attempts, failures } => {
                assert_eq!(*attempts, 3);
                let labels: Vec<_> = failures.iter().map(|f| f.strategy.as_str()).collect();
                assert_eq!(labels, vec!["primary", "secondary", "mirror-1"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(error.last_status(), Some(404));
        assert!(!dest.exists());
        primary.assert_async().await;
        mirror.assert_async().await;
    }

    #[tokio::test]
    async fn ceiling_is_terminal_and_removes_partial_file() {
        let mut server = mockito::Server::new_async().await;
        let oversized = server
            .mock("GET", "/big.mp4")
            .with_status(200)
            .with_body(mp4_bytes(8192))
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.mp4");
        let error = downloader(1024)
            .download(
                &source(format!("{}/big.mp4", server.url()), Vec::new()),
                &dest,
                &ProgressSink::disabled(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, DownloadError::TooLarge { limit: 1024, .. }));
        assert!(!dest.exists());
        oversized.assert_async().await;
    }

    #[tokio::test]
    async fn empty_html_response_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let page = server
            .mock("GET", "/v.mp4")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.mp4");
        let error = downloader(1 << 20)
            .download(
                &source(format!("{}/v.mp4", server.url()), Vec::new()),
                &dest,
                &ProgressSink::disabled(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, DownloadError::NotMedia { .. }));
        page.assert_async().await;
    }

    #[tokio::test]
    async fn unrecognized_bytes_are_kept_and_flagged() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v.mp4")
            .with_status(206)
            .with_body("<html>not really a video</html>")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.mp4");
        let outcome = downloader(1 << 20)
            .download(
                &source(format!("{}/v.mp4", server.url()), Vec::new()),
                &dest,
                &ProgressSink::disabled(),
            )
            .await
            .unwrap();
        assert!(!outcome.header_signature_match);
        assert_eq!(outcome.detected_container, None);
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn redirect_chain_beyond_the_cap_fails() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let mut hops = Vec::new();
        for hop in 0..3 {
            hops.push(
                server
                    .mock("GET", format!("/hop{hop}").as_str())
                    .with_status(302)
                    .with_header("location", &format!("{base}/hop{}", hop + 1))
                    .expect(1)
                    .create_async()
                    .await,
            );
        }
        let landing = server
            .mock("GET", "/hop3")
            .with_status(200)
            .with_body(mp4_bytes(1024))
            .expect(0)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.mp4");
        let config = DownloadSection {
            max_redirects: 2,
            ..DownloadSection::default()
        };
        let error = single_shot(config)
            .download(
                &source(format!("{base}/hop0"), Vec::new()),
                &dest,
                &ProgressSink::disabled(),
            )
            .await
            .unwrap_err();

        match &error {
            DownloadError::Exhausted { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(
                    failures[0].error,
                    DownloadError::TooManyRedirects { limit: 2, .. }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dest.exists());
        for hop in &hops {
            hop.assert_async().await;
        }
        landing.assert_async().await;
    }

    #[tokio::test]
    async fn stalled_body_times_out_per_read() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: video/mp4\r\ncontent-length: 4096\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&mp4_bytes(64)).await.unwrap();
            socket.flush().await.unwrap();
            // never finish the body
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.mp4");
        let config = DownloadSection {
            read_timeout_seconds: 1,
            ..DownloadSection::default()
        };
        let error = single_shot(config)
            .download(
                &source(format!("http://{addr}/v.mp4"), Vec::new()),
                &dest,
                &ProgressSink::disabled(),
            )
            .await
            .unwrap_err();

        match &error {
            DownloadError::Exhausted { failures, .. } => {
                assert!(matches!(failures[0].error, DownloadError::Timeout { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dest.exists());
        server.abort();
    }
}
