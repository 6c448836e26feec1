//! Where resolver strategies get their upstream bytes from: the live HTTP
//! provider, or a fixture provider for demo mode and tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::ResolverSection;

use super::error::{ProviderError, ProviderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub json_body: Option<serde_json::Value>,
}

impl ProviderRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            json_body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            json_body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Follows redirects from a short link and returns the final URL.
    async fn expand(&self, url: &str, headers: &BTreeMap<String, String>) -> ProviderResult<String>;

    async fn fetch(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse>;
}

pub struct HttpSourceProvider {
    client: Client,
    expand_client: Client,
}

impl HttpSourceProvider {
    pub fn new(config: &ResolverSection) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.expand_timeout())
            .redirect(Policy::limited(config.max_redirects))
            .build()?;
        let expand_client = Client::builder()
            .timeout(config.expand_timeout())
            .redirect(Policy::limited(config.max_redirects))
            .build()?;
        Ok(Self {
            client,
            expand_client,
        })
    }

    async fn expand_with_get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> ProviderResult<String> {
        let response = with_headers(self.expand_client.get(url), headers)
            .send()
            .await?;
        Ok(response.url().to_string())
    }
}

#[async_trait]
impl SourceProvider for HttpSourceProvider {
    async fn expand(&self, url: &str, headers: &BTreeMap<String, String>) -> ProviderResult<String> {
        match with_headers(self.expand_client.head(url), headers).send().await {
            Ok(response) if response.status() != StatusCode::METHOD_NOT_ALLOWED => {
                Ok(response.url().to_string())
            }
            Ok(_) => self.expand_with_get(url, headers).await,
            Err(error) if error.is_redirect() => Err(error.into()),
            Err(error) => {
                debug!(url, error = %error, "HEAD expansion failed, retrying with GET");
                self.expand_with_get(url, headers).await
            }
        }
    }

    async fn fetch(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        let mut builder = with_headers(builder, &request.headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        Ok(ProviderResponse {
            status,
            final_url,
            body,
        })
    }
}

fn with_headers(mut builder: RequestBuilder, headers: &BTreeMap<String, String>) -> RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureSet {
    #[serde(default)]
    pub redirects: BTreeMap<String, String>,
    #[serde(default)]
    pub responses: BTreeMap<String, FixtureResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureResponse {
    #[serde(default = "default_fixture_status")]
    pub status: u16,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub json: Option<serde_json::Value>,
}

fn default_fixture_status() -> u16 {
    200
}

impl FixtureResponse {
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            status: 200,
            body: None,
            json: Some(value),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(body.into()),
            json: None,
        }
    }

    fn render(&self) -> String {
        match (&self.json, &self.body) {
            (Some(value), _) => value.to_string(),
            (None, Some(body)) => body.clone(),
            (None, None) => String::new(),
        }
    }
}

/// Canned upstream responses keyed by URL. Query strings are ignored when no
/// exact match exists; unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct FixtureSourceProvider {
    fixtures: FixtureSet,
    calls: Mutex<Vec<String>>,
}

impl FixtureSourceProvider {
    pub fn new(fixtures: FixtureSet) -> Self {
        Self {
            fixtures,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let fixtures: FixtureSet = serde_json::from_str(&content)?;
        Ok(Self::new(fixtures))
    }

    pub fn with_redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.fixtures.redirects.insert(from.into(), to.into());
        self
    }

    pub fn with_response(mut self, url: impl Into<String>, response: FixtureResponse) -> Self {
        self.fixtures.responses.insert(url.into(), response);
        self
    }

    /// Every call seen so far, as `"<METHOD> <url>"`; expansions are recorded as `EXPAND`.
    pub fn requests(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, entry: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(entry);
        }
    }

    fn lookup(&self, url: &str) -> Option<&FixtureResponse> {
        self.fixtures.responses.get(url).or_else(|| {
            let without_query = url.split('?').next().unwrap_or(url);
            self.fixtures.responses.get(without_query)
        })
    }
}

#[async_trait]
impl SourceProvider for FixtureSourceProvider {
    async fn expand(&self, url: &str, _headers: &BTreeMap<String, String>) -> ProviderResult<String> {
        self.record(format!("EXPAND {url}"));
        self.fixtures
            .redirects
            .get(url)
            .or_else(|| self.fixtures.redirects.get(url.trim_end_matches('/')))
            .cloned()
            .ok_or_else(|| ProviderError::Fixture(format!("no redirect fixture for {url}")))
    }

    async fn fetch(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.record(format!("{} {}", request.method.as_str(), request.url));
        let response = match self.lookup(&request.url) {
            Some(fixture) => ProviderResponse {
                status: fixture.status,
                final_url: request.url.clone(),
                body: fixture.render(),
            },
            None => ProviderResponse {
                status: 404,
                final_url: request.url.clone(),
                body: String::new(),
            },
        };
        Ok(response)
    }
}
