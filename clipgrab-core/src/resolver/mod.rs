mod bilibili;
mod douyin;
pub mod error;
mod kuaishou;
mod payload;
pub mod provider;
mod tiktok;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ResolverSection;
use crate::fallback::{first_success, BoxedStrategy};
use crate::link::{ClassifiedLink, Platform, PlatformSignature, RiskLevel};

pub use error::{ProviderError, ProviderResult, ResolveError, ResolveResult, StrategyError};
pub use provider::{
    FixtureResponse, FixtureSet, FixtureSourceProvider, HttpSourceProvider, Method,
    ProviderRequest, ProviderResponse, SourceProvider,
};
pub use types::{ResolvedSource, ResolvedSourceBuilder, ACCEPT, COOKIE, REFERER, USER_AGENT};

pub type ResolveStrategy = BoxedStrategy<ResolveContext, ResolvedSource, StrategyError>;

/// Which user-agent pool a request should borrow from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Desktop,
    Mobile,
}

/// Everything a strategy needs for one resolution. Owned so strategies can be
/// boxed without lifetimes.
pub struct ResolveContext {
    pub platform: Platform,
    pub content_id: String,
    pub canonical_url: String,
    provider: Arc<dyn SourceProvider>,
    config: Arc<ResolverSection>,
    desktop_user_agent: String,
    mobile_user_agent: String,
}

impl ResolveContext {
    pub fn config(&self) -> &ResolverSection {
        &self.config
    }

    pub fn user_agent(&self, identity: Identity) -> &str {
        match identity {
            Identity::Desktop => &self.desktop_user_agent,
            Identity::Mobile => &self.mobile_user_agent,
        }
    }

    pub fn headers(&self, identity: Identity, referer: &str) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(USER_AGENT.to_string(), self.user_agent(identity).to_string());
        headers.insert(ACCEPT.to_string(), self.config.accept.clone());
        headers.insert(REFERER.to_string(), referer.to_string());
        headers
    }

    /// Fetches and treats any non-2xx status as a failure of the strategy.
    pub async fn fetch_ok(&self, request: ProviderRequest) -> Result<ProviderResponse, StrategyError> {
        let response = self.provider.fetch(&request).await?;
        if !response.is_success() {
            return Err(StrategyError::HttpStatus {
                status: response.status,
                url: request.url,
            });
        }
        Ok(response)
    }

    pub async fn fetch_json(&self, request: ProviderRequest) -> Result<Value, StrategyError> {
        let response = self.fetch_ok(request).await?;
        Ok(response.json()?)
    }

    /// Starts a source with the platform's playback headers already applied.
    pub fn source_builder(
        &self,
        media_url: impl Into<String>,
        identity: Identity,
        referer: &str,
    ) -> ResolvedSourceBuilder {
        ResolvedSource::builder(self.platform, media_url)
            .header(USER_AGENT, self.user_agent(identity))
            .header(REFERER, referer)
    }
}

pub struct SourceResolver {
    provider: Arc<dyn SourceProvider>,
    config: Arc<ResolverSection>,
}

impl SourceResolver {
    pub fn new(provider: Arc<dyn SourceProvider>, config: ResolverSection) -> Self {
        Self {
            provider,
            config: Arc::new(config),
        }
    }

    pub fn strategies_for(platform: Platform) -> Vec<ResolveStrategy> {
        match platform {
            Platform::Bilibili => bilibili::strategies(),
            Platform::Douyin => douyin::strategies(),
            Platform::Kuaishou => kuaishou::strategies(),
            Platform::Tiktok => tiktok::strategies(),
        }
    }

    /// Expands short links, extracts the content id and runs the platform's
    /// strategies in order until one yields a playable source.
    pub async fn resolve(&self, link: &ClassifiedLink) -> ResolveResult<ResolvedSource> {
        let platform = link.platform;
        if platform.risk_level() == RiskLevel::High {
            warn!(platform = %platform, "resolving a platform with strong anti-scraping defenses");
        }

        let desktop_user_agent = pick(&self.config.desktop_user_agents);
        let mobile_user_agent = pick(&self.config.mobile_user_agents);

        let expanded = if link.is_short_form {
            let mut headers = BTreeMap::new();
            headers.insert(USER_AGENT.to_string(), mobile_user_agent.clone());
            let target = self
                .provider
                .expand(&link.normalized_url, &headers)
                .await
                .map_err(|source| ResolveError::Expansion {
                    url: link.normalized_url.clone(),
                    source,
                })?;
            info!(short = %link.normalized_url, expanded = %target, "expanded short link");
            target
        } else {
            link.normalized_url.clone()
        };

        let signature = PlatformSignature::builtin(platform);
        let content_id =
            signature
                .extract_id(&expanded)
                .ok_or_else(|| ResolveError::MissingIdentifier {
                    platform,
                    url: expanded.clone(),
                })?;

        let context = ResolveContext {
            platform,
            canonical_url: signature.canonical_url(&content_id),
            content_id,
            provider: Arc::clone(&self.provider),
            config: Arc::clone(&self.config),
            desktop_user_agent,
            mobile_user_agent,
        };

        let strategies = Self::strategies_for(platform);
        match first_success("resolve", &strategies, &context, |_| false).await {
            Ok(success) => {
                info!(
                    platform = %platform,
                    content_id = %context.content_id,
                    strategy = %success.strategy,
                    failed_before = success.failures.len(),
                    "resolved media source"
                );
                Ok(success.value)
            }
            Err(exhausted) => Err(ResolveError::Exhausted {
                platform,
                content_id: context.content_id,
                failures: exhausted.failures,
            }),
        }
    }
}

fn pick(pool: &[String]) -> String {
    pool.choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_default()
}
