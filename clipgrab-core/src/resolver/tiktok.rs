use async_trait::async_trait;
use regex::Regex;

use crate::fallback::Strategy;

use super::error::StrategyError;
use super::payload::{check_code, embedded_json, non_empty_str, string_list};
use super::provider::ProviderRequest;
use super::types::ResolvedSource;
use super::{Identity, ResolveContext, ResolveStrategy};

const FEED_API: &str = "https://api16-normal-c-useast1a.tiktokv.com/aweme/v1/feed/";
const REFERER_URL: &str = "https://www.tiktok.com/";

pub(super) fn strategies() -> Vec<ResolveStrategy> {
    vec![Box::new(WebRehydration), Box::new(MobileFeed)]
}

struct WebRehydration;

#[async_trait]
impl Strategy<ResolveContext> for WebRehydration {
    type Output = ResolvedSource;
    type Error = StrategyError;

    fn label(&self) -> String {
        "web-rehydration".into()
    }

    async fn attempt(&self, context: &ResolveContext) -> Result<ResolvedSource, StrategyError> {
        let request = ProviderRequest::get(context.canonical_url.clone())
            .headers(context.headers(Identity::Desktop, REFERER_URL));
        let page = context.fetch_ok(request).await?;
        let pattern = Regex::new(
            r#"(?s)<script[^>]*id="__UNIVERSAL_DATA_FOR_REHYDRATION__"[^>]*>(.*?)</script>"#,
        )
        .expect("valid regex");
        let data = embedded_json(&page.body, &pattern, "rehydration data")?;
        let detail = &data["__DEFAULT_SCOPE__"]["webapp.video-detail"];
        check_code(detail, "statusCode", "statusMsg", 0)?;

        let item = &detail["itemInfo"]["itemStruct"];
        let video = &item["video"];
        let media_url = non_empty_str(&video["playAddr"])
            .or_else(|| string_list(video["bitrateInfo"][0]["PlayAddr"].get("UrlList")).into_iter().next())
            .ok_or_else(|| StrategyError::payload("itemStruct has no play address"))?;

        context
            .source_builder(media_url, Identity::Desktop, REFERER_URL)
            .title(non_empty_str(&item["desc"]))
            .duration_seconds(video["duration"].as_f64())
            .container_format("mp4")
            .build(context.user_agent(Identity::Desktop))
    }
}

struct MobileFeed;

#[async_trait]
impl Strategy<ResolveContext> for MobileFeed {
    type Output = ResolvedSource;
    type Error = StrategyError;

    fn label(&self) -> String {
        "mobile-feed".into()
    }

    async fn attempt(&self, context: &ResolveContext) -> Result<ResolvedSource, StrategyError> {
        let request = ProviderRequest::get(FEED_API)
            .query("aweme_id", &context.content_id)
            .headers(context.headers(Identity::Mobile, REFERER_URL));
        let body = context.fetch_json(request).await?;
        check_code(&body, "status_code", "status_msg", 0)?;

        let item = body["aweme_list"]
            .as_array()
            .and_then(|items| items.first())
            .ok_or_else(|| StrategyError::payload("feed returned no items"))?;
        // the feed answers with unrelated items when the requested one is gone
        if item["aweme_id"].as_str() != Some(context.content_id.as_str()) {
            return Err(StrategyError::payload("feed returned a different item"));
        }

        let video = &item["video"];
        let mut urls = string_list(video["play_addr"].get("url_list"));
        if urls.is_empty() {
            urls = string_list(video["bit_rate"][0]["play_addr"].get("url_list"));
        }
        let mut urls = urls.into_iter();
        let primary = urls
            .next()
            .ok_or_else(|| StrategyError::payload("feed item has no play address"))?;

        context
            .source_builder(primary, Identity::Mobile, REFERER_URL)
            .backup_urls(urls)
            .title(non_empty_str(&item["desc"]))
            .duration_seconds(video["duration"].as_f64().map(|millis| millis / 1000.0))
            .container_format("mp4")
            .build(context.user_agent(Identity::Mobile))
    }
}
