use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::fallback::Strategy;

use super::error::StrategyError;
use super::payload::{check_code, embedded_json, find_key, non_empty_str, string_list};
use super::provider::ProviderRequest;
use super::types::{ResolvedSource, COOKIE};
use super::{Identity, ResolveContext, ResolveStrategy};

const SHARE_PAGE: &str = "https://www.iesdouyin.com/share/video/";
const DETAIL_API: &str = "https://www.douyin.com/aweme/v1/web/aweme/detail/";
const REFERER_URL: &str = "https://www.douyin.com/";

pub(super) fn strategies() -> Vec<ResolveStrategy> {
    vec![Box::new(SharePage), Box::new(WebDetail)]
}

struct SharePage;

#[async_trait]
impl Strategy<ResolveContext> for SharePage {
    type Output = ResolvedSource;
    type Error = StrategyError;

    fn label(&self) -> String {
        "share-page".into()
    }

    async fn attempt(&self, context: &ResolveContext) -> Result<ResolvedSource, StrategyError> {
        let request = ProviderRequest::get(format!("{SHARE_PAGE}{}/", context.content_id))
            .headers(context.headers(Identity::Mobile, REFERER_URL));
        let page = context.fetch_ok(request).await?;
        let pattern = Regex::new(r"(?s)window\._ROUTER_DATA\s*=\s*(\{.*?\})\s*</script>")
            .expect("valid regex");
        let data = embedded_json(&page.body, &pattern, "_ROUTER_DATA")?;
        let item = find_key(&data, "item_list")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .ok_or_else(|| StrategyError::payload("share page has no item (removed or blocked)"))?;
        source_from_item(context, item, Identity::Mobile)
    }
}

struct WebDetail;

#[async_trait]
impl Strategy<ResolveContext> for WebDetail {
    type Output = ResolvedSource;
    type Error = StrategyError;

    fn label(&self) -> String {
        "web-detail".into()
    }

    async fn attempt(&self, context: &ResolveContext) -> Result<ResolvedSource, StrategyError> {
        let cookie = context
            .config()
            .cookie_for("douyin")
            .ok_or(StrategyError::MissingCookie("douyin"))?
            .to_string();
        let mut headers = context.headers(Identity::Desktop, REFERER_URL);
        headers.insert(COOKIE.to_string(), cookie);
        let request = ProviderRequest::get(DETAIL_API)
            .query("aweme_id", &context.content_id)
            .query("aid", 6383)
            .query("device_platform", "webapp")
            .headers(headers);
        let body = context.fetch_json(request).await?;
        check_code(&body, "status_code", "status_msg", 0)?;
        let item = body
            .get("aweme_detail")
            .filter(|detail| detail.is_object())
            .ok_or_else(|| StrategyError::payload("aweme_detail is empty"))?;
        source_from_item(context, item, Identity::Desktop)
    }
}

/// `play_addr` is the flat encoding; `bit_rate[0].play_addr` is the adaptive one.
fn play_urls(video: &Value) -> Vec<String> {
    let flat = string_list(video["play_addr"].get("url_list"));
    if !flat.is_empty() {
        return flat;
    }
    string_list(video["bit_rate"][0]["play_addr"].get("url_list"))
}

fn source_from_item(
    context: &ResolveContext,
    item: &Value,
    identity: Identity,
) -> Result<ResolvedSource, StrategyError> {
    let video = &item["video"];
    let mut urls = play_urls(video)
        .into_iter()
        .map(|url| url.replace("/playwm/", "/play/"));
    let primary = urls
        .next()
        .ok_or_else(|| StrategyError::payload("item has no play address"))?;
    let duration = video["duration"]
        .as_f64()
        .or_else(|| item["duration"].as_f64())
        .map(|millis| millis / 1000.0);

    context
        .source_builder(primary, identity, REFERER_URL)
        .backup_urls(urls)
        .title(non_empty_str(&item["desc"]))
        .duration_seconds(duration)
        .container_format("mp4")
        .build(context.user_agent(identity))
}
