use async_trait::async_trait;
use serde_json::Value;

use crate::fallback::Strategy;

use super::error::StrategyError;
use super::payload::{check_code, non_empty_str, string_list};
use super::provider::ProviderRequest;
use super::types::ResolvedSource;
use super::{Identity, ResolveContext, ResolveStrategy};

const VIEW_API: &str = "https://api.bilibili.com/x/web-interface/view";
const PLAYURL_API: &str = "https://api.bilibili.com/x/player/playurl";
const REFERER_URL: &str = "https://www.bilibili.com/";

pub(super) fn strategies() -> Vec<ResolveStrategy> {
    vec![Box::new(WebPlayurl), Box::new(Html5Playurl)]
}

struct WebPlayurl;

#[async_trait]
impl Strategy<ResolveContext> for WebPlayurl {
    type Output = ResolvedSource;
    type Error = StrategyError;

    fn label(&self) -> String {
        "web-playurl".into()
    }

    async fn attempt(&self, context: &ResolveContext) -> Result<ResolvedSource, StrategyError> {
        resolve_playurl(context, Identity::Desktop, &[("fnval", "16"), ("fourk", "1")]).await
    }
}

struct Html5Playurl;

#[async_trait]
impl Strategy<ResolveContext> for Html5Playurl {
    type Output = ResolvedSource;
    type Error = StrategyError;

    fn label(&self) -> String {
        "html5-playurl".into()
    }

    async fn attempt(&self, context: &ResolveContext) -> Result<ResolvedSource, StrategyError> {
        resolve_playurl(
            context,
            Identity::Mobile,
            &[("platform", "html5"), ("fnval", "1"), ("high_quality", "1")],
        )
        .await
    }
}

struct VideoInfo {
    cid: i64,
    title: Option<String>,
    duration: Option<f64>,
}

async fn fetch_view(context: &ResolveContext, identity: Identity) -> Result<VideoInfo, StrategyError> {
    let request = ProviderRequest::get(VIEW_API)
        .query("bvid", &context.content_id)
        .headers(context.headers(identity, REFERER_URL));
    let body = context.fetch_json(request).await?;
    check_code(&body, "code", "message", 0)?;
    let data = &body["data"];
    let cid = data["cid"]
        .as_i64()
        .or_else(|| data["pages"][0]["cid"].as_i64())
        .ok_or_else(|| StrategyError::payload("view response has no cid"))?;
    Ok(VideoInfo {
        cid,
        title: non_empty_str(&data["title"]),
        duration: data["duration"].as_f64(),
    })
}

async fn resolve_playurl(
    context: &ResolveContext,
    identity: Identity,
    extra: &[(&str, &str)],
) -> Result<ResolvedSource, StrategyError> {
    let info = fetch_view(context, identity).await?;

    let mut request = ProviderRequest::get(PLAYURL_API)
        .query("bvid", &context.content_id)
        .query("cid", info.cid)
        .query("qn", context.config().bilibili_quality)
        .headers(context.headers(identity, REFERER_URL));
    for (key, value) in extra {
        request = request.query(key, value);
    }
    let body = context.fetch_json(request).await?;
    check_code(&body, "code", "message", 0)?;

    let address = select_play_address(&body["data"])
        .ok_or_else(|| StrategyError::payload("playurl response has neither durl nor dash tracks"))?;

    context
        .source_builder(address.url, identity, REFERER_URL)
        .backup_urls(address.backups)
        .container_format(address.container)
        .title(info.title)
        .duration_seconds(info.duration)
        .build(context.user_agent(identity))
}

struct PlayAddress {
    url: String,
    backups: Vec<String>,
    container: &'static str,
}

/// Flat `durl` wins; otherwise the first adaptive video track stands in.
fn select_play_address(data: &Value) -> Option<PlayAddress> {
    if let Some(first) = data["durl"].as_array().and_then(|items| items.first()) {
        if let Some(url) = non_empty_str(&first["url"]) {
            let container = match data["format"].as_str() {
                Some(format) if format.starts_with("flv") => "flv",
                _ => "mp4",
            };
            return Some(PlayAddress {
                url,
                backups: string_list(first.get("backup_url")),
                container,
            });
        }
    }

    let track = data["dash"]["video"].as_array()?.first()?;
    let url = non_empty_str(&track["baseUrl"]).or_else(|| non_empty_str(&track["base_url"]))?;
    let backups = string_list(track.get("backupUrl").or_else(|| track.get("backup_url")));
    Some(PlayAddress {
        url,
        backups,
        container: "mp4",
    })
}
