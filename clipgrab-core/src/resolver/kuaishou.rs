use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::fallback::Strategy;

use super::error::StrategyError;
use super::payload::{non_empty_str, unescape_json_string};
use super::provider::ProviderRequest;
use super::types::{ResolvedSource, COOKIE};
use super::{Identity, ResolveContext, ResolveStrategy};

const MOBILE_SHARE_PAGE: &str = "https://v.m.chenzhongtech.com/fw/photo/";
const GRAPHQL_API: &str = "https://www.kuaishou.com/graphql";
const REFERER_URL: &str = "https://www.kuaishou.com/";

const DETAIL_QUERY: &str = "query visionVideoDetail($photoId: String, $type: String, $page: String) {\n  visionVideoDetail(photoId: $photoId, type: $type, page: $page) {\n    status\n    photo {\n      id\n      duration\n      caption\n      photoUrl\n      manifest {\n        adaptationSet {\n          representation {\n            url\n            backupUrl\n          }\n        }\n      }\n    }\n  }\n}";

pub(super) fn strategies() -> Vec<ResolveStrategy> {
    vec![Box::new(MobileShare), Box::new(Graphql)]
}

struct MobileShare;

#[async_trait]
impl Strategy<ResolveContext> for MobileShare {
    type Output = ResolvedSource;
    type Error = StrategyError;

    fn label(&self) -> String {
        "mobile-share".into()
    }

    async fn attempt(&self, context: &ResolveContext) -> Result<ResolvedSource, StrategyError> {
        let request = ProviderRequest::get(format!("{MOBILE_SHARE_PAGE}{}", context.content_id))
            .headers(context.headers(Identity::Mobile, REFERER_URL));
        let page = context.fetch_ok(request).await?;
        let media_url = scrape_field(&page.body, "srcNoMark")
            .or_else(|| scrape_field(&page.body, "photoUrl"))
            .ok_or_else(|| StrategyError::payload("share page has no srcNoMark or photoUrl"))?;
        let duration = scrape_number(&page.body, "duration").map(|millis| millis / 1000.0);

        context
            .source_builder(media_url, Identity::Mobile, REFERER_URL)
            .title(scrape_field(&page.body, "caption"))
            .duration_seconds(duration)
            .container_format("mp4")
            .build(context.user_agent(Identity::Mobile))
    }
}

struct Graphql;

#[async_trait]
impl Strategy<ResolveContext> for Graphql {
    type Output = ResolvedSource;
    type Error = StrategyError;

    fn label(&self) -> String {
        "graphql".into()
    }

    async fn attempt(&self, context: &ResolveContext) -> Result<ResolvedSource, StrategyError> {
        let cookie = context
            .config()
            .cookie_for("kuaishou")
            .ok_or(StrategyError::MissingCookie("kuaishou"))?
            .to_string();
        let mut headers = context.headers(Identity::Desktop, REFERER_URL);
        headers.insert(COOKIE.to_string(), cookie);
        let body = json!({
            "operationName": "visionVideoDetail",
            "variables": {"photoId": context.content_id, "page": "detail"},
            "query": DETAIL_QUERY,
        });
        let request = ProviderRequest::post_json(GRAPHQL_API, body).headers(headers);
        let response = context.fetch_json(request).await?;

        if let Some(message) = response["errors"][0]["message"].as_str() {
            return Err(StrategyError::Api {
                code: -1,
                message: message.to_string(),
            });
        }
        let detail = &response["data"]["visionVideoDetail"];
        match detail["status"].as_i64() {
            Some(1) => {}
            Some(code) => {
                return Err(StrategyError::Api {
                    code,
                    message: "visionVideoDetail rejected the request".into(),
                })
            }
            None => return Err(StrategyError::payload("visionVideoDetail has no status")),
        }

        let photo = &detail["photo"];
        let (media_url, backups) = graphql_play_address(photo)
            .ok_or_else(|| StrategyError::payload("photo has no play address"))?;
        context
            .source_builder(media_url, Identity::Desktop, REFERER_URL)
            .backup_urls(backups)
            .title(non_empty_str(&photo["caption"]))
            .duration_seconds(photo["duration"].as_f64().map(|millis| millis / 1000.0))
            .container_format("mp4")
            .build(context.user_agent(Identity::Desktop))
    }
}

/// Flat `photoUrl` first, then the first adaptive representation.
fn graphql_play_address(photo: &Value) -> Option<(String, Vec<String>)> {
    if let Some(url) = non_empty_str(&photo["photoUrl"]) {
        return Some((url, Vec::new()));
    }
    let representation = &photo["manifest"]["adaptationSet"][0]["representation"][0];
    let url = non_empty_str(&representation["url"])?;
    let backups = match &representation["backupUrl"] {
        Value::Array(items) => items.iter().filter_map(non_empty_str).collect(),
        other => non_empty_str(other).into_iter().collect(),
    };
    Some((url, backups))
}

fn scrape_field(page: &str, field: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(field)))
        .expect("valid regex");
    pattern
        .captures(page)
        .and_then(|captures| captures.get(1))
        .map(|value| unescape_json_string(value.as_str()))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn scrape_number(page: &str, field: &str) -> Option<f64> {
    let pattern = Regex::new(&format!(r#""{}"\s*:\s*([0-9.]+)"#, regex::escape(field)))
        .expect("valid regex");
    pattern
        .captures(page)
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ResolverSection;
    use crate::link::LinkClassifier;
    use crate::resolver::{FixtureResponse, FixtureSourceProvider, SourceResolver};

    #[test]
    fn scrapes_escaped_fields() {
        let page = r#"<script>window.INIT_STATE = {"photo":{"caption":"cat \"video\"","duration":9000,"srcNoMark":"https://cdn.example.com/a.mp4"}}</script>"#;
        assert_eq!(
            scrape_field(page, "srcNoMark").as_deref(),
            Some("https://cdn.example.com/a.mp4")
        );
        assert_eq!(scrape_field(page, "caption").as_deref(), Some("cat \"video\""));
        assert_eq!(scrape_number(page, "duration"), Some(9000.0));
        assert_eq!(scrape_field(page, "photoUrl"), None);
    }

    #[tokio::test]
    async fn graphql_rejection_is_an_explicit_failure() {
        let mut config = ResolverSection::default();
        config.cookies.insert("kuaishou".into(), "did=web_1".into());
        let provider = FixtureSourceProvider::default().with_response(
            GRAPHQL_API,
            FixtureResponse::json(json!({"data": {"visionVideoDetail": {"status": 2, "photo": null}}})),
        );
        let resolver = SourceResolver::new(Arc::new(provider), config);
        let link = LinkClassifier::new()
            .classify("https://www.kuaishou.com/short-video/3xg9abcd1234")
            .unwrap();
        let error = resolver.resolve(&link).await.unwrap_err();
        assert_eq!(error.strategies_tried(), vec!["mobile-share", "graphql"]);
        assert!(error.to_string().contains("upstream error code 2"));
    }

    #[test]
    fn adaptive_manifest_is_used_without_photo_url() {
        let photo = json!({"manifest": {"adaptationSet": [{"representation": [
            {"url": "https://k.example.com/a.mp4", "backupUrl": ["https://k2.example.com/a.mp4"]}
        ]}]}});
        let (url, backups) = graphql_play_address(&photo).unwrap();
        assert_eq!(url, "https://k.example.com/a.mp4");
        assert_eq!(backups, vec!["https://k2.example.com/a.mp4"]);
    }
}
