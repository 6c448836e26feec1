use std::path::PathBuf;

use clap::Args;
use clipgrab_core::{
    CleanupReport, ClassifiedLink, RiskLevel, ResolvedSource, ServiceResponse,
};
use serde::Serialize;

use crate::DisplayFallback;

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Link or share text containing a link
    pub link: String,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Link or share text containing a link
    pub link: String,
    /// Abort the whole request after this many seconds
    #[arg(long)]
    pub deadline_seconds: Option<u64>,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Only expire ledger tasks, leave work directories alone
    #[arg(long, default_value_t = false)]
    pub skip_sweep: bool,
}

#[derive(Debug, Serialize)]
pub struct Classification {
    #[serde(flatten)]
    pub link: ClassifiedLink,
    pub content_id: Option<String>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Serialize)]
pub struct Resolution {
    #[serde(flatten)]
    pub source: ResolvedSource,
}

#[derive(Debug, Serialize)]
pub struct CleanupSummary {
    pub expired: CleanupReport,
    pub swept: Vec<PathBuf>,
}

impl DisplayFallback for Classification {
    fn display(&self) -> String {
        format!(
            "{platform} ({form}) {url} id={id} risk={risk:?}",
            platform = self.link.platform,
            form = if self.link.is_short_form { "short" } else { "long" },
            url = self.link.normalized_url,
            id = self.content_id.as_deref().unwrap_or("-"),
            risk = self.risk_level,
        )
    }
}

impl DisplayFallback for Resolution {
    fn display(&self) -> String {
        let source = &self.source;
        let mut lines = vec![
            format!("{} [{}]", source.media_url, source.container_format),
            format!("title: {}", source.title.as_deref().unwrap_or("<untitled>")),
        ];
        if let Some(duration) = source.duration_seconds {
            lines.push(format!("duration: {duration:.0}s"));
        }
        for (name, value) in &source.request_headers {
            lines.push(format!("{name}: {value}"));
        }
        for mirror in &source.backup_urls {
            lines.push(format!("mirror: {mirror}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for ServiceResponse {
    fn display(&self) -> String {
        match self {
            ServiceResponse::Success {
                request_id,
                durable_reference,
                title,
                byte_size,
                strategy_used,
                expires_at,
                ..
            } => format!(
                "{request_id} stored at {durable_reference}\n\
                 title: {}\n\
                 size: {byte_size} bytes, strategy: {strategy_used}\n\
                 expires: {}",
                title.as_deref().unwrap_or("<untitled>"),
                expires_at.to_rfc3339()
            ),
            ServiceResponse::Failure {
                kind,
                message,
                retryable,
                diagnostics,
            } => {
                let mut text = format!("{kind}: {message} (retryable: {retryable})");
                if !diagnostics.strategies_tried.is_empty() {
                    text.push_str(&format!(
                        "\ntried: {}",
                        diagnostics.strategies_tried.join(", ")
                    ));
                }
                if let Some(status) = diagnostics.last_status {
                    text.push_str(&format!("\nlast status: {status}"));
                }
                text
            }
        }
    }
}

impl DisplayFallback for CleanupSummary {
    fn display(&self) -> String {
        format!(
            "expired: examined={} cleaned={} failed={}\nswept work dirs: {}",
            self.expired.examined,
            self.expired.cleaned,
            self.expired.failed,
            self.swept.len()
        )
    }
}
