// src/command.rs
//! On-demand article download posted into a channel, with visible retry notices.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::discord::DeliveryChannel;
use crate::retry::{execute_with_retry_notify, RetryPolicy};
use crate::source::article::{ArticleDocument, ArticleSource, RenderMode};
use crate::source::SourceFetchError;

/// Retry notices stay up a little longer than the backoff they announce.
pub const NOTICE_GRACE: Duration = Duration::from_millis(1_900);

pub const PROCESSING_MESSAGE: &str = "⏳ Processing…";

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch_document(
        &self,
        url: &str,
        mode: RenderMode,
    ) -> Result<ArticleDocument, SourceFetchError>;
}

#[async_trait]
impl DocumentFetcher for ArticleSource {
    async fn fetch_document(
        &self,
        url: &str,
        mode: RenderMode,
    ) -> Result<ArticleDocument, SourceFetchError> {
        ArticleSource::fetch_document(self, url, mode).await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleRequest {
    pub url: String,
    #[serde(default, deserialize_with = "de_mode")]
    pub mode: RenderMode,
}

fn de_mode<'de, D: serde::Deserializer<'de>>(d: D) -> Result<RenderMode, D::Error> {
    let s = String::deserialize(d)?;
    s.parse().map_err(serde::de::Error::custom)
}

impl ArticleRequest {
    pub fn summary(&self) -> String {
        format!("📰 Article requested: <{}> ({})", self.url, self.mode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleOutcome {
    Delivered { warning: Option<String> },
    Failed { reason: String },
}

pub struct ArticleCommand {
    fetcher: Arc<dyn DocumentFetcher>,
    policy: RetryPolicy,
}

impl ArticleCommand {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, policy: RetryPolicy) -> Self {
        Self { fetcher, policy }
    }

    pub async fn run(
        &self,
        request: &ArticleRequest,
        channel: Arc<dyn DeliveryChannel>,
    ) -> ArticleOutcome {
        let url = request.url.as_str();
        tracing::info!(url, mode = %request.mode, "article command");

        if let Err(e) = channel.send_text(&request.summary()).await {
            tracing::warn!(error = %e, "article summary not posted");
        }
        let interim = match channel.send_text(PROCESSING_MESSAGE).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "processing message not posted");
                None
            }
        };

        let fetcher = &self.fetcher;
        let notices = channel.clone();
        let res = execute_with_retry_notify(
            &self.policy,
            SourceFetchError::is_timeout,
            || fetcher.fetch_document(url, request.mode),
            |attempt, delay, err: &SourceFetchError| {
                tracing::warn!(url, attempt, error = %err, "article fetch attempt failed");
                let channel = notices.clone();
                async move { post_retry_notice(channel, attempt, delay).await }
            },
        )
        .await;

        let outcome = match res {
            Ok(doc) => self.deliver(&doc, channel.as_ref()).await,
            Err(e) => {
                counter!("article_failures_total").increment(1);
                tracing::error!(url, error = %e, "article fetch failed");
                if let Err(de) = channel
                    .send_text(&format!("❌ Could not fetch the article: {e}"))
                    .await
                {
                    tracing::warn!(error = %de, "failure message not posted");
                }
                ArticleOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if let Some(id) = interim {
            if let Err(e) = channel.delete_message(&id).await {
                tracing::warn!(error = %e, "processing message not removed");
            }
        }
        outcome
    }

    async fn deliver(&self, doc: &ArticleDocument, channel: &dyn DeliveryChannel) -> ArticleOutcome {
        let uploaded = channel.send_file(&doc.path).await;
        remove_document(&doc.path).await;
        if let Err(e) = uploaded {
            counter!("article_failures_total").increment(1);
            tracing::error!(path = %doc.path.display(), error = %e, "document upload failed");
            if let Err(de) = channel
                .send_text(&format!("❌ Could not upload the article: {e}"))
                .await
            {
                tracing::warn!(error = %de, "failure message not posted");
            }
            return ArticleOutcome::Failed {
                reason: e.to_string(),
            };
        }
        if let Some(w) = &doc.warning {
            if let Err(e) = channel.send_text(&format!("⚠️ {w}")).await {
                tracing::warn!(error = %e, "document warning not posted");
            }
        }
        counter!("article_delivered_total").increment(1);
        ArticleOutcome::Delivered {
            warning: doc.warning.clone(),
        }
    }
}

pub fn retry_notice(attempt: u32, delay: Duration) -> String {
    format!(
        "Attempt {attempt} failed — retrying in {:.1} s…",
        delay.as_secs_f64()
    )
}

async fn post_retry_notice(channel: Arc<dyn DeliveryChannel>, attempt: u32, delay: Duration) {
    let id = match channel.send_text(&retry_notice(attempt, delay)).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "retry notice not posted");
            return;
        }
    };
    tokio::spawn(async move {
        tokio::time::sleep(delay + NOTICE_GRACE).await;
        if let Err(e) = channel.delete_message(&id).await {
            tracing::debug!(error = %e, "retry notice not removed");
        }
    });
}

async fn remove_document(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "could not remove document");
    }
}
