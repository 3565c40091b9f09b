// src/source/mod.rs
pub mod article;
pub mod daily;
pub mod reddit;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    SingleImage,
    Album { count: usize },
    ArticleDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Image { url: String },
    Document { path: PathBuf, warning: Option<String> },
}

/// A normalized unit of content waiting for its duplicate check.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub source_id: String,
    pub dedupe_key: String,
    pub title: String,
    pub kind: CandidateKind,
    pub created_at: DateTime<Utc>,
    pub payload: Payload,
    /// Where the display message links to (reddit permalink, article URL).
    pub link: Option<String>,
    /// Extra text delivered after the dedupe key (daily image companion link).
    pub follow_up: Option<String>,
}

impl CandidateItem {
    pub fn single_image(
        source_id: &str,
        title: &str,
        image_url: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ClassificationError> {
        Self::image(source_id, title, image_url, CandidateKind::SingleImage, created_at)
    }

    pub fn album(
        source_id: &str,
        title: &str,
        first_image_url: &str,
        count: usize,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ClassificationError> {
        if count == 0 {
            return Err(ClassificationError::new(source_id, "album without items"));
        }
        Self::image(source_id, title, first_image_url, CandidateKind::Album { count }, created_at)
    }

    pub fn document(
        source_id: &str,
        title: &str,
        path: PathBuf,
        warning: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ClassificationError> {
        let key = source_id.trim();
        if key.is_empty() {
            return Err(ClassificationError::new(source_id, "document without source url"));
        }
        Ok(Self {
            source_id: source_id.to_string(),
            dedupe_key: key.to_string(),
            title: normalize_title(title),
            kind: CandidateKind::ArticleDocument,
            created_at,
            payload: Payload::Document { path, warning },
            link: Some(key.to_string()),
            follow_up: None,
        })
    }

    fn image(
        source_id: &str,
        title: &str,
        url: &str,
        kind: CandidateKind,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ClassificationError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ClassificationError::new(source_id, "empty image url"));
        }
        Ok(Self {
            source_id: source_id.to_string(),
            dedupe_key: url.to_string(),
            title: normalize_title(title),
            kind,
            created_at,
            payload: Payload::Image {
                url: url.to_string(),
            },
            link: None,
            follow_up: None,
        })
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_follow_up(mut self, text: impl Into<String>) -> Self {
        self.follow_up = Some(text.into());
        self
    }

    pub fn is_younger_than(&self, max_age: ChronoDuration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) <= max_age
    }
}

/// A single candidate could not be turned into deliverable content.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason} (item {item_id})")]
pub struct ClassificationError {
    pub item_id: String,
    pub reason: String,
}

impl ClassificationError {
    pub fn new(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            reason: reason.into(),
        }
    }
}

/// The source could not be enumerated at all.
#[derive(Debug, thiserror::Error)]
pub enum SourceFetchError {
    #[error("authentication failed for {source_id}: {reason}")]
    Auth { source_id: String, reason: String },
    #[error("{source_id} not found")]
    NotFound { source_id: String },
    #[error("timed out fetching {source_id}")]
    Timeout { source_id: String },
    #[error("fetching {source_id}: {reason}")]
    Remote { source_id: String, reason: String },
    #[error("missing configuration: {0}")]
    Config(String),
}

impl SourceFetchError {
    pub fn remote(source_id: &str, reason: impl std::fmt::Display) -> Self {
        SourceFetchError::Remote {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn from_http(source_id: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceFetchError::Timeout {
                source_id: source_id.to_string(),
            }
        } else if e.status().map(|s| s.as_u16()) == Some(404) {
            SourceFetchError::NotFound {
                source_id: source_id.to_string(),
            }
        } else {
            Self::remote(source_id, e)
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SourceFetchError::Timeout { .. })
    }
}

/// Candidates in fetch order; individual entries may have failed classification.
pub type CandidateBatch = Vec<Result<CandidateItem, ClassificationError>>;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch up to `limit` candidates from `source_id`. Calling again re-fetches.
    async fn fetch_candidates(
        &self,
        source_id: &str,
        limit: usize,
    ) -> Result<CandidateBatch, SourceFetchError>;

    fn name(&self) -> &'static str;

    /// Human label shown in the display message.
    fn label(&self, source_id: &str) -> String {
        source_id.to_string()
    }
}

/// Collapse whitespace and decode entities in a display title.
pub fn normalize_title(s: &str) -> String {
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    let decoded = html_escape::decode_html_entities(s);
    re_ws.replace_all(&decoded, " ").trim().to_string()
}
