// src/source/reddit.rs
//! Newest submissions of a subreddit, classified into single images and albums.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{CandidateBatch, CandidateItem, ClassificationError, SourceAdapter, SourceFetchError};

const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];
const ALBUM_ICON: &str = "https://images.emojiterra.com/twitter/v13.1/512px/1f4d6.png";

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}
#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}
#[derive(Debug, Deserialize)]
struct Child {
    data: Submission,
}

/// The subset of a reddit `t3` object the classifier looks at.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub removed_by_category: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub gallery_data: Option<serde_json::Value>,
    #[serde(default)]
    pub media_metadata: Option<serde_json::Value>,
}

impl Submission {
    /// Pinned posts and posts deleted by their author never become candidates.
    pub fn is_skipped(&self) -> bool {
        self.stickied || self.removed_by_category.as_deref() == Some("deleted")
    }

    fn is_album(&self) -> bool {
        self.media_metadata
            .as_ref()
            .and_then(|m| m.as_object())
            .is_some_and(|m| !m.is_empty())
    }

    fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_utc.max(0.0) as i64, 0).unwrap_or_default()
    }
}

pub fn parse_listing(body: &str) -> Result<Vec<Submission>, serde_json::Error> {
    let listing: Listing = serde_json::from_str(body)?;
    Ok(listing.data.children.into_iter().map(|c| c.data).collect())
}

#[derive(Debug, Clone)]
pub struct RedditClassifier {
    video_domains: Vec<String>,
}

impl Default for RedditClassifier {
    fn default() -> Self {
        Self::new(vec!["redgifs.com".to_string()])
    }
}

impl RedditClassifier {
    pub fn new(video_domains: Vec<String>) -> Self {
        Self {
            video_domains: video_domains
                .into_iter()
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, s: &Submission) -> Result<CandidateItem, ClassificationError> {
        let item = if s.is_album() {
            tracing::debug!(id = %s.id, "gallery submission");
            let (first, count) = first_gallery_image(s)?;
            CandidateItem::album(&s.subreddit, &s.title, &first, count, s.created_at())?
        } else if has_image_extension(&s.url) || self.is_video_host(&s.url) {
            CandidateItem::single_image(&s.subreddit, &s.title, &s.url, s.created_at())?
        } else {
            tracing::warn!(id = %s.id, url = %s.url, "no usable content in submission");
            return Err(ClassificationError::new(&s.id, "no usable content"));
        };
        Ok(item.with_link(format!("https://www.reddit.com{}", s.permalink)))
    }

    fn is_video_host(&self, raw: &str) -> bool {
        let Some(host) = url::Url::parse(raw)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        else {
            return false;
        };
        self.video_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }
}

/// Footer icon shown under album embeds.
pub fn album_icon() -> &'static str {
    ALBUM_ICON
}

fn has_image_extension(raw: &str) -> bool {
    let path = match url::Url::parse(raw) {
        Ok(u) => u.path().to_ascii_lowercase(),
        Err(_) => return false,
    };
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn first_gallery_image(s: &Submission) -> Result<(String, usize), ClassificationError> {
    let items = s
        .gallery_data
        .as_ref()
        .and_then(|g| g.get("items"))
        .and_then(|i| i.as_array())
        .filter(|i| !i.is_empty())
        .ok_or_else(|| ClassificationError::new(&s.id, "no image in album"))?;

    let media_id = items[0]
        .get("media_id")
        .and_then(|m| m.as_str())
        .ok_or_else(|| ClassificationError::new(&s.id, "first album item has no media_id"))?;

    let url = s
        .media_metadata
        .as_ref()
        .and_then(|m| m.get(media_id))
        .and_then(|m| m.get("s"))
        .and_then(|m| m.get("u"))
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ClassificationError::new(&s.id, "image url missing from media metadata"))?;

    Ok((url.to_string(), items.len()))
}

pub struct RedditSource {
    client: Client,
    credentials: RedditCredentials,
    classifier: RedditClassifier,
    auth_url: String,
    api_base: String,
    timeout: Duration,
    token: Mutex<Option<(String, Instant)>>,
}

#[derive(Deserialize)]
struct TokenDto {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl RedditSource {
    pub fn new(credentials: RedditCredentials, classifier: RedditClassifier) -> Self {
        Self {
            client: Client::new(),
            credentials,
            classifier,
            auth_url: AUTH_URL.to_string(),
            api_base: API_BASE.to_string(),
            timeout: Duration::from_secs(10),
            token: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Application-only OAuth token, refreshed a minute before it expires.
    async fn access_token(&self, sub: &str) -> Result<String, SourceFetchError> {
        let mut guard = self.token.lock().await;
        if let Some((tok, until)) = guard.as_ref() {
            if Instant::now() < *until {
                return Ok(tok.clone());
            }
        }

        let rsp = self
            .client
            .post(&self.auth_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .header("User-Agent", &self.credentials.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceFetchError::Auth {
                source_id: sub.to_string(),
                reason: e.to_string(),
            })?;
        let dto: TokenDto = rsp.json().await.map_err(|e| SourceFetchError::Auth {
            source_id: sub.to_string(),
            reason: e.to_string(),
        })?;

        let ttl = Duration::from_secs(dto.expires_in.saturating_sub(60));
        *guard = Some((dto.access_token.clone(), Instant::now() + ttl));
        Ok(dto.access_token)
    }
}

#[async_trait]
impl SourceAdapter for RedditSource {
    async fn fetch_candidates(
        &self,
        source_id: &str,
        limit: usize,
    ) -> Result<CandidateBatch, SourceFetchError> {
        let token = self.access_token(source_id).await?;
        tracing::info!(subreddit = source_id, limit, "fetching subreddit");

        let body = self
            .client
            .get(format!("{}/r/{}/new", self.api_base, source_id))
            .query(&[("limit", limit.to_string()), ("raw_json", "1".to_string())])
            .bearer_auth(token)
            .header("User-Agent", &self.credentials.user_agent)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceFetchError::from_http(source_id, e))?
            .text()
            .await
            .map_err(|e| SourceFetchError::from_http(source_id, e))?;

        let submissions =
            parse_listing(&body).map_err(|e| SourceFetchError::remote(source_id, e))?;
        counter!("reddit_submissions_total").increment(submissions.len() as u64);

        Ok(submissions
            .iter()
            .filter(|s| !s.is_skipped())
            .take(limit)
            .map(|s| self.classifier.classify(s))
            .collect())
    }

    fn name(&self) -> &'static str {
        "reddit"
    }

    fn label(&self, source_id: &str) -> String {
        format!("r/{source_id}")
    }
}
