// src/source/daily.rs
//! One picture a day from a static photo blog.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;

use super::{CandidateBatch, CandidateItem, ClassificationError, SourceAdapter, SourceFetchError};

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

fn default_image_selector() -> String {
    "div.post-content > p img[src]".into()
}
fn default_title_selector() -> String {
    "header.post-header > h1 > a".into()
}
fn default_companion_selector() -> String {
    "div.post-content > p a[href]".into()
}
fn default_time() -> String {
    "09:30".into()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    /// Local wall-clock time, `HH:MM`.
    #[serde(default = "default_time")]
    pub time: String,
    #[serde(default = "default_true")]
    pub skip_weekends: bool,
    #[serde(default = "default_image_selector")]
    pub image_selector: String,
    #[serde(default = "default_title_selector")]
    pub title_selector: String,
    #[serde(default = "default_companion_selector")]
    pub companion_selector: String,
    /// Companion links containing any line of this file are not posted.
    #[serde(default)]
    pub exclude_file: Option<PathBuf>,
}

impl Default for DailySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            time: default_time(),
            skip_weekends: true,
            image_selector: default_image_selector(),
            title_selector: default_title_selector(),
            companion_selector: default_companion_selector(),
            exclude_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyPost {
    pub image_url: String,
    pub title: Option<String>,
    pub companion: Option<String>,
}

fn select_first<'a>(doc: &'a Html, raw: &str) -> Option<scraper::ElementRef<'a>> {
    let sel = Selector::parse(raw).ok()?;
    let first = doc.select(&sel).next();
    first
}

/// Image (query string dropped), title and companion link of the latest post.
pub fn extract_daily(html: &str, settings: &DailySettings) -> Option<DailyPost> {
    let doc = Html::parse_document(html);
    let image_url = select_first(&doc, &settings.image_selector)?
        .value()
        .attr("src")
        .map(|s| s.split('?').next().unwrap_or(s).to_string())
        .filter(|s| !s.is_empty())?;
    let title = select_first(&doc, &settings.title_selector)
        .map(|e| super::normalize_title(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty());
    let companion = select_first(&doc, &settings.companion_selector)
        .and_then(|e| e.value().attr("href"))
        .map(str::to_string);
    Some(DailyPost {
        image_url,
        title,
        companion,
    })
}

pub fn is_excluded(link: &str, excludes: &[String]) -> bool {
    excludes.iter().any(|e| !e.is_empty() && link.contains(e.as_str()))
}

pub struct DailyImageSource {
    client: Client,
    settings: DailySettings,
}

impl DailyImageSource {
    pub fn new(settings: DailySettings) -> Self {
        Self {
            client: Client::builder()
                .user_agent(BROWSER_UA)
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            settings,
        }
    }

    async fn excludes(&self) -> Vec<String> {
        let Some(path) = &self.settings.exclude_file else {
            return Vec::new();
        };
        match tokio::fs::read_to_string(path).await {
            Ok(s) => s
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "exclude list unreadable");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for DailyImageSource {
    async fn fetch_candidates(
        &self,
        source_id: &str,
        _limit: usize,
    ) -> Result<CandidateBatch, SourceFetchError> {
        let html = self
            .client
            .get(source_id)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceFetchError::from_http(source_id, e))?
            .text()
            .await
            .map_err(|e| SourceFetchError::from_http(source_id, e))?;

        let Some(post) = extract_daily(&html, &self.settings) else {
            return Ok(vec![Err(ClassificationError::new(source_id, "no picture in latest post"))]);
        };
        tracing::info!(url = %post.image_url, title = ?post.title, companion = ?post.companion, "daily picture found");

        let title = post.title.as_deref().unwrap_or("Daily picture");
        let mut item = CandidateItem::single_image(source_id, title, &post.image_url, Utc::now())
            .map(|i| i.with_link(source_id));
        if let (Ok(i), Some(link)) = (&mut item, post.companion) {
            if is_excluded(&link, &self.excludes().await) {
                tracing::info!(link, "companion link excluded");
            } else {
                i.follow_up = Some(link);
            }
        }
        Ok(vec![item])
    }

    fn name(&self) -> &'static str {
        "daily"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <header class="post-header"><h1><a href="/p/1">Monday   mood</a></h1></header>
        <div class="post-content">
          <p><a href="https://books.example/shop/42"><img src="https://cdn.example/2026/10/pic.jpg?w=1200&amp;ssl=1"></a></p>
        </div>
    </body></html>"#;

    #[test]
    fn extracts_image_title_and_companion() {
        let post = extract_daily(PAGE, &DailySettings::default()).unwrap();
        assert_eq!(post.image_url, "https://cdn.example/2026/10/pic.jpg");
        assert_eq!(post.title.as_deref(), Some("Monday mood"));
        assert_eq!(post.companion.as_deref(), Some("https://books.example/shop/42"));
    }

    #[test]
    fn page_without_picture_yields_nothing() {
        assert!(extract_daily("<html><body><p>closed today</p></body></html>", &DailySettings::default()).is_none());
    }

    #[test]
    fn exclusion_is_substring_based() {
        let ex = vec!["books.example".to_string(), String::new()];
        assert!(is_excluded("https://books.example/shop/42", &ex));
        assert!(!is_excluded("https://other.example/", &ex));
        assert!(!is_excluded("https://other.example/", &[String::new()]));
    }
}
