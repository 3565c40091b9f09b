// src/source/article.rs
//! Logged-in article download, cleaned up and rendered to a standalone document.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use scraper::{node::Node, ElementRef, Html, Selector};
use serde::Deserialize;

use super::{CandidateBatch, CandidateItem, SourceAdapter, SourceFetchError};

const VOID_ELEMENTS: [&str; 8] = ["img", "br", "hr", "source", "meta", "link", "input", "wbr"];
const MULTIMEDIA: [&str; 3] = ["video", "iframe", "audio"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderMode {
    pub mobile: bool,
    pub dark: bool,
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (layout, theme) = s
            .trim()
            .to_ascii_lowercase()
            .split_once('-')
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .ok_or_else(|| format!("unknown mode '{s}'"))?;
        let mobile = match layout.as_str() {
            "mobile" => true,
            "normal" => false,
            _ => return Err(format!("unknown layout '{layout}'")),
        };
        let dark = match theme.as_str() {
            "dark" => true,
            "light" => false,
            _ => return Err(format!("unknown theme '{theme}'")),
        };
        Ok(Self { mobile, dark })
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = if self.mobile { "mobile" } else { "normal" };
        let theme = if self.dark { "dark" } else { "light" };
        write!(f, "{layout}-{theme}")
    }
}

#[derive(Debug, Clone)]
pub struct ArticleCredentials {
    pub email: String,
    pub password: String,
}

fn default_email_field() -> String {
    "email".into()
}
fn default_password_field() -> String {
    "password".into()
}
fn default_content_selector() -> String {
    "article".into()
}
fn default_clutter() -> Vec<String> {
    [
        "script",
        "noscript",
        "style",
        ".meta__social",
        ".article__reactions",
        "nav.breadcrumb",
        ".breadcrumb",
        "#comments",
        ".comments",
        "section.related",
        ".article__siblings",
        "aside",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_width_token() -> String {
    "664w".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_output_dir() -> PathBuf {
    std::env::temp_dir()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleSettings {
    /// Form endpoint the credentials are posted to; no login when empty.
    #[serde(default)]
    pub login_url: String,
    #[serde(default = "default_email_field")]
    pub email_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    #[serde(default = "default_content_selector")]
    pub content_selector: String,
    #[serde(default = "default_clutter")]
    pub clutter_selectors: Vec<String>,
    #[serde(default = "default_width_token")]
    pub preferred_width: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub default_mode: Option<String>,
}

impl Default for ArticleSettings {
    fn default() -> Self {
        Self {
            login_url: String::new(),
            email_field: default_email_field(),
            password_field: default_password_field(),
            content_selector: default_content_selector(),
            clutter_selectors: default_clutter(),
            preferred_width: default_width_token(),
            timeout_secs: default_timeout_secs(),
            output_dir: default_output_dir(),
            default_mode: None,
        }
    }
}

/// Result of a document fetch. The caller removes `path` once delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleDocument {
    pub title: String,
    pub path: PathBuf,
    pub succeeded: bool,
    pub warning: Option<String>,
}

/// Article content after clutter removal.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanArticle {
    pub title: String,
    pub body_html: String,
    pub removed_multimedia: usize,
    pub body_found: bool,
}

pub trait DocumentRenderer: Send + Sync {
    fn render(&self, article: &CleanArticle, source_url: &str, mode: RenderMode) -> String;
    fn extension(&self) -> &'static str;
}

/// Standalone HTML page with layout and theme baked into its stylesheet.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlRenderer;

impl DocumentRenderer for HtmlRenderer {
    fn render(&self, article: &CleanArticle, source_url: &str, mode: RenderMode) -> String {
        let (bg, fg, link) = if mode.dark {
            ("#121212", "#e6e6e6", "#8ab4f8")
        } else {
            ("#ffffff", "#1a1a1a", "#1a0dab")
        };
        let (width, font, margin) = if mode.mobile {
            ("105mm", "15px", "6mm")
        } else {
            ("180mm", "17px", "15mm")
        };
        format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>{title}</title>\
<style>body{{background:{bg};color:{fg};font-family:Georgia,serif;font-size:{font};\
max-width:{width};margin:{margin} auto;padding:0 {margin};line-height:1.5}}\
a{{color:{link}}}img{{max-width:100%;height:auto}}figure{{margin:1em 0}}</style>\
</head><body><h1>{title}</h1><p><a href=\"{src}\">{src}</a></p>\n{body}\n</body></html>\n",
            title = html_escape::encode_text(&article.title),
            src = html_escape::encode_double_quoted_attribute(source_url),
            body = article.body_html,
        )
    }

    fn extension(&self) -> &'static str {
        "html"
    }
}

/// First `srcset` candidate whose descriptor equals `token`, e.g. `664w`.
pub fn pick_srcset<'a>(srcset: &'a str, token: &str) -> Option<&'a str> {
    srcset.split(',').find_map(|cand| {
        let mut parts = cand.split_whitespace();
        let url = parts.next()?;
        (parts.next() == Some(token)).then_some(url)
    })
}

fn first_srcset_url(srcset: &str) -> Option<&str> {
    srcset.split(',').find_map(|c| c.split_whitespace().next())
}

/// Concrete image URL for a possibly lazy-loaded `<img>`.
fn resolve_img_src(el: &scraper::node::Element, token: &str) -> Option<String> {
    for attr in ["data-srcset", "srcset"] {
        if let Some(set) = el.attr(attr) {
            if let Some(u) = pick_srcset(set, token).or_else(|| first_srcset_url(set)) {
                return Some(u.to_string());
            }
        }
    }
    el.attr("data-src").or_else(|| el.attr("src")).map(str::to_string)
}

/// Strip clutter, resolve lazy images and serialize the article body.
pub fn clean_article(html: &str, settings: &ArticleSettings) -> CleanArticle {
    let doc = Html::parse_document(html);

    let title = Selector::parse("h1")
        .ok()
        .and_then(|s| doc.select(&s).next())
        .or_else(|| Selector::parse("title").ok().and_then(|s| doc.select(&s).next()))
        .map(|e| super::normalize_title(&e.text().collect::<String>()))
        .unwrap_or_default();

    let content = Selector::parse(&settings.content_selector)
        .ok()
        .and_then(|s| doc.select(&s).next());
    let body_found = content.is_some();
    let root = match content {
        Some(r) => r,
        None => doc.root_element(),
    };

    let mut skip: Vec<ElementRef<'_>> = Vec::new();
    for raw in &settings.clutter_selectors {
        match Selector::parse(raw) {
            Ok(sel) => skip.extend(root.select(&sel)),
            Err(_) => tracing::warn!(selector = %raw, "ignoring invalid clutter selector"),
        }
    }
    let removed_multimedia = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| MULTIMEDIA.contains(&e.value().name()))
        .count();

    let mut body_html = String::with_capacity(html.len() / 2);
    write_children(root, &skip, &settings.preferred_width, &mut body_html);

    CleanArticle {
        title,
        body_html,
        removed_multimedia,
        body_found,
    }
}

fn write_children(el: ElementRef<'_>, skip: &[ElementRef<'_>], token: &str, out: &mut String) {
    for child in el.children() {
        if let Some(ce) = ElementRef::wrap(child) {
            write_element(ce, skip, token, out);
        } else if let Node::Text(t) = child.value() {
            out.push_str(&html_escape::encode_text(&**t));
        }
    }
}

fn write_element(el: ElementRef<'_>, skip: &[ElementRef<'_>], token: &str, out: &mut String) {
    if skip.contains(&el) {
        return;
    }
    let v = el.value();
    let name = v.name();
    if MULTIMEDIA.contains(&name) {
        return;
    }

    out.push('<');
    out.push_str(name);
    if name == "img" {
        if let Some(src) = resolve_img_src(v, token) {
            push_attr(out, "src", &src);
        }
        if let Some(alt) = v.attr("alt") {
            push_attr(out, "alt", alt);
        }
    } else {
        for (k, val) in v.attrs() {
            if matches!(k, "href" | "title" | "colspan" | "rowspan") {
                push_attr(out, k, val);
            }
        }
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    write_children(el, skip, token, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn push_attr(out: &mut String, k: &str, v: &str) {
    out.push(' ');
    out.push_str(k);
    out.push_str("=\"");
    out.push_str(&html_escape::encode_double_quoted_attribute(v));
    out.push('"');
}

/// URL digest plus a per-request nonce, so concurrent requests for one article
/// never share a file.
fn document_name(url: &str, mode: RenderMode, ext: &str) -> String {
    use rand::Rng;
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(url.as_bytes());
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    let nonce: u32 = rand::rng().random();
    format!("article-{out}-{nonce:08x}-{mode}.{ext}")
}

pub struct ArticleSource {
    settings: ArticleSettings,
    credentials: Option<ArticleCredentials>,
    renderer: Box<dyn DocumentRenderer>,
}

impl ArticleSource {
    pub fn new(settings: ArticleSettings, credentials: Option<ArticleCredentials>) -> Self {
        Self {
            settings,
            credentials,
            renderer: Box::new(HtmlRenderer),
        }
    }

    fn default_mode(&self) -> RenderMode {
        self.settings
            .default_mode
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or_default()
    }

    /// Fresh cookie session per fetch: log in, download, clean, render to disk.
    pub async fn fetch_document(
        &self,
        url: &str,
        mode: RenderMode,
    ) -> Result<ArticleDocument, SourceFetchError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| SourceFetchError::Config("ARTICLE_EMAIL / ARTICLE_PASSWORD".into()))?;

        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .build()
            .map_err(|e| SourceFetchError::remote(url, e))?;

        if !self.settings.login_url.is_empty() {
            login(&client, &self.settings, creds, url).await?;
        }

        let html = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceFetchError::from_http(url, e))?
            .text()
            .await
            .map_err(|e| SourceFetchError::from_http(url, e))?;

        let article = clean_article(&html, &self.settings);
        let warning = if !article.body_found {
            Some("Article body not found, the whole page was kept.".to_string())
        } else if article.removed_multimedia > 0 {
            Some(format!(
                "{} multimedia element(s) could not be kept in the document.",
                article.removed_multimedia
            ))
        } else {
            None
        };

        let rendered = self.renderer.render(&article, url, mode);
        let path = self
            .settings
            .output_dir
            .join(document_name(url, mode, self.renderer.extension()));
        write_document(&path, &rendered)
            .await
            .map_err(|e| SourceFetchError::remote(url, e))?;

        tracing::info!(url, %mode, path = %path.display(), "article document rendered");
        Ok(ArticleDocument {
            title: article.title,
            path,
            succeeded: true,
            warning,
        })
    }
}

async fn login(
    client: &Client,
    settings: &ArticleSettings,
    creds: &ArticleCredentials,
    url: &str,
) -> Result<(), SourceFetchError> {
    let form = [
        (settings.email_field.as_str(), creds.email.as_str()),
        (settings.password_field.as_str(), creds.password.as_str()),
    ];
    let rsp = client
        .post(&settings.login_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                SourceFetchError::Timeout {
                    source_id: url.to_string(),
                }
            } else {
                SourceFetchError::Auth {
                    source_id: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
    if !rsp.status().is_success() {
        return Err(SourceFetchError::Auth {
            source_id: url.to_string(),
            reason: format!("login returned HTTP {}", rsp.status()),
        });
    }
    Ok(())
}

async fn write_document(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, content).await
}

#[async_trait]
impl SourceAdapter for ArticleSource {
    async fn fetch_candidates(
        &self,
        source_id: &str,
        _limit: usize,
    ) -> Result<CandidateBatch, SourceFetchError> {
        let doc = self.fetch_document(source_id, self.default_mode()).await?;
        Ok(vec![CandidateItem::document(
            source_id,
            &doc.title,
            doc.path,
            doc.warning,
            Utc::now(),
        )])
    }

    fn name(&self) -> &'static str {
        "article"
    }
}
