// src/discord/mod.rs
//! The delivery channel seen by the poller: a Discord text channel reached over REST.

pub mod rest;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

pub use rest::DiscordRest;

/// Discord caps embed titles at 256 characters.
pub const EMBED_TITLE_MAX: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("discord server error (HTTP {status})")]
    Server { status: u16 },
    #[error("discord rate limit hit, retry after {retry_after:.1}s")]
    RateLimited { retry_after: f64 },
    #[error("discord returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("discord request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("reading {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DiscordError {
    /// 5xx class, the only failure the history reader treats as transient.
    pub fn is_server_error(&self) -> bool {
        matches!(self, DiscordError::Server { .. })
    }
}

/// The bot's own user, established once the token has been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: String,
    pub author_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// Rich display message. Built through [`Embed::new`] so the title limit always holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

impl Embed {
    pub fn new(title: &str) -> Self {
        Self {
            title: truncate_chars(title, EMBED_TITLE_MAX),
            ..Self::default()
        }
    }

    pub fn description(mut self, d: impl Into<String>) -> Self {
        self.description = Some(d.into());
        self
    }

    pub fn url(mut self, u: impl Into<String>) -> Self {
        self.url = Some(u.into());
        self
    }

    pub fn footer(mut self, text: impl Into<String>, icon_url: Option<String>) -> Self {
        self.footer = Some(EmbedFooter {
            text: text.into(),
            icon_url,
        });
        self
    }
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Everything the poster, the history oracle and the article command need from a channel.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Up to `limit` most recent messages, newest first.
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChannelMessage>, DiscordError>;
    /// Returns the id of the created message.
    async fn send_text(&self, content: &str) -> Result<String, DiscordError>;
    async fn send_embed(&self, embed: &Embed) -> Result<String, DiscordError>;
    async fn send_file(&self, path: &Path) -> Result<String, DiscordError>;
    async fn delete_message(&self, message_id: &str) -> Result<(), DiscordError>;
}
