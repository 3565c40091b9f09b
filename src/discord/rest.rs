// src/discord/rest.rs
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rand::Rng;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::Deserialize;

use super::{BotIdentity, ChannelMessage, DeliveryChannel, DiscordError, Embed};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const PAGE_SIZE: usize = 100;
const USER_AGENT: &str = concat!("DiscordBot (gourgandin, ", env!("CARGO_PKG_VERSION"), ")");
/// Times one request is re-issued after a 429 before the error is handed back.
const DEFAULT_RATE_LIMIT_RETRIES: u32 = 5;
/// Longest server-requested wait honoured in place.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(300);
const RATE_LIMIT_JITTER_MS: u64 = 250;

/// Bot-token REST client bound to a single text channel.
#[derive(Clone)]
pub struct DiscordRest {
    client: Client,
    token: String,
    channel_id: String,
    api_base: String,
    timeout: Duration,
    upload_timeout: Duration,
    rate_limit_retries: u32,
}

#[derive(Deserialize)]
struct UserDto {
    id: String,
    username: String,
}

#[derive(Deserialize)]
struct MessageDto {
    id: String,
    #[serde(default)]
    content: String,
    author: UserDto,
}

#[derive(Deserialize)]
struct CreatedDto {
    id: String,
}

#[derive(Deserialize)]
struct RateLimitDto {
    #[serde(default)]
    retry_after: f64,
}

impl DiscordRest {
    pub fn new(token: String, channel_id: String) -> Self {
        Self {
            client: Client::new(),
            token,
            channel_id,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(60),
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_rate_limit_retries(mut self, n: u32) -> Self {
        self.rate_limit_retries = n;
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn messages_url(&self) -> String {
        format!("{}/channels/{}/messages", self.api_base, self.channel_id)
    }

    /// Sends the request built by `build`, waiting out 429 responses for the delay
    /// Discord asks for and re-issuing it, at most `rate_limit_retries` times.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, DiscordError> {
        let mut waits = 0;
        loop {
            let rsp = build()
                .header("Authorization", self.auth())
                .header("User-Agent", USER_AGENT)
                .send()
                .await?;
            match check(rsp).await {
                Err(DiscordError::RateLimited { retry_after }) if waits < self.rate_limit_retries => {
                    waits += 1;
                    let wait = rate_limit_wait(retry_after);
                    counter!("discord_rate_limited_total").increment(1);
                    tracing::info!(
                        channel = %self.channel_id,
                        attempt = waits,
                        wait_ms = wait.as_millis() as u64,
                        "discord rate limit hit, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    /// `GET /users/@me`; doubles as the token check performed before the bot is ready.
    pub async fn current_user(&self) -> Result<BotIdentity, DiscordError> {
        let url = format!("{}/users/@me", self.api_base);
        let user: UserDto = self
            .send(|| self.client.get(&url).timeout(self.timeout))
            .await?
            .json()
            .await?;
        Ok(BotIdentity {
            id: user.id,
            name: user.username,
        })
    }

    async fn fetch_page(
        &self,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<MessageDto>, DiscordError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(b) = before {
            query.push(("before", b.to_string()));
        }
        let url = self.messages_url();
        let rsp = self
            .send(|| self.client.get(&url).query(&query).timeout(self.timeout))
            .await?;
        Ok(rsp.json().await?)
    }

    async fn post_json(&self, body: serde_json::Value) -> Result<String, DiscordError> {
        let url = self.messages_url();
        let created: CreatedDto = self
            .send(|| self.client.post(&url).timeout(self.timeout).json(&body))
            .await?
            .json()
            .await?;
        Ok(created.id)
    }
}

/// Server-requested delay, capped, plus a little jitter so queued requests spread out.
fn rate_limit_wait(retry_after: f64) -> Duration {
    let base = if retry_after.is_finite() && retry_after > 0.0 {
        Duration::from_secs_f64(retry_after).min(MAX_RATE_LIMIT_WAIT)
    } else {
        Duration::from_secs(1)
    };
    base + Duration::from_millis(rand::rng().random_range(0..RATE_LIMIT_JITTER_MS))
}

async fn check(rsp: Response) -> Result<Response, DiscordError> {
    let status = rsp.status();
    if status.is_success() {
        return Ok(rsp);
    }
    if status.is_server_error() {
        return Err(DiscordError::Server {
            status: status.as_u16(),
        });
    }
    let body = rsp.text().await.unwrap_or_default();
    if status.as_u16() == 429 {
        let retry_after = serde_json::from_str::<RateLimitDto>(&body)
            .map(|r| r.retry_after)
            .unwrap_or(1.0);
        return Err(DiscordError::RateLimited { retry_after });
    }
    Err(DiscordError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DeliveryChannel for DiscordRest {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChannelMessage>, DiscordError> {
        let mut out = Vec::with_capacity(limit.min(1_000));
        let mut before: Option<String> = None;

        while out.len() < limit {
            let want = (limit - out.len()).min(PAGE_SIZE);
            let page = self.fetch_page(want, before.as_deref()).await?;
            let exhausted = page.len() < want;
            before = page.last().map(|m| m.id.clone());
            out.extend(page.into_iter().map(|m| ChannelMessage {
                id: m.id,
                author_id: m.author.id,
                content: m.content,
            }));
            if exhausted || before.is_none() {
                break;
            }
        }

        tracing::debug!(channel = %self.channel_id, fetched = out.len(), "channel history page walk done");
        Ok(out)
    }

    async fn send_text(&self, content: &str) -> Result<String, DiscordError> {
        self.post_json(serde_json::json!({ "content": content }))
            .await
    }

    async fn send_embed(&self, embed: &Embed) -> Result<String, DiscordError> {
        self.post_json(serde_json::json!({ "embeds": [embed] })).await
    }

    async fn send_file(&self, path: &Path) -> Result<String, DiscordError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| DiscordError::File {
            path: path.display().to_string(),
            source: e,
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        // A multipart body is consumed by the request, so each attempt rebuilds it.
        let form = || {
            multipart::Form::new()
                .text("payload_json", "{}")
                .part("files[0]", multipart::Part::bytes(bytes.clone()).file_name(name.clone()))
        };

        let url = self.messages_url();
        let created: CreatedDto = self
            .send(|| {
                self.client
                    .post(&url)
                    .timeout(self.upload_timeout)
                    .multipart(form())
            })
            .await?
            .json()
            .await?;
        Ok(created.id)
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), DiscordError> {
        let url = format!("{}/{}", self.messages_url(), message_id);
        self.send(|| self.client.delete(&url).timeout(self.timeout))
            .await?;
        Ok(())
    }
}
