// src/config/mod.rs
//! Bot configuration: secrets from the environment, tunables from TOML.
//! Built once in `main` and handed to whoever needs a piece of it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;

use crate::poster::PosterSettings;
use crate::retry::RetryPolicy;
use crate::source::article::{ArticleCredentials, ArticleSettings};
use crate::source::daily::DailySettings;
use crate::source::reddit::RedditCredentials;

pub const ENV_CONFIG_PATH: &str = "GOURGANDIN_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/gourgandin.toml";
pub const DEFAULT_ADMIN_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything read from the environment.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub discord_token: String,
    pub channel_id: String,
    pub reddit: RedditCredentials,
    /// Only needed by the article command; its absence surfaces on first use.
    pub article: Option<ArticleCredentials>,
    pub admin_addr: SocketAddr,
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };
        let optional = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let discord_token = required("DISCORD_TOKEN")?;
        let channel_id = required("DISCORD_CHANNEL_ID")?;
        if !channel_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Invalid {
                name: "DISCORD_CHANNEL_ID",
                reason: "expected a numeric snowflake".into(),
            });
        }
        let reddit = RedditCredentials {
            client_id: required("REDDIT_ID")?,
            client_secret: required("REDDIT_SECRET")?,
            user_agent: required("REDDIT_AGENT")?,
        };
        let article = match (optional("ARTICLE_EMAIL"), optional("ARTICLE_PASSWORD")) {
            (Some(email), Some(password)) => Some(ArticleCredentials { email, password }),
            _ => None,
        };
        let admin_addr: SocketAddr = optional("ADMIN_ADDR")
            .unwrap_or_else(|| DEFAULT_ADMIN_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "ADMIN_ADDR",
                reason: e.to_string(),
            })?;

        Ok(Self {
            discord_token,
            channel_id,
            reddit,
            article,
            admin_addr,
        })
    }
}

fn default_interval_secs() -> u64 {
    3600
}
fn default_registry_path() -> PathBuf {
    PathBuf::from("data/subreddits.txt")
}
fn default_video_domains() -> Vec<String> {
    vec!["redgifs.com".to_string()]
}
fn default_reddit_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    #[serde(flatten)]
    pub poster: PosterSettings,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            registry_path: default_registry_path(),
            poster: PosterSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditSettings {
    #[serde(default = "default_video_domains")]
    pub video_domains: Vec<String>,
    #[serde(default = "default_reddit_timeout")]
    pub timeout_secs: u64,
}

impl Default for RedditSettings {
    fn default() -> Self {
        Self {
            video_domains: default_video_domains(),
            timeout_secs: default_reddit_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "RetryPolicy::history")]
    pub history: RetryPolicy,
    #[serde(default = "RetryPolicy::article")]
    pub article: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            history: RetryPolicy::history(),
            article: RetryPolicy::article(),
        }
    }
}

/// Tunables. Every table is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub reddit: RedditSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub daily: DailySettings,
    #[serde(default)]
    pub article: ArticleSettings,
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(s).context("parsing settings TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// `$GOURGANDIN_CONFIG_PATH` (must exist), else `config/gourgandin.toml`, else defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        tracing::info!("no settings file, using defaults");
        Ok(Self::default())
    }

    pub fn daily_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hhmm(&self.daily.time).map_err(|reason| ConfigError::Invalid {
            name: "daily.time",
            reason,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "poller.interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        for (name, p) in [("retry.history", &self.retry.history), ("retry.article", &self.retry.article)] {
            p.check()
                .map_err(|reason| ConfigError::Invalid { name, reason })?;
        }
        if self.daily.enabled {
            self.daily_time()?;
            if self.daily.url.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    name: "daily.url",
                    reason: "required when the daily source is enabled".into(),
                });
            }
        }
        if let Some(m) = &self.article.default_mode {
            m.parse::<crate::source::article::RenderMode>()
                .map_err(|reason| ConfigError::Invalid {
                    name: "article.default_mode",
                    reason,
                })?;
        }
        Ok(())
    }
}

pub fn parse_hhmm(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| format!("{s:?}: {e}"))
}

/// The whole configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub secrets: Secrets,
    pub settings: Settings,
}

impl BotConfig {
    pub fn load() -> Result<Self> {
        let secrets = Secrets::from_env()?;
        let settings = Settings::load_default()?;
        Ok(Self { secrets, settings })
    }
}
