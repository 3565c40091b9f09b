// tests/common/mod.rs
//
// In-memory stand-ins for the Discord channel and the content sources.
// The fake channel keeps a transcript, so whatever the bot sends becomes
// part of the history the next cycle reads back.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use gourgandin::discord::{BotIdentity, ChannelMessage, DeliveryChannel, DiscordError, Embed};
use gourgandin::source::{
    CandidateBatch, CandidateItem, ClassificationError, SourceAdapter, SourceFetchError,
};

pub fn bot() -> BotIdentity {
    BotIdentity {
        id: "900".into(),
        name: "gourgandin".into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    Embed(Embed),
    File(PathBuf),
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    // (id, author, content, what was sent), oldest first
    transcript: Vec<(String, String, String, Option<Sent>)>,
    deleted: Vec<String>,
    history_script: VecDeque<u16>,
    history_always_fails: Option<u16>,
    history_calls: u32,
    failing_titles: Vec<String>,
}

#[derive(Default)]
pub struct FakeChannel {
    bot_id: String,
    inner: Mutex<Inner>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self {
            bot_id: bot().id,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Pretend the bot delivered these keys in an earlier run.
    pub fn with_history(self, keys: &[&str]) -> Self {
        for k in keys {
            self.push(&self.bot_id.clone(), k, None);
        }
        self
    }

    /// A message from a human that happens to contain a key.
    pub fn with_foreign(self, content: &str) -> Self {
        self.push("42", content, None);
        self
    }

    /// History reads fail with these HTTP statuses, in order, then succeed.
    pub fn history_failures(self, statuses: &[u16]) -> Self {
        self.inner.lock().unwrap().history_script = statuses.iter().copied().collect();
        self
    }

    pub fn history_always_fails(self, status: u16) -> Self {
        self.inner.lock().unwrap().history_always_fails = Some(status);
        self
    }

    /// Embeds with this title are rejected.
    pub fn fail_embed_titled(self, title: &str) -> Self {
        self.inner.lock().unwrap().failing_titles.push(title.to_string());
        self
    }

    fn push(&self, author: &str, content: &str, sent: Option<Sent>) -> String {
        let mut g = self.inner.lock().unwrap();
        g.next_id += 1;
        let id = format!("m{}", g.next_id);
        g.transcript
            .push((id.clone(), author.to_string(), content.to_string(), sent));
        id
    }

    /// Everything the bot sent during the test, in order.
    pub fn sent(&self) -> Vec<Sent> {
        let g = self.inner.lock().unwrap();
        g.transcript.iter().filter_map(|(_, _, _, s)| s.clone()).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn embeds(&self) -> Vec<Embed> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Embed(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn id_of_text(&self, text: &str) -> Option<String> {
        let g = self.inner.lock().unwrap();
        g.transcript
            .iter()
            .find(|(_, _, c, s)| c == text && matches!(s, Some(Sent::Text(_))))
            .map(|(id, ..)| id.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }

    pub fn history_calls(&self) -> u32 {
        self.inner.lock().unwrap().history_calls
    }
}

fn status_error(status: u16) -> DiscordError {
    if status >= 500 {
        DiscordError::Server { status }
    } else {
        DiscordError::Status {
            status,
            body: "{}".into(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for FakeChannel {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChannelMessage>, DiscordError> {
        let mut g = self.inner.lock().unwrap();
        g.history_calls += 1;
        if let Some(s) = g.history_always_fails {
            return Err(status_error(s));
        }
        if let Some(s) = g.history_script.pop_front() {
            return Err(status_error(s));
        }
        Ok(g.transcript
            .iter()
            .rev()
            .filter(|(id, ..)| !g.deleted.contains(id))
            .take(limit)
            .map(|(id, author, content, _)| ChannelMessage {
                id: id.clone(),
                author_id: author.clone(),
                content: content.clone(),
            })
            .collect())
    }

    async fn send_text(&self, content: &str) -> Result<String, DiscordError> {
        Ok(self.push(&self.bot_id, content, Some(Sent::Text(content.to_string()))))
    }

    async fn send_embed(&self, embed: &Embed) -> Result<String, DiscordError> {
        let failing = self
            .inner
            .lock()
            .unwrap()
            .failing_titles
            .contains(&embed.title);
        if failing {
            return Err(status_error(400));
        }
        Ok(self.push(&self.bot_id, "", Some(Sent::Embed(embed.clone()))))
    }

    async fn send_file(&self, path: &Path) -> Result<String, DiscordError> {
        if !path.exists() {
            return Err(DiscordError::File {
                path: path.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(self.push(&self.bot_id, "", Some(Sent::File(path.to_path_buf()))))
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), DiscordError> {
        self.inner.lock().unwrap().deleted.push(message_id.to_string());
        Ok(())
    }
}

pub enum Scripted {
    Batch(CandidateBatch),
    NotFound,
    Timeout,
}

/// Source whose answers are fixed per source id.
#[derive(Default)]
pub struct FakeSource {
    answers: HashMap<String, Vec<Result<CandidateItem, ClassificationError>>>,
    failing: HashMap<String, bool>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: &str, answer: Scripted) -> Self {
        match answer {
            Scripted::Batch(b) => {
                self.answers.insert(source.to_string(), b);
            }
            Scripted::NotFound => {
                self.failing.insert(source.to_string(), false);
            }
            Scripted::Timeout => {
                self.failing.insert(source.to_string(), true);
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    async fn fetch_candidates(
        &self,
        source_id: &str,
        limit: usize,
    ) -> Result<CandidateBatch, SourceFetchError> {
        self.calls.lock().unwrap().push(source_id.to_string());
        match self.failing.get(source_id) {
            Some(true) => {
                return Err(SourceFetchError::Timeout {
                    source_id: source_id.to_string(),
                })
            }
            Some(false) => {
                return Err(SourceFetchError::NotFound {
                    source_id: source_id.to_string(),
                })
            }
            None => {}
        }
        Ok(self
            .answers
            .get(source_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .collect())
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    fn label(&self, source_id: &str) -> String {
        format!("r/{source_id}")
    }
}

pub fn image(source: &str, key: &str) -> Result<CandidateItem, ClassificationError> {
    CandidateItem::single_image(source, &format!("title {key}"), key, Utc::now())
}

pub fn images(source: &str, keys: &[&str]) -> Scripted {
    Scripted::Batch(keys.iter().map(|k| image(source, k)).collect())
}

/// Bot-sent plain messages that are image URLs, i.e. the key messages.
pub fn delivered_keys(ch: &FakeChannel) -> Vec<String> {
    ch.texts()
        .into_iter()
        .filter(|t| t.starts_with("https://"))
        .collect()
}
