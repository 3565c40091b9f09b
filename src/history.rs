//! history.rs — what the bot already posted, read back from the channel itself.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use metrics::counter;

use crate::discord::{BotIdentity, DeliveryChannel, DiscordError};
use crate::retry::{execute_with_retry, RetryPolicy};

/// Lookback used when nothing else is configured. A tunable, not a guarantee.
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// Dedupe keys already delivered to a channel, or the fact that we could not tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveredSet {
    Known(HashSet<String>),
    Unavailable,
}

impl DeliveredSet {
    pub fn is_available(&self) -> bool {
        matches!(self, DeliveredSet::Known(_))
    }

    pub fn contains(&self, key: &str) -> bool {
        match self {
            DeliveredSet::Known(set) => set.contains(key),
            DeliveredSet::Unavailable => false,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DeliveredSet::Known(set) => set.len(),
            DeliveredSet::Unavailable => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait DeliveryHistoryOracle: Send + Sync {
    async fn delivered_keys(
        &self,
        channel: &dyn DeliveryChannel,
        bot: &BotIdentity,
        history_limit: usize,
    ) -> DeliveredSet;

    /// Called after a key message went out. The transcript oracle needs nothing here.
    async fn record(&self, _key: &str) {}
}

/// Reads the channel transcript: the bot's own messages are the delivery log.
#[derive(Debug, Clone)]
pub struct ChannelHistory {
    policy: RetryPolicy,
}

impl ChannelHistory {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Default for ChannelHistory {
    fn default() -> Self {
        Self::new(RetryPolicy::history())
    }
}

#[async_trait]
impl DeliveryHistoryOracle for ChannelHistory {
    async fn delivered_keys(
        &self,
        channel: &dyn DeliveryChannel,
        bot: &BotIdentity,
        history_limit: usize,
    ) -> DeliveredSet {
        let res = execute_with_retry(&self.policy, DiscordError::is_server_error, || {
            channel.recent_messages(history_limit)
        })
        .await;

        match res {
            Ok(messages) => {
                let keys: HashSet<String> = messages
                    .into_iter()
                    .filter(|m| m.author_id == bot.id)
                    .map(|m| m.content)
                    .collect();
                tracing::debug!(keys = keys.len(), "delivery history loaded");
                DeliveredSet::Known(keys)
            }
            Err(e) => {
                tracing::warn!(error = %e, "channel history unavailable");
                counter!("history_unavailable_total").increment(1);
                DeliveredSet::Unavailable
            }
        }
    }
}

/// Bounded in-process record of recent keys; forgets everything on restart.
#[derive(Debug)]
pub struct RecentKeys {
    inner: Mutex<VecDeque<String>>,
    cap: usize,
}

impl RecentKeys {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 100_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap.min(1_024))),
            cap,
        }
    }

    pub fn snapshot(&self) -> HashSet<String> {
        let v = self.inner.lock().expect("recent keys mutex poisoned");
        v.iter().cloned().collect()
    }
}

#[async_trait]
impl DeliveryHistoryOracle for RecentKeys {
    async fn delivered_keys(
        &self,
        _channel: &dyn DeliveryChannel,
        _bot: &BotIdentity,
        _history_limit: usize,
    ) -> DeliveredSet {
        DeliveredSet::Known(self.snapshot())
    }

    async fn record(&self, key: &str) {
        let mut v = self.inner.lock().expect("recent keys mutex poisoned");
        if let Some(pos) = v.iter().position(|k| k == key) {
            v.remove(pos);
        }
        v.push_back(key.to_string());
        while v.len() > self.cap {
            v.pop_front();
        }
    }
}
