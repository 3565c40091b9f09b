// src/poster.rs
//! One poller cycle: read history, fetch candidates, drop what was already posted,
//! deliver the rest. Sources are isolated from each other.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::discord::{BotIdentity, DeliveryChannel, DiscordError, Embed};
use crate::history::{DeliveredSet, DeliveryHistoryOracle, DEFAULT_HISTORY_LIMIT};
use crate::source::reddit::album_icon;
use crate::source::{CandidateItem, CandidateKind, Payload, SourceAdapter};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poster_cycles_total", "Poller cycles started.");
        describe_counter!("poster_delivered_total", "Items delivered (display + key message).");
        describe_counter!(
            "poster_skipped_duplicate_total",
            "Candidates dropped because their key was already delivered."
        );
        describe_counter!(
            "poster_classification_errors_total",
            "Candidates that could not be classified."
        );
        describe_counter!("poster_source_errors_total", "Sources that could not be fetched.");
        describe_counter!(
            "poster_history_unavailable_total",
            "Sources skipped because delivery history could not be read."
        );
        describe_counter!("poster_delivery_errors_total", "Items whose delivery failed.");
        describe_gauge!("poster_last_cycle_ts", "Unix ts of the last finished cycle.");
        describe_counter!("discord_rate_limited_total", "Discord 429 responses waited out.");
    });
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}
fn default_fetch_limit() -> usize {
    10
}
fn default_max_age_hours() -> Option<i64> {
    Some(DEFAULT_MAX_AGE_HOURS)
}

/// Submissions older than this are never posted, even when they have left the history window.
pub const DEFAULT_MAX_AGE_HOURS: i64 = 3;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PosterSettings {
    /// How many channel messages make up the delivered set.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Candidates requested per source and cycle.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    /// Drop candidates older than this many hours. `0` or less turns the filter off.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: Option<i64>,
}

impl Default for PosterSettings {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            fetch_limit: default_fetch_limit(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

impl PosterSettings {
    /// Same settings with the freshness filter off, for sources whose items carry no age.
    pub fn without_max_age(self) -> Self {
        Self {
            max_age_hours: None,
            ..self
        }
    }

    fn max_age(&self) -> Option<ChronoDuration> {
        self.max_age_hours
            .filter(|h| *h > 0)
            .map(ChronoDuration::hours)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PosterPhase {
    Idle,
    FetchingHistory,
    FetchingCandidates,
    Filtering,
    Delivering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Processed,
    HistoryUnavailable,
    FetchFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub status: SourceStatus,
    pub candidates: usize,
    pub classification_errors: usize,
    pub skipped_duplicates: usize,
    pub skipped_stale: usize,
    /// Keys delivered, in delivery order.
    pub delivered: Vec<String>,
    pub delivery_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    fn new(source: &str, status: SourceStatus) -> Self {
        Self {
            source: source.to_string(),
            status,
            candidates: 0,
            classification_errors: 0,
            skipped_duplicates: 0,
            skipped_stale: 0,
            delivered: Vec::new(),
            delivery_errors: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    pub fn delivered_keys(&self) -> Vec<&str> {
        self.sources
            .iter()
            .flat_map(|s| s.delivered.iter().map(String::as_str))
            .collect()
    }

    pub fn delivered_count(&self) -> usize {
        self.sources.iter().map(|s| s.delivered.len()).sum()
    }

    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == name)
    }
}

/// Outcome of the filtering step for one source.
#[derive(Debug, Default)]
pub struct Selection {
    pub survivors: Vec<CandidateItem>,
    pub duplicates: Vec<CandidateItem>,
    pub stale: Vec<CandidateItem>,
}

/// Keep candidates whose key is neither delivered nor already seen this cycle,
/// in fetch order. `seen` is extended with every survivor.
pub fn select_survivors(
    candidates: Vec<CandidateItem>,
    delivered: &DeliveredSet,
    seen: &mut HashSet<String>,
    max_age: Option<ChronoDuration>,
    now: DateTime<Utc>,
) -> Selection {
    let mut out = Selection::default();
    for item in candidates {
        if delivered.contains(&item.dedupe_key) || seen.contains(&item.dedupe_key) {
            out.duplicates.push(item);
            continue;
        }
        if let Some(age) = max_age {
            if !item.is_younger_than(age, now) {
                out.stale.push(item);
                continue;
            }
        }
        seen.insert(item.dedupe_key.clone());
        out.survivors.push(item);
    }
    out
}

pub struct Poster {
    channel: Arc<dyn DeliveryChannel>,
    oracle: Arc<dyn DeliveryHistoryOracle>,
    adapter: Arc<dyn SourceAdapter>,
    settings: PosterSettings,
    phase: Mutex<PosterPhase>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl Poster {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        oracle: Arc<dyn DeliveryHistoryOracle>,
        adapter: Arc<dyn SourceAdapter>,
        settings: PosterSettings,
    ) -> Self {
        ensure_metrics_described();
        Self {
            channel,
            oracle,
            adapter,
            settings,
            phase: Mutex::new(PosterPhase::Idle),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn phase(&self) -> PosterPhase {
        *self.phase.lock().expect("poster phase mutex poisoned")
    }

    fn set_phase(&self, next: PosterPhase) {
        let mut p = self.phase.lock().expect("poster phase mutex poisoned");
        if *p != next {
            tracing::debug!(adapter = self.adapter.name(), from = ?*p, to = ?next, "poster phase");
            *p = next;
        }
    }

    /// Run one cycle over `sources`. Cycles never overlap: a second caller waits
    /// for the running one to finish and then runs against fresh history.
    pub async fn run_cycle(&self, bot: &BotIdentity, sources: &[String]) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let adapter = self.adapter.name();
        counter!("poster_cycles_total", "adapter" => adapter).increment(1);
        tracing::info!(adapter, sources = sources.len(), "poller cycle started");

        let mut seen = HashSet::new();
        let mut report = CycleReport::default();
        for source in sources {
            let r = self.run_source(bot, source, &mut seen).await;
            report.sources.push(r);
        }

        self.set_phase(PosterPhase::Idle);
        gauge!("poster_last_cycle_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            adapter,
            delivered = report.delivered_count(),
            "poller cycle finished"
        );
        report
    }

    async fn run_source(
        &self,
        bot: &BotIdentity,
        source: &str,
        seen: &mut HashSet<String>,
    ) -> SourceReport {
        let adapter = self.adapter.name();

        self.set_phase(PosterPhase::FetchingHistory);
        let delivered = self
            .oracle
            .delivered_keys(self.channel.as_ref(), bot, self.settings.history_limit)
            .await;
        if !delivered.is_available() {
            counter!("poster_history_unavailable_total", "adapter" => adapter).increment(1);
            tracing::warn!(source, "delivery history unavailable, source skipped this cycle");
            return SourceReport::new(source, SourceStatus::HistoryUnavailable);
        }

        self.set_phase(PosterPhase::FetchingCandidates);
        let batch = match self
            .adapter
            .fetch_candidates(source, self.settings.fetch_limit)
            .await
        {
            Ok(b) => b,
            Err(e) => {
                counter!("poster_source_errors_total", "adapter" => adapter).increment(1);
                tracing::error!(source, error = %e, "source fetch failed");
                let mut r = SourceReport::new(source, SourceStatus::FetchFailed);
                r.error = Some(e.to_string());
                return r;
            }
        };

        self.set_phase(PosterPhase::Filtering);
        let mut report = SourceReport::new(source, SourceStatus::Processed);
        report.candidates = batch.len();
        let mut candidates = Vec::with_capacity(batch.len());
        for c in batch {
            match c {
                Ok(item) => candidates.push(item),
                Err(e) => {
                    report.classification_errors += 1;
                    counter!("poster_classification_errors_total", "adapter" => adapter)
                        .increment(1);
                    tracing::info!(source, item = %e.item_id, reason = %e.reason, "candidate skipped");
                }
            }
        }

        let selection =
            select_survivors(candidates, &delivered, seen, self.settings.max_age(), Utc::now());
        report.skipped_duplicates = selection.duplicates.len();
        report.skipped_stale = selection.stale.len();
        counter!("poster_skipped_duplicate_total", "adapter" => adapter)
            .increment(selection.duplicates.len() as u64);
        for dropped in selection.duplicates.iter().chain(selection.stale.iter()) {
            tracing::debug!(source, key = %dropped.dedupe_key, "candidate not delivered");
            discard_document(dropped).await;
        }

        self.set_phase(PosterPhase::Delivering);
        let label = self.adapter.label(source);
        for item in &selection.survivors {
            match self.deliver(&label, item).await {
                Ok(()) => {
                    counter!("poster_delivered_total", "adapter" => adapter).increment(1);
                    tracing::info!(source, key = %item.dedupe_key, "item delivered");
                    report.delivered.push(item.dedupe_key.clone());
                }
                Err(e) => {
                    counter!("poster_delivery_errors_total", "adapter" => adapter).increment(1);
                    tracing::error!(source, key = %item.dedupe_key, error = %e, "delivery failed");
                    report.delivery_errors += 1;
                }
            }
        }
        report
    }

    /// Display message, optional document upload, then the bare key message.
    async fn deliver(&self, label: &str, item: &CandidateItem) -> Result<(), DiscordError> {
        let mut embed = Embed::new(&item.title).description(label);
        if let Some(link) = &item.link {
            embed = embed.url(link);
        }
        if let CandidateKind::Album { count } = item.kind {
            embed = embed.footer(format!("Album of {count} images"), Some(album_icon().to_string()));
        }

        if let Err(e) = self.channel.send_embed(&embed).await {
            discard_document(item).await;
            return Err(e);
        }

        if let Payload::Document { path, warning } = &item.payload {
            let uploaded = self.channel.send_file(path).await;
            remove_file(path).await;
            uploaded?;
            if let Some(w) = warning {
                self.channel.send_text(w).await?;
            }
        }

        self.channel.send_text(&item.dedupe_key).await?;
        self.oracle.record(&item.dedupe_key).await;

        if let Some(extra) = &item.follow_up {
            if let Err(e) = self.channel.send_text(extra).await {
                tracing::warn!(key = %item.dedupe_key, error = %e, "follow-up message not sent");
            }
        }
        Ok(())
    }
}

async fn discard_document(item: &CandidateItem) {
    if let Payload::Document { path, .. } = &item.payload {
        remove_file(path).await;
    }
}

async fn remove_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "could not remove document");
        }
    }
}
