// src/scheduler.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::discord::BotIdentity;

/// Opened once, when the bot identity is known. Everything scheduled waits on it.
#[derive(Clone, Debug)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<Option<BotIdentity>>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Later calls are ignored; the first identity wins.
    pub fn open(&self, identity: BotIdentity) {
        let opened = self.tx.send_if_modified(|cur| {
            if cur.is_some() {
                return false;
            }
            *cur = Some(identity);
            true
        });
        if opened {
            tracing::info!("ready gate opened");
        }
    }

    pub fn identity(&self) -> Option<BotIdentity> {
        self.tx.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub async fn wait(&self) -> BotIdentity {
        let mut rx = self.tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(id) = current {
                return id;
            }
            // The sender lives inside the gate, so this only fails if `self` is gone.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Fixed-period job. The first run happens as soon as the gate opens; a run that
/// overshoots the period delays the next tick instead of skipping it.
pub fn spawn_interval<F, Fut>(
    gate: ReadyGate,
    name: &'static str,
    period: Duration,
    job: F,
) -> JoinHandle<()>
where
    F: Fn(BotIdentity) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let bot = gate.wait().await;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(job = name, period_secs = period.as_secs(), "interval job started");
        loop {
            ticker.tick().await;
            counter!("scheduler_runs_total", "job" => name).increment(1);
            gauge!("scheduler_last_run_ts", "job" => name).set(chrono::Utc::now().timestamp() as f64);
            job(bot.clone()).await;
        }
    })
}

/// Daily job at a local wall-clock time, optionally weekdays only.
pub fn spawn_daily<F, Fut>(
    gate: ReadyGate,
    name: &'static str,
    at: NaiveTime,
    skip_weekends: bool,
    job: F,
) -> JoinHandle<()>
where
    F: Fn(BotIdentity) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let bot = gate.wait().await;
        tracing::info!(job = name, %at, skip_weekends, "daily job started");
        let mut fire = next_daily_fire(Local::now(), at);
        loop {
            let wait = (fire - Local::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(job = name, next = %fire, "daily job sleeping");
            tokio::time::sleep(wait).await;

            let today = fire.date_naive();
            fire = next_daily_fire_after(fire, Local::now(), at);
            if skip_weekends && !is_weekday(today) {
                tracing::info!(job = name, %today, "weekend, daily job skipped");
                continue;
            }
            counter!("scheduler_runs_total", "job" => name).increment(1);
            gauge!("scheduler_last_run_ts", "job" => name).set(chrono::Utc::now().timestamp() as f64);
            job(bot.clone()).await;
        }
    })
}

/// Next occurrence of `at` strictly after `now` (today if still ahead, else tomorrow).
pub fn next_daily_naive(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if now < today {
        today
    } else {
        (now.date() + chrono::Duration::days(1)).and_time(at)
    }
}

pub fn next_daily_fire<Tz: TimeZone>(now: DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut naive = next_daily_naive(now.naive_local(), at);
    // A wall-clock time swallowed by a DST jump fires an hour later.
    for _ in 0..3 {
        if let Some(t) = tz.from_local_datetime(&naive).earliest() {
            return t;
        }
        naive += chrono::Duration::hours(1);
    }
    now + chrono::Duration::days(1)
}

/// Occurrence following the one that just fired. Never the same slot again, even when
/// the wall clock reads slightly behind the timer that woke us.
pub fn next_daily_fire_after<Tz: TimeZone>(
    fired: DateTime<Tz>,
    now: DateTime<Tz>,
    at: NaiveTime,
) -> DateTime<Tz> {
    next_daily_fire(fired.max(now), at)
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
