// src/retry.rs
//! Bounded retry with exponential backoff and proportional jitter.
//!
//! The guarded operation is passed in explicitly; the caller decides which errors
//! are worth another attempt through a predicate. Exhaustion hands back the last
//! error untouched.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_secs() -> f64 {
    1.0
}
fn default_max_delay_secs() -> f64 {
    60.0
}
fn default_backoff() -> f64 {
    2.0
}

/// Retry tuning. Delays are expressed in seconds so the policy reads naturally from TOML.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    /// Uniform jitter factor range, multiplied by the current delay.
    #[serde(default)]
    pub jitter: (f64, f64),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            backoff: default_backoff(),
            jitter: (0.0, 0.0),
        }
    }
}

impl RetryPolicy {
    /// Tuning used for channel history reads: a few quick attempts on Discord 5xx.
    pub fn history() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_secs: 1.0,
            max_delay_secs: 30.0,
            backoff: 2.0,
            jitter: (0.0, 1.0),
        }
    }

    /// Tuning used for article downloads: slow site, user is watching.
    pub fn article() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 2.0,
            max_delay_secs: 10.0,
            backoff: 1.2,
            jitter: (0.0, 1.0),
        }
    }

    /// One unguarded call.
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_delays(mut self, initial_secs: f64, max_secs: f64) -> Self {
        self.initial_delay_secs = initial_secs;
        self.max_delay_secs = max_secs;
        self
    }

    pub fn with_backoff(mut self, factor: f64, jitter: (f64, f64)) -> Self {
        self.backoff = factor;
        self.jitter = jitter;
        self
    }

    /// Rejects tunings the backoff arithmetic cannot use: non-finite or negative
    /// numbers and an inverted jitter range.
    pub fn check(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        let (lo, hi) = self.jitter;
        for (field, v) in [
            ("initial_delay_secs", self.initial_delay_secs),
            ("max_delay_secs", self.max_delay_secs),
            ("backoff", self.backoff),
            ("jitter", lo),
            ("jitter", hi),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("{field} must be a finite, non-negative number"));
            }
        }
        if lo > hi {
            return Err(format!("jitter range [{lo}, {hi}] is inverted"));
        }
        Ok(())
    }

    fn initial_delay(&self) -> Duration {
        secs(self.initial_delay_secs)
    }

    /// `min(max_delay, delay * backoff + j * delay)` with `j` drawn from the jitter range.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let (lo, hi) = self.jitter;
        let j = if lo < hi && (hi - lo).is_finite() {
            rand::rng().random_range(lo..hi)
        } else {
            lo
        };
        let d = current.as_secs_f64();
        let next = d * self.backoff + j * d;
        secs(next.min(self.max_delay_secs))
    }
}

fn secs(v: f64) -> Duration {
    if v.is_finite() && v > 0.0 {
        Duration::from_secs_f64(v)
    } else {
        Duration::ZERO
    }
}

/// Per-invocation bookkeeping, dropped on success or exhaustion.
#[derive(Debug)]
pub struct RetryState {
    pub attempts_remaining: u32,
    pub current_delay: Duration,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts_remaining: policy.max_attempts.max(1),
            current_delay: policy.initial_delay(),
        }
    }
}

/// Run `op` under `policy`, retrying errors for which `retryable` returns true.
pub async fn execute_with_retry<T, E, Op, Fut, P>(
    policy: &RetryPolicy,
    retryable: P,
    op: Op,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    execute_with_retry_notify(policy, retryable, op, |_, _, _: &E| async {}).await
}

/// Same as [`execute_with_retry`], calling `on_retry(attempt, delay, &err)` before each
/// backoff sleep. `attempt` counts failed attempts so far, starting at 1. The callback
/// is not invoked after the final failed attempt.
pub async fn execute_with_retry_notify<T, E, Op, Fut, P, N, NFut>(
    policy: &RetryPolicy,
    retryable: P,
    mut op: Op,
    mut on_retry: N,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    N: FnMut(u32, Duration, &E) -> NFut,
    NFut: Future<Output = ()>,
{
    let total = policy.max_attempts.max(1);
    let mut state = RetryState::new(policy);

    loop {
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !retryable(&err) {
            return Err(err);
        }

        state.attempts_remaining -= 1;
        let attempt = total - state.attempts_remaining;
        if state.attempts_remaining == 0 {
            tracing::debug!(attempt, "retry budget exhausted");
            return Err(err);
        }

        let delay = state.current_delay;
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after failure");
        on_retry(attempt, delay, &err).await;

        tokio::time::sleep(delay).await;
        state.current_delay = policy.next_delay(delay);
    }
}
