// tests/history_oracle.rs
//
// Delivered-set reconstruction from the channel transcript.

mod common;

use common::*;
use gourgandin::history::{ChannelHistory, DeliveredSet, DeliveryHistoryOracle};
use gourgandin::retry::RetryPolicy;

#[tokio::test]
async fn only_bot_authored_contents_are_keys() {
    let ch = FakeChannel::new()
        .with_history(&["https://img/1.png", "https://img/2.png"])
        .with_foreign("https://img/3.png");

    let set = ChannelHistory::default().delivered_keys(&ch, &bot(), 500).await;

    assert!(set.contains("https://img/1.png"));
    assert!(set.contains("https://img/2.png"));
    assert!(!set.contains("https://img/3.png"));
    assert_eq!(set.len(), 2);
}

#[tokio::test]
async fn lookback_is_bounded_by_history_limit() {
    let ch = FakeChannel::new().with_history(&["old", "mid", "new"]);

    let set = ChannelHistory::default().delivered_keys(&ch, &bot(), 2).await;

    assert!(set.contains("new") && set.contains("mid"));
    assert!(!set.contains("old"));
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_retried_until_success() {
    let ch = FakeChannel::new()
        .with_history(&["k"])
        .history_failures(&[500, 503]);

    let set = ChannelHistory::default().delivered_keys(&ch, &bot(), 500).await;

    assert_eq!(ch.history_calls(), 3);
    assert!(set.contains("k"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_unavailable() {
    let ch = FakeChannel::new().history_always_fails(503);
    let policy = RetryPolicy::history().with_max_attempts(3);

    let set = ChannelHistory::new(policy).delivered_keys(&ch, &bot(), 500).await;

    assert_eq!(set, DeliveredSet::Unavailable);
    assert_eq!(ch.history_calls(), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let ch = FakeChannel::new().history_always_fails(403);

    let set = ChannelHistory::default().delivered_keys(&ch, &bot(), 500).await;

    assert!(!set.is_available());
    assert_eq!(ch.history_calls(), 1);
}
