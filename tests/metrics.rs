// tests/metrics.rs
//
// The Prometheus recorder is process-global, so everything lives in one test.

mod common;

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::*;
use gourgandin::history::ChannelHistory;
use gourgandin::metrics::Metrics;
use gourgandin::{Poster, PosterSettings};

#[tokio::test]
async fn cycle_counters_show_up_on_metrics_endpoint() {
    let metrics = Metrics::init(3600).expect("install recorder");

    let ch = Arc::new(FakeChannel::new().with_history(&["https://img/1.png"]));
    let source = FakeSource::new()
        .with("pics", images("pics", &["https://img/1.png", "https://img/2.png"]))
        .with("gone", Scripted::NotFound);
    let poster = Poster::new(
        ch.clone(),
        Arc::new(ChannelHistory::default()),
        Arc::new(source),
        PosterSettings::default(),
    );
    poster
        .run_cycle(&bot(), &["pics".to_string(), "gone".to_string()])
        .await;

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "poller_interval_secs 3600",
        "poster_cycles_total{adapter=\"fake\"} 1",
        "poster_delivered_total{adapter=\"fake\"} 1",
        "poster_skipped_duplicate_total{adapter=\"fake\"} 1",
        "poster_source_errors_total{adapter=\"fake\"} 1",
        "poster_last_cycle_ts",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
}
