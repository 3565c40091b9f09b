// tests/api_http.rs
//
// HTTP-level tests for the admin Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET/POST/DELETE /sources (listing, conflict, not found)
// - POST /poll/run (503 before ready, report after)
// - POST /article (accepted, bad mode rejected)

mod common;

use std::sync::Arc;

use axum::{
    body::{self, Body},
    Router,
};
use http::{Request, StatusCode};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use common::*;
use gourgandin::command::ArticleCommand;
use gourgandin::history::ChannelHistory;
use gourgandin::registry::SourceRegistry;
use gourgandin::retry::RetryPolicy;
use gourgandin::source::article::{ArticleSettings, ArticleSource};
use gourgandin::{create_router, AppState, Poster, PosterSettings, ReadyGate};

const BODY_LIMIT: usize = 1024 * 1024;

struct Harness {
    app: Router,
    gate: ReadyGate,
    channel: Arc<FakeChannel>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let channel = Arc::new(FakeChannel::new());
    let source = FakeSource::new().with("pics", images("pics", &["https://img/1.png", "https://img/2.png"]));
    let poster = Poster::new(
        channel.clone(),
        Arc::new(ChannelHistory::default()),
        Arc::new(source),
        PosterSettings::default(),
    );
    let article = ArticleCommand::new(
        Arc::new(ArticleSource::new(ArticleSettings::default(), None)),
        RetryPolicy::single(),
    );
    let gate = ReadyGate::new();
    let state = AppState {
        registry: Arc::new(SourceRegistry::new(dir.path().join("subs.txt"))),
        poster: Arc::new(poster),
        article: Arc::new(article),
        channel: channel.clone(),
        gate: gate.clone(),
    };
    Harness {
        app: create_router(state),
        gate,
        channel,
        _dir: dir,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, String) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, String::from_utf8(bytes).expect("utf8"))
}

#[tokio::test]
async fn health_returns_ok() {
    let h = harness();
    let (status, body) = send(&h.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn source_list_add_remove_round() {
    let h = harness();

    let (s, body) = send(&h.app, "GET", "/sources", None).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body, "No source registered.");

    let (s, body) = send(&h.app, "POST", "/sources", Some(json!({ "name": "pics" }))).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body, "pics added to the list.");

    let (s, body) = send(&h.app, "POST", "/sources", Some(json!({ "name": "pics" }))).await;
    assert_eq!(s, StatusCode::CONFLICT);
    assert_eq!(body, "pics is already in the list.");

    send(&h.app, "POST", "/sources", Some(json!({ "name": "art" }))).await;
    let (_, body) = send(&h.app, "GET", "/sources", None).await;
    assert_eq!(body, "1. pics\n2. art");

    let (s, _) = send(&h.app, "DELETE", "/sources/pics", None).await;
    assert_eq!(s, StatusCode::OK);
    let (s, body) = send(&h.app, "DELETE", "/sources/pics", None).await;
    assert_eq!(s, StatusCode::NOT_FOUND);
    assert_eq!(body, "pics is not in the list.");
}

#[tokio::test]
async fn invalid_source_name_is_bad_request() {
    let h = harness();
    let (s, _) = send(&h.app, "POST", "/sources", Some(json!({ "name": "two words" }))).await;
    assert_eq!(s, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_poll_waits_for_readiness() {
    let h = harness();
    send(&h.app, "POST", "/sources", Some(json!({ "name": "pics" }))).await;

    let (s, _) = send(&h.app, "POST", "/poll/run", None).await;
    assert_eq!(s, StatusCode::SERVICE_UNAVAILABLE);
    assert!(h.channel.sent().is_empty());

    h.gate.open(bot());
    let (s, body) = send(&h.app, "POST", "/poll/run", None).await;
    assert_eq!(s, StatusCode::OK);
    let report: Json = serde_json::from_str(&body).expect("json report");
    assert_eq!(report["sources"][0]["source"], "pics");
    assert_eq!(report["sources"][0]["status"], "processed");
    assert_eq!(
        report["sources"][0]["delivered"],
        json!(["https://img/1.png", "https://img/2.png"])
    );

    // history now holds both keys
    let (_, body) = send(&h.app, "POST", "/poll/run", None).await;
    let report: Json = serde_json::from_str(&body).expect("json report");
    assert_eq!(report["sources"][0]["delivered"], json!([]));
    assert_eq!(report["sources"][0]["skipped_duplicates"], 2);
}

#[tokio::test]
async fn article_request_is_accepted() {
    let h = harness();
    let (s, body) = send(
        &h.app,
        "POST",
        "/article",
        Some(json!({ "url": "https://news.example/a", "mode": "normal-dark" })),
    )
    .await;
    assert_eq!(s, StatusCode::ACCEPTED);
    assert!(body.contains("normal-dark"));
}

#[tokio::test]
async fn article_request_with_unknown_mode_is_rejected() {
    let h = harness();
    let (s, _) = send(
        &h.app,
        "POST",
        "/article",
        Some(json!({ "url": "https://news.example/a", "mode": "poster" })),
    )
    .await;
    assert!(s.is_client_error());
}
