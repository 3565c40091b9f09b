// tests/article_source.rs
//
// Article site adapter driven through the poller seam, against a local stub site.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    response::Html,
    routing::{get, post},
    Router,
};
use gourgandin::source::article::{ArticleCredentials, ArticleSettings, ArticleSource};
use gourgandin::source::{CandidateKind, Payload, SourceAdapter, SourceFetchError};

const PAGE: &str = include_str!("fixtures/article.html");

async fn stub_site(logins: Arc<AtomicU32>) -> String {
    let app = Router::new()
        .route("/planet/rivers", get(|| async { Html(PAGE) }))
        .route(
            "/login",
            post(move || {
                let logins = logins.clone();
                async move {
                    logins.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}")
}

fn credentials() -> Option<ArticleCredentials> {
    Some(ArticleCredentials {
        email: "reader@example.org".into(),
        password: "hunter2".into(),
    })
}

#[tokio::test]
async fn url_source_yields_exactly_one_document() {
    let logins = Arc::new(AtomicU32::new(0));
    let base = stub_site(logins.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let settings = ArticleSettings {
        login_url: format!("{base}/login"),
        output_dir: dir.path().to_path_buf(),
        default_mode: Some("mobile-dark".into()),
        ..ArticleSettings::default()
    };
    let source = ArticleSource::new(settings, credentials());
    let url = format!("{base}/planet/rivers");

    let batch = source.fetch_candidates(&url, 10).await.unwrap();

    assert_eq!(batch.len(), 1);
    let item = batch.into_iter().next().unwrap().unwrap();
    assert_eq!(item.kind, CandidateKind::ArticleDocument);
    assert_eq!(item.dedupe_key, url);
    assert!(item.title.starts_with("Rivers are running dry"));
    match &item.payload {
        Payload::Document { path, .. } => {
            assert!(path.starts_with(dir.path()));
            assert!(path.to_string_lossy().ends_with("-mobile-dark.html"));
            assert!(path.exists());
        }
        other => panic!("expected a document payload, got {other:?}"),
    }
    assert_eq!(logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn url_source_without_credentials_is_a_configuration_error() {
    let source = ArticleSource::new(ArticleSettings::default(), None);

    let err = source
        .fetch_candidates("https://news.example/planet/rivers", 10)
        .await
        .unwrap_err();

    assert!(matches!(err, SourceFetchError::Config(_)));
}
