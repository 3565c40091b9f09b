// src/api.rs
//! Administrative HTTP surface: source list, manual cycle, article command.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::command::{ArticleCommand, ArticleRequest};
use crate::discord::DeliveryChannel;
use crate::poster::Poster;
use crate::registry::{format_listing, RegistryError, SourceRegistry};
use crate::scheduler::ReadyGate;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SourceRegistry>,
    pub poster: Arc<Poster>,
    pub article: Arc<ArticleCommand>,
    pub channel: Arc<dyn DeliveryChannel>,
    pub gate: ReadyGate,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sources", get(list_sources).post(add_source))
        .route("/sources/{name}", delete(remove_source))
        .route("/poll/run", post(run_poll))
        .route("/article", post(request_article))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::AlreadyPresent(_) => StatusCode::CONFLICT,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidName(_) => StatusCode::BAD_REQUEST,
            RegistryError::Io { .. } => {
                tracing::error!(error = %self, "registry io failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

async fn list_sources(State(state): State<AppState>) -> Result<String, RegistryError> {
    let entries = state.registry.list().await?;
    Ok(format_listing(&entries))
}

#[derive(serde::Deserialize)]
struct AddSource {
    name: String,
}

async fn add_source(
    State(state): State<AppState>,
    Json(body): Json<AddSource>,
) -> Result<String, RegistryError> {
    state.registry.add(&body.name).await?;
    Ok(format!("{} added to the list.", body.name.trim()))
}

async fn remove_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, RegistryError> {
    state.registry.remove(&name).await?;
    Ok(format!("{} removed from the list.", name.trim()))
}

async fn run_poll(State(state): State<AppState>) -> Response {
    let Some(bot) = state.gate.identity() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "bot not ready yet").into_response();
    };
    let sources = match state.registry.list().await {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };
    tracing::info!(sources = sources.len(), "manual poll requested");
    let report = state.poster.run_cycle(&bot, &sources).await;
    Json(report).into_response()
}

async fn request_article(
    State(state): State<AppState>,
    Json(req): Json<ArticleRequest>,
) -> (StatusCode, String) {
    let cmd = state.article.clone();
    let channel = state.channel.clone();
    let msg = format!("fetching {} ({})", req.url, req.mode);
    tokio::spawn(async move {
        cmd.run(&req, channel).await;
    });
    (StatusCode::ACCEPTED, msg)
}
