//! gourgandin — binary entrypoint.
//! Loads configuration, wires the poller, schedules it and serves the admin API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gourgandin::command::ArticleCommand;
use gourgandin::config::BotConfig;
use gourgandin::discord::{DeliveryChannel, DiscordError, DiscordRest};
use gourgandin::history::{ChannelHistory, DeliveryHistoryOracle};
use gourgandin::metrics::Metrics;
use gourgandin::registry::SourceRegistry;
use gourgandin::retry::execute_with_retry;
use gourgandin::scheduler::{spawn_daily, spawn_interval, ReadyGate};
use gourgandin::source::article::ArticleSource;
use gourgandin::source::daily::DailyImageSource;
use gourgandin::source::reddit::{RedditClassifier, RedditSource};
use gourgandin::{create_router, AppState, Poster};

/// Compact logs by default, JSON with `LOG_FORMAT=json`. `RUST_LOG` overrides the filter.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gourgandin=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when the variables come from the environment.
    let _ = dotenvy::dotenv();
    init_tracing();

    let BotConfig { secrets, settings } = BotConfig::load().context("loading configuration")?;
    let metrics = Metrics::init(settings.poller.interval_secs)?;

    let rest = DiscordRest::new(secrets.discord_token.clone(), secrets.channel_id.clone());
    let channel: Arc<dyn DeliveryChannel> = Arc::new(rest.clone());
    let oracle: Arc<dyn DeliveryHistoryOracle> =
        Arc::new(ChannelHistory::new(settings.retry.history));

    let reddit = RedditSource::new(
        secrets.reddit.clone(),
        RedditClassifier::new(settings.reddit.video_domains.clone()),
    )
    .with_timeout(settings.reddit.timeout_secs);
    let poster = Arc::new(Poster::new(
        channel.clone(),
        oracle.clone(),
        Arc::new(reddit),
        settings.poller.poster.clone(),
    ));
    let registry = Arc::new(SourceRegistry::new(settings.poller.registry_path.clone()));
    let article = Arc::new(ArticleCommand::new(
        Arc::new(ArticleSource::new(settings.article.clone(), secrets.article.clone())),
        settings.retry.article,
    ));
    let gate = ReadyGate::new();

    // --- Scheduled jobs, idle until the gate opens ---
    {
        let poster = poster.clone();
        let registry = registry.clone();
        spawn_interval(
            gate.clone(),
            "reddit",
            Duration::from_secs(settings.poller.interval_secs),
            move |bot| {
                let poster = poster.clone();
                let registry = registry.clone();
                async move {
                    match registry.list().await {
                        Ok(sources) => {
                            poster.run_cycle(&bot, &sources).await;
                        }
                        Err(e) => tracing::error!(error = %e, "source registry unreadable, cycle skipped"),
                    }
                }
            },
        );
    }

    if settings.daily.enabled {
        let at = settings.daily_time()?;
        let daily = Arc::new(Poster::new(
            channel.clone(),
            oracle.clone(),
            Arc::new(DailyImageSource::new(settings.daily.clone())),
            settings.poller.poster.clone().without_max_age(),
        ));
        let sources = vec![settings.daily.url.clone()];
        spawn_daily(gate.clone(), "daily", at, settings.daily.skip_weekends, move |bot| {
            let daily = daily.clone();
            let sources = sources.clone();
            async move {
                daily.run_cycle(&bot, &sources).await;
            }
        });
    }

    // --- Admin API ---
    let state = AppState {
        registry,
        poster,
        article,
        channel,
        gate: gate.clone(),
    };
    let app = create_router(state).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(secrets.admin_addr)
        .await
        .with_context(|| format!("binding admin api on {}", secrets.admin_addr))?;
    tracing::info!(addr = %secrets.admin_addr, "admin api listening");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // --- Host readiness: the token check doubles as identity lookup ---
    let me = execute_with_retry(&settings.retry.history, DiscordError::is_server_error, || {
        rest.current_user()
    })
    .await
    .context("validating the Discord token")?;
    tracing::info!(id = %me.id, name = %me.name, "connected to Discord");
    gate.open(me);

    tokio::select! {
        res = server => {
            res.context("admin api task")?.context("admin api server")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}
