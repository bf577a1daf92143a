//! Studio Proxy
//!
//! Single-binary HTTP gateway in front of the generative-audio studio:
//! 1. Loads config and the credential store
//! 2. Starts a session on the explicit cookie, the stored active credential,
//!    or the first candidate that works
//! 3. Serves generation, lyrics, feed and quota endpoints, failing over to
//!    another credential when credits run low
//! 4. Optionally keeps the active token warm in the background

mod config;
mod error;
mod metrics;
mod routes;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use credential_store::{Credential, FileCredentialStore};
use credit_pool::{FailoverController, Studio, spawn_keepalive_task};
use studio_client::Connector;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::routes::AppState;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the axum router with all routes and shared state.
///
/// Generation calls may block for the whole poll window, so the concurrency
/// limit is the only backpressure.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/generate", post(routes::generate))
        .route("/api/custom_generate", post(routes::custom_generate))
        .route("/api/extend_audio", post(routes::extend_audio))
        .route("/api/concat", post(routes::concat))
        .route("/api/generate_lyrics", post(routes::generate_lyrics))
        .route("/api/get", get(routes::get_feed))
        .route("/api/get_limit", get(routes::get_limit))
        .route("/api/clip", get(routes::get_clip))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting studio-proxy");

    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        api_url = %config.upstream.api_url,
        store = %config.credentials.store_path.display(),
        explicit_cookie = config.credentials.cookie.is_some(),
        feed_threshold = config.failover.feed,
        generation_threshold = config.failover.generation,
        "configuration loaded"
    );

    let store = FileCredentialStore::load(config.credentials.store_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credential store from {}",
                config.credentials.store_path.display()
            )
        })?;

    let explicit = config.credentials.cookie.as_ref().map(|cookie| {
        info!(
            account = %config.credentials.label,
            cookie = %cookie.masked(),
            "using explicit studio cookie"
        );
        Credential::new(config.credentials.label.clone(), cookie.expose().clone())
    });

    let connector = Connector::new(reqwest::Client::new(), config.session_config());
    let controller = FailoverController::bootstrap(
        connector,
        Arc::new(store),
        config.failover,
        explicit,
    )
    .await
    .context("no credential could start a studio session")?;
    let controller = Arc::new(controller);

    let keepalive = config
        .keepalive_interval()
        .map(|interval| {
            info!(interval_secs = interval.as_secs(), "background keep-alive enabled");
            spawn_keepalive_task(controller.clone(), interval)
        });

    let studio = Arc::new(Studio::new(
        controller,
        config.poll_config(),
        config.lyrics_poll_config(),
    ));
    let app_state = AppState::new(studio, config.proxy.always_ok, prometheus_handle);
    let requests_total = app_state.requests_total.clone();
    let app = build_router(app_state, config.proxy.max_connections);

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    if let Some(handle) = keepalive {
        handle.abort();
    }

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            requests_served = requests_total.load(Ordering::Relaxed),
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
