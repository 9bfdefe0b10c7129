//! Spotify Connect Gateway
//!
//! Single-binary Rust service that:
//! 1. Registers and logs in users, tracking them with a session cookie
//! 2. Gates protected pages on a live session
//! 3. Runs the OAuth2 Authorization-Code grant to connect a Spotify account
//! 4. Keeps each user's access token fresh on every protected request

mod accounts;
mod catalog;
mod config;
mod coordinator;
mod error;
mod flow;
mod gate;
mod lifecycle;
mod metrics;
mod pages;
mod password;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use common::Secret;
use credential_store::{CredentialStore, FileCredentialStore};
use metrics_exporter_prometheus::PrometheusHandle;
use session::{SessionRegistry, spawn_sweep_task};
use spotify_auth::StateSigner;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::coordinator::OAuth2Coordinator;
use crate::lifecycle::TokenLifecycleManager;

/// Graceful shutdown must finish within this window after the signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionRegistry>,
    store: Arc<dyn CredentialStore>,
    tokens: TokenLifecycleManager,
    oauth: OAuth2Coordinator,
    catalog: CatalogClient,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Protected routes sit behind the session gate as a route layer, so unknown
/// paths still 404 instead of redirecting to the login page.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let protected = Router::new()
        .route(pages::HOME_PATH, get(pages::hello))
        .route(pages::CONNECT_PATH, get(coordinator::connect))
        .route("/callback", get(coordinator::callback))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            gate::require_session,
        ));

    Router::new()
        .route(
            "/register",
            get(pages::register_form).post(accounts::register),
        )
        .route("/login", get(pages::login_form).post(accounts::login))
        .route("/logout", post(accounts::logout))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .layer(middleware::from_fn(metrics::track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; real deployments set the environment directly
    let _ = dotenvy::dotenv();

    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting spotify-connect-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
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
        listen_addr = %config.server.listen_addr,
        token_url = %config.oauth.token_url,
        storage = %config.storage.path.display(),
        session_ttl_secs = config.session.ttl_secs,
        "configuration loaded"
    );

    let store = Arc::new(
        FileCredentialStore::load(config.storage.path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to load credential store from {}",
                    config.storage.path.display()
                )
            })?,
    );

    let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(
        config.session.ttl_secs,
    )));
    let _sweeper = spawn_sweep_task(
        sessions.clone(),
        Duration::from_secs(config.session.sweep_interval_secs),
    );

    // One client for every outbound call; the timeout bounds each provider call
    let client = reqwest::Client::builder()
        .timeout(config.outbound_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let oauth = Arc::new(config.oauth_config()?);

    let signer = match &config.oauth.state_signing_key {
        Some(key) => StateSigner::new(Secret::new(key.expose_str().as_bytes().to_vec())),
        None => {
            warn!("STATE_SIGNING_KEY not set, using a random per-process key");
            StateSigner::random()
        }
    };

    let store_handle: Arc<dyn CredentialStore> = store;
    let app_state = AppState {
        sessions,
        store: store_handle.clone(),
        tokens: TokenLifecycleManager::new(
            store_handle.clone(),
            client.clone(),
            oauth.clone(),
            Duration::from_secs(config.oauth.refresh_margin_secs),
        ),
        oauth: OAuth2Coordinator::new(
            client.clone(),
            oauth,
            store_handle,
            signer,
            Duration::from_secs(config.oauth.state_max_age_secs),
        ),
        catalog: CatalogClient::new(
            client,
            config.catalog.api_base_url.clone(),
            config.catalog.oembed_url.clone(),
        ),
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
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

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness plus a couple of numbers for operators.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_sessions": state.sessions.len().await,
    });
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
