//! Route assembly and server lifecycle.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::auth;
use super::tasks;
use super::types::HealthResponse;
use crate::accounts::{AccountStore, SharedAccountStore};
use crate::config::Config;
use crate::panel::hub::{PanelHub, SharedPanelHub};
use crate::sessions::{self, SessionRegistry, SharedSessionRegistry};
use crate::store::{SqliteTaskStore, TaskStore};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub accounts: SharedAccountStore,
    pub sessions: SharedSessionRegistry,
    pub store: Arc<dyn TaskStore>,
    pub hub: SharedPanelHub,
}

/// Build the shared state: open the stores and wire the hub.
pub async fn build_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let store = SqliteTaskStore::open(&config.db_path())
        .with_context(|| format!("opening task store at {}", config.db_path().display()))?;
    let accounts: SharedAccountStore = Arc::new(AccountStore::new(config.accounts_path()).await?);
    let sessions: SharedSessionRegistry = Arc::new(SessionRegistry::new());
    let hub: SharedPanelHub = Arc::new(PanelHub::new(Arc::new(store.clone()), sessions.clone()));
    sessions::spawn_reaper(sessions.clone());

    if config.dev_mode {
        // The fixed dev identity runs under the nil session id, with no
        // expiry to outlive.
        sessions.open(Uuid::nil(), None).await;
        tracing::warn!("Dev mode enabled: authentication is bypassed");
    }

    Ok(Arc::new(AppState {
        config,
        accounts,
        sessions,
        store: Arc::new(store),
        hub,
    }))
}

/// Build the full router for the given state.
pub fn app(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        // Task panel endpoints
        .route("/api/tasks", get(tasks::get_panel))
        .route("/api/tasks/stream", get(tasks::stream_panel))
        .route("/api/tasks/submit", post(tasks::submit))
        .route("/api/tasks/cancel", post(tasks::cancel_edit))
        .route("/api/tasks/:id/edit", post(tasks::begin_edit))
        .route("/api/tasks/:id", delete(tasks::remove))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let router = app(Arc::clone(&state));

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    Ok(())
}

/// Wait for a shutdown signal, then sign out every session so the panel
/// actors wind down and release their subscriptions.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, closing sessions...");
    state.sessions.close_all().await;
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dev_mode: state.config.dev_mode,
    })
}
