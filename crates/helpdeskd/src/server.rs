//! HTTP server for helpdeskd

use crate::flags::FlagSource;
use crate::orchestrator::ChainDeps;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Application state shared across handlers
pub struct AppState {
    pub deps: ChainDeps,
    pub flags: Arc<dyn FlagSource>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(deps: ChainDeps, flags: Arc<dyn FlagSource>) -> Self {
        Self {
            deps,
            flags,
            start_time: Instant::now(),
        }
    }
}

/// Build the full router; separate from `run` so tests can drive it directly
pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(routes::chat_routes())
        .merge(routes::feedback_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Drop expired sessions and trackers every `interval`
pub fn spawn_pruner(deps: ChainDeps, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let sessions = deps.sessions.prune_expired().await;
            let trackers = deps.trackers.prune_expired().await;
            if sessions + trackers > 0 {
                debug!("Pruned {} sessions and {} trackers", sessions, trackers);
            }
        }
    })
}

/// Run the HTTP server until ctrl-c
pub async fn run(state: AppState, bind: &str, max_body_bytes: usize) -> Result<()> {
    let state = Arc::new(state);
    let app = router(state, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!("  Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down gracefully");
            }
        })
        .await?;
    Ok(())
}
