//! HTTP server exposing the conversation over JSON.
//!
//! ```text
//! +------------------------------------------------+
//! |  Axum HTTP Server                              |
//! |  /health (GET)                                 |
//! |  /sessions (POST, GET)                         |
//! |  /sessions/{id} (GET, DELETE)                  |
//! |  /sessions/{id}/image (POST)    -> upload      |
//! |  /sessions/{id}/confirm (POST)  -> generate    |
//! |  /sessions/{id}/update (POST)                  |
//! |  /sessions/{id}/validate (POST)                |
//! |  /sessions/{id}/resolve (POST)                 |
//! |  /sessions/{id}/clear (POST)                   |
//! |  /sessions/{id}/templates (GET)                |
//! +------------------------------------------------+
//!          |
//!          v
//! +------------------------------------------------+
//! |  SessionManager (DashMap) -> Orchestrator      |
//! +------------------------------------------------+
//! ```
//!
//! Start the server with:
//! ```bash
//! archform-cli --server --port 8080
//! ```
//!
//! This module is only available when the `server` feature is enabled.

mod handlers;
mod session;
pub mod types;

pub use handlers::{turn_status, AppState};
pub use session::{ServerSession, SessionManager, DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL_SECS};
pub use types::{
    ConfirmRequest, CreateSessionResponse, ErrorResponse, HealthResponse, ListSessionsResponse,
    ResolveRequest, SessionDetail, SessionInfo, TemplatesResponse, UpdateRequest,
    UploadImageRequest,
};

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Orchestrator;

/// Interval between idle-session sweeps.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Start the HTTP server.
///
/// Returns the bound address (useful with port 0) and a token that shuts the
/// server down when cancelled. Every cleanup sweep also purges expired
/// template records from the store.
pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
    max_sessions: usize,
    session_idle_secs: u64,
) -> anyhow::Result<(SocketAddr, CancellationToken)> {
    let (state, shutdown_token) = AppState::new(orchestrator, max_sessions);

    let app = create_router(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("HTTP server listening on {}", actual_addr);

    let cleanup_state = state.clone();
    let cleanup_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let cleaned = cleanup_state.session_manager.cleanup_idle(session_idle_secs).await;
                    if cleaned > 0 {
                        tracing::info!("Cleaned up {} idle sessions", cleaned);
                    }
                    match cleanup_state.orchestrator.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => tracing::info!("Purged {} expired template records", purged),
                        Err(e) => tracing::warn!("Failed to purge expired records: {}", e),
                    }
                }
                _ = cleanup_shutdown.cancelled() => {
                    tracing::debug!("Session cleanup task shutting down");
                    break;
                }
            }
        }
    });

    let server_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_token))
}

/// Create the router with all routes configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/sessions",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .route(
            "/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{session_id}/image", post(handlers::upload_image))
        .route(
            "/sessions/{session_id}/confirm",
            post(handlers::confirm_explanation),
        )
        .route("/sessions/{session_id}/update", post(handlers::update_template))
        .route(
            "/sessions/{session_id}/validate",
            post(handlers::validate_template),
        )
        .route("/sessions/{session_id}/resolve", post(handlers::resolve_error))
        .route("/sessions/{session_id}/clear", post(handlers::clear_session))
        .route(
            "/sessions/{session_id}/templates",
            get(handlers::list_templates),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;

    #[tokio::test]
    async fn start_server_binds_to_port() {
        let h = harness();
        let (addr, shutdown) = start_server(h.orchestrator.clone(), 0, 10, 60)
            .await
            .expect("Server should start");

        assert!(addr.port() > 0);
        assert!(!shutdown.is_cancelled());

        shutdown.cancel();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn health_over_tcp() {
        let h = harness();
        let (addr, shutdown) = start_server(h.orchestrator.clone(), 0, 10, 60)
            .await
            .expect("Server should start");

        let body: HealthResponse = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.status, "ok");

        shutdown.cancel();
    }
}
