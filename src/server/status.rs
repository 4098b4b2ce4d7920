//! Read-only status endpoints of the watcher process

use std::future::Future;
use std::net::SocketAddr;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::sync::SyncEngine;

pub struct StatusServer {
    engine: SyncEngine,
    addr: SocketAddr,
}

impl StatusServer {
    pub fn new(engine: SyncEngine, port: u16) -> Self {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        Self { engine, addr }
    }

    /// Build the router
    pub fn router(engine: SyncEngine) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(engine)
    }

    /// Serve until `shutdown` resolves
    pub async fn start(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let app = Self::router(self.engine);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("Status server listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

/// Health check endpoint
async fn health_handler(State(engine): State<SyncEngine>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime": engine.uptime().as_secs_f64(),
        "syncStats": engine.stats().snapshot(),
        "pendingOperations": engine.pending_count(),
        "inFlightSyncs": engine.in_flight_count(),
    }))
}

async fn status_handler(State(engine): State<SyncEngine>) -> impl IntoResponse {
    let config = engine.config();
    Json(serde_json::json!({
        "sourceDir": engine.source_root(),
        "remoteUrl": config.remote_url,
        "debounceDelayMs": config.debounce_delay_ms,
        "maxPendingOperations": config.max_pending_operations,
        "syncStats": engine.stats().snapshot(),
        "pendingOperations": engine.pending_count(),
        "inFlightSyncs": engine.in_flight_count(),
    }))
}
