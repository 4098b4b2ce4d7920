//! Receiver HTTP server: `POST /files`, `/health`, `/status`

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tower_http::trace::TraceLayer;

use crate::config::ReceiverConfig;
use crate::error::{MirrorError, Result};
use crate::receiver::{ReceiveHandler, StagedUpload};
use crate::types::UploadResponse;

/// Shared state of the receiver routes
#[derive(Clone)]
pub struct ReceiverState {
    handler: Arc<ReceiveHandler>,
    staging_dir: PathBuf,
    started_at: Instant,
}

impl ReceiverState {
    pub fn new(handler: ReceiveHandler, staging_dir: impl Into<PathBuf>) -> Result<Self> {
        let staging_dir = staging_dir.into();
        std::fs::create_dir_all(&staging_dir).map_err(|source| {
            MirrorError::DirectoryCreation {
                path: staging_dir.clone(),
                source,
            }
        })?;
        Ok(Self {
            handler: Arc::new(handler),
            staging_dir,
            started_at: Instant::now(),
        })
    }

    pub fn from_config(config: &ReceiverConfig) -> Result<Self> {
        Self::new(
            ReceiveHandler::new(&config.destination_dir)?,
            config.staging_dir(),
        )
    }

    pub fn handler(&self) -> &ReceiveHandler {
        &self.handler
    }
}

pub struct ReceiverServer {
    state: ReceiverState,
    addr: SocketAddr,
    body_limit: usize,
}

impl ReceiverServer {
    pub fn new(state: ReceiverState, port: u16, body_limit: usize) -> Self {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        Self {
            state,
            addr,
            body_limit,
        }
    }

    /// Build the router
    pub fn router(state: ReceiverState, body_limit: usize) -> Router {
        Router::new()
            .route("/files", post(upload_handler))
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until `shutdown` resolves
    pub async fn start(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let app = Self::router(self.state, self.body_limit);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("Receiver listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn upload_handler(
    State(state): State<ReceiverState>,
    multipart: Multipart,
) -> std::result::Result<Json<UploadResponse>, MirrorError> {
    let upload = match decode_upload(&state, multipart).await {
        Ok(upload) => upload,
        Err(e) => {
            state.handler.stats().record_rejected();
            tracing::warn!(error = %e, "Malformed upload");
            return Err(e);
        }
    };

    let path = state.handler.receive(upload).await?;
    Ok(Json(UploadResponse::ok(path)))
}

/// Spool the `file` part to the staging directory and collect the text fields
async fn decode_upload(state: &ReceiverState, mut multipart: Multipart) -> Result<StagedUpload> {
    let mut staged = None;
    let mut relative_path = None;
    let mut checksum = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| MirrorError::Multipart(e.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let (file, path) = NamedTempFile::new_in(&state.staging_dir)?.into_parts();
                let mut file = tokio::fs::File::from_std(file);
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| MirrorError::Multipart(e.to_string()))?
                {
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                file.sync_all().await?;
                staged = Some(path);
            }
            Some("relativePath") => {
                relative_path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| MirrorError::Multipart(e.to_string()))?,
                );
            }
            Some("checksum") => {
                checksum = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| MirrorError::Multipart(e.to_string()))?,
                );
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    let staged = staged.ok_or_else(|| MirrorError::Multipart("missing file field".to_string()))?;
    let relative_path = relative_path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| MirrorError::Multipart("missing relativePath field".to_string()))?;

    Ok(StagedUpload {
        staged,
        relative_path,
        checksum,
    })
}

async fn health_handler(State(state): State<ReceiverState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "receiveStats": state.handler.stats().snapshot(),
    }))
}

async fn status_handler(State(state): State<ReceiverState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "destinationDir": state.handler.root(),
        "stagingDir": state.staging_dir,
        "receiveStats": state.handler.stats().snapshot(),
    }))
}
