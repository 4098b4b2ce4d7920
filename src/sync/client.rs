//! Transfer client: pushes one file to the receiver
//!
//! A transfer re-checks the source, digests it, then drives the upload
//! through the backoff retrier under the global concurrency limit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tokio::sync::Semaphore;

use super::checksum::{digest_file, Checksum};
use super::retry::{retry_with_backoff, RetryPolicy};
use super::stats::SyncStats;
use crate::config::WatcherConfig;
use crate::error::{MirrorError, Result};
use crate::types::UploadResponse;

/// One upload, rebuilt from disk for every attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Absolute source path
    pub source: PathBuf,
    /// `/`-separated path relative to the source root
    pub relative_path: String,
    pub checksum: Checksum,
}

/// Result of a single upload attempt that reached a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The receiver acknowledged the file
    Accepted(UploadResponse),
    /// The source disappeared before it could be opened
    SourceGone,
}

/// Sends a single upload attempt to the receiver
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, request: &TransferRequest) -> Result<UploadOutcome>;
}

/// Multipart `POST /files` over reqwest
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpUploader {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mirrorsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn from_config(config: &WatcherConfig) -> Result<Self> {
        Self::new(config.upload_url(), config.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, request: &TransferRequest) -> Result<UploadOutcome> {
        let file = match tokio::fs::File::open(&request.source).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(UploadOutcome::SourceGone),
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();

        let file_name = request
            .relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&request.relative_path)
            .to_string();

        let part = Part::stream_with_length(reqwest::Body::from(file), size)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;

        let form = Form::new()
            .text("relativePath", request.relative_path.clone())
            .text("checksum", request.checksum.to_string())
            .part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(status = status.as_u16(), error = %e, "Failed to read error body");
                    String::new()
                }
            };
            return Err(MirrorError::UploadRejected {
                status: status.as_u16(),
                body,
            });
        }

        let ack: UploadResponse = response.json().await?;
        if !ack.success {
            return Err(MirrorError::UploadRejected {
                status: status.as_u16(),
                body: ack.error.unwrap_or_default(),
            });
        }

        Ok(UploadOutcome::Accepted(ack))
    }
}

/// What happened to a requested transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Synced(Checksum),
    /// Deleted or replaced by a directory before it could be sent; not an error
    SourceMissing,
}

pub struct TransferClient {
    uploader: Arc<dyn Uploader>,
    policy: RetryPolicy,
    stats: Arc<SyncStats>,
    limiter: Arc<Semaphore>,
}

impl TransferClient {
    pub fn new(
        uploader: Arc<dyn Uploader>,
        policy: RetryPolicy,
        stats: Arc<SyncStats>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            uploader,
            policy,
            stats,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    /// Push `path` to the receiver as `relative_path`
    ///
    /// Callers hold the in-flight guard for `path`. Failures after all
    /// retries are counted in the stats and returned.
    pub async fn sync(&self, path: &Path, relative_path: &str) -> Result<TransferOutcome> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                tracing::info!(path = %path.display(), "Not a regular file, skipping");
                return Ok(TransferOutcome::SourceMissing);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Source vanished before transfer, skipping");
                return Ok(TransferOutcome::SourceMissing);
            }
            Err(e) => {
                self.stats.record_error();
                return Err(e.into());
            }
        }

        let checksum = match digest_file(path).await {
            Ok(checksum) => checksum,
            Err(MirrorError::MissingSource(_)) => {
                tracing::info!(path = %path.display(), "Source vanished while hashing, skipping");
                return Ok(TransferOutcome::SourceMissing);
            }
            Err(e) => {
                self.stats.record_error();
                return Err(e);
            }
        };

        let request = TransferRequest {
            source: path.to_path_buf(),
            relative_path: relative_path.to_string(),
            checksum,
        };

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| MirrorError::Internal("transfer limiter closed".to_string()))?;

        let result = retry_with_backoff(self.policy, |attempt| {
            let request = &request;
            async move {
                tracing::debug!(
                    relative_path = %request.relative_path,
                    attempt,
                    "Uploading"
                );
                self.uploader.upload(request).await
            }
        })
        .await;

        match result {
            Ok(UploadOutcome::Accepted(_)) => {
                self.stats.record_success();
                tracing::info!(
                    relative_path = %request.relative_path,
                    checksum = %request.checksum,
                    "File synced"
                );
                Ok(TransferOutcome::Synced(request.checksum))
            }
            Ok(UploadOutcome::SourceGone) => {
                tracing::info!(path = %path.display(), "Source vanished during upload, skipping");
                Ok(TransferOutcome::SourceMissing)
            }
            Err(e) => {
                self.stats.record_error();
                tracing::error!(
                    relative_path = %request.relative_path,
                    attempts = self.policy.total_attempts(),
                    error = %e,
                    "Transfer failed after retries"
                );
                Err(e)
            }
        }
    }
}
