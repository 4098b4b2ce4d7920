//! Error types for mirrorsync

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for mirrorsync operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Main error type for mirrorsync
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload rejected with status {status}: {body}")]
    UploadRejected { status: u16, body: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Source file missing: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Multipart error: {0}")]
    Multipart(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Whether the error is a transient transfer failure.
    ///
    /// Informational only: the backoff retrier retries every error alike.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MirrorError::Http(_) | MirrorError::UploadRejected { .. }
        )
    }

    /// HTTP status the receiver answers with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            MirrorError::ChecksumMismatch { .. }
            | MirrorError::InvalidPath(_)
            | MirrorError::Multipart(_) => 400,
            _ => 500,
        }
    }

    /// Message exposed to the remote sender
    pub fn public_message(&self) -> String {
        match self {
            MirrorError::ChecksumMismatch { .. } => "Checksum verification failed".to_string(),
            other => other.to_string(),
        }
    }
}
