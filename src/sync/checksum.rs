//! SHA-256 content fingerprints
//!
//! The sender digests a file before upload and the receiver digests the
//! bytes that landed on disk; equal digests mean the transfer is intact.
//! Hashing runs on the blocking pool so large files never stall the runtime.

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MirrorError, Result};

/// Read buffer size for streaming digests
const CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 digest (64 lowercase characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compare against a digest supplied by a peer; case-insensitive
    pub fn matches(&self, claimed: &str) -> bool {
        self.0.eq_ignore_ascii_case(claimed.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest of an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest a file in constant memory on the current thread
pub fn digest_file_blocking(path: &Path) -> Result<Checksum> {
    let mut file = File::open(path).map_err(|e| read_error(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(path, e)),
        }
    }

    Ok(Checksum(hex::encode(hasher.finalize())))
}

/// Digest a file on the blocking pool
pub async fn digest_file(path: impl Into<PathBuf>) -> Result<Checksum> {
    let path = path.into();
    tokio::task::spawn_blocking(move || digest_file_blocking(&path))
        .await
        .map_err(|e| MirrorError::Internal(format!("checksum task failed: {}", e)))?
}

fn read_error(path: &Path, err: std::io::Error) -> MirrorError {
    if err.kind() == ErrorKind::NotFound {
        MirrorError::MissingSource(path.to_path_buf())
    } else {
        MirrorError::Io(err)
    }
}
