//! Idempotent receive of one uploaded file
//!
//! An upload is spooled to a staging file, verified against the sender's
//! checksum, then moved into the mirror tree in one rename. A rejected or
//! failed upload never leaves anything at the destination, and the staging
//! file is always removed.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempPath};

use crate::error::{MirrorError, Result};
use crate::paths::{resolve_under, to_relative_path};
use crate::sync::checksum::{digest_file_blocking, Checksum};

/// A decoded upload waiting to be placed
#[derive(Debug)]
pub struct StagedUpload {
    /// Deleted when dropped unless persisted into the mirror
    pub staged: TempPath,
    pub relative_path: String,
    /// Sender's digest, if it sent one
    pub checksum: Option<String>,
}

/// Counters for the receiver's status endpoints
#[derive(Debug, Default)]
pub struct ReceiveStats {
    total_received: AtomicU64,
    total_rejected: AtomicU64,
    total_errors: AtomicU64,
    last_received: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveStatsSnapshot {
    pub total_received: u64,
    pub total_rejected: u64,
    pub total_errors: u64,
    pub last_received: Option<DateTime<Utc>>,
}

impl ReceiveStats {
    fn record(&self, result: &Result<String>) {
        match result {
            Ok(_) => {
                self.total_received.fetch_add(1, Ordering::Relaxed);
                *self.last_received.write() = Some(Utc::now());
            }
            Err(e) if e.status_code() == 400 => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.total_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count a request that failed before reaching the handler
    pub fn record_rejected(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReceiveStatsSnapshot {
        ReceiveStatsSnapshot {
            total_received: self.total_received.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            last_received: *self.last_received.read(),
        }
    }
}

pub struct ReceiveHandler {
    root: PathBuf,
    stats: ReceiveStats,
}

impl ReceiveHandler {
    /// Handler writing under `root`, which is created if missing
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| MirrorError::DirectoryCreation {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root: root.canonicalize()?,
            stats: ReceiveStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    /// Verify and place an upload; returns the canonical relative path
    pub async fn receive(&self, upload: StagedUpload) -> Result<String> {
        let root = self.root.clone();
        let result = tokio::task::spawn_blocking(move || place_upload(&root, upload))
            .await
            .map_err(|e| MirrorError::Internal(format!("receive task failed: {}", e)))
            .and_then(|r| r);

        self.stats.record(&result);
        match &result {
            Ok(path) => tracing::info!(relative_path = %path, "File received"),
            Err(e) if e.status_code() == 400 => tracing::warn!(error = %e, "Rejected upload"),
            Err(e) => tracing::error!(error = %e, "Failed to store upload"),
        }
        result
    }
}

fn place_upload(root: &Path, upload: StagedUpload) -> Result<String> {
    let StagedUpload {
        staged,
        relative_path,
        checksum,
    } = upload;

    let destination = resolve_under(root, &relative_path)?;
    let canonical = to_relative_path(root, &destination)
        .ok_or_else(|| MirrorError::InvalidPath(relative_path.clone()))?;

    if let Some(claimed) = checksum.as_deref().filter(|c| !c.trim().is_empty()) {
        let actual = digest_file_blocking(&staged)?;
        if !actual.matches(claimed) {
            // `staged` drops here and removes the spooled bytes
            return Err(MirrorError::ChecksumMismatch {
                expected: claimed.trim().to_string(),
                actual: actual.to_string(),
            });
        }
    }

    let parent = destination
        .parent()
        .ok_or_else(|| MirrorError::InvalidPath(relative_path.clone()))?;
    std::fs::create_dir_all(parent).map_err(|source| MirrorError::DirectoryCreation {
        path: parent.to_path_buf(),
        source,
    })?;

    set_mirror_permissions(&staged)?;
    move_into_place(staged, &destination)?;
    Ok(canonical)
}

/// Rename the staged file over the destination, or copy it beside the
/// destination and rename that when staging is on another filesystem
fn move_into_place(staged: TempPath, destination: &Path) -> Result<()> {
    let staged = match staged.persist(destination) {
        Ok(()) => return Ok(()),
        Err(err) => {
            tracing::debug!(error = %err.error, "Rename failed, copying across filesystems");
            err.path
        }
    };

    let parent = destination
        .parent()
        .ok_or_else(|| MirrorError::InvalidPath(destination.display().to_string()))?;
    let mut sibling = NamedTempFile::new_in(parent)?;
    let mut source = File::open(&staged)?;
    std::io::copy(&mut source, sibling.as_file_mut())?;
    sibling.as_file().sync_all()?;
    set_mirror_permissions(sibling.path())?;
    sibling
        .persist(destination)
        .map_err(|e| MirrorError::Io(e.error))?;

    drop(staged);
    Ok(())
}

#[cfg(unix)]
fn set_mirror_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mirror_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Digest of an upload already placed in the mirror
pub fn mirrored_checksum(root: &Path, relative_path: &str) -> Result<Checksum> {
    digest_file_blocking(&resolve_under(root, relative_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn stage(dir: &Path, data: &[u8]) -> TempPath {
        let mut file = NamedTempFile::new_in(dir).unwrap();
        file.write_all(data).unwrap();
        file.into_temp_path()
    }

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, ReceiveHandler) {
        let mirror = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let handler = ReceiveHandler::new(mirror.path()).unwrap();
        (mirror, staging, handler)
    }

    #[tokio::test]
    async fn test_verified_upload_lands_at_nested_path() {
        let (_mirror, staging, handler) = setup();
        let data = b"hello world!";
        let staged = stage(staging.path(), data);
        let staged_path = staged.to_path_buf();

        let path = handler
            .receive(StagedUpload {
                staged,
                relative_path: "docs/2024/notes.txt".to_string(),
                checksum: Some(Checksum::of_bytes(data).to_string()),
            })
            .await
            .unwrap();

        assert_eq!(path, "docs/2024/notes.txt");
        let written = handler.root().join("docs/2024/notes.txt");
        assert_eq!(std::fs::read(&written).unwrap(), data);
        assert!(!staged_path.exists());
        assert_eq!(
            mirrored_checksum(handler.root(), &path).unwrap(),
            Checksum::of_bytes(data)
        );
        assert_eq!(handler.stats().snapshot().total_received, 1);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_nothing_behind() {
        let (_mirror, staging, handler) = setup();
        let staged = stage(staging.path(), b"tampered");
        let staged_path = staged.to_path_buf();

        let result = handler
            .receive(StagedUpload {
                staged,
                relative_path: "a/b.txt".to_string(),
                checksum: Some(Checksum::of_bytes(b"intended").to_string()),
            })
            .await;

        assert!(matches!(result, Err(MirrorError::ChecksumMismatch { .. })));
        assert!(!staged_path.exists());
        assert!(!handler.root().join("a").exists());
        assert_eq!(handler.stats().snapshot().total_rejected, 1);
    }

    #[tokio::test]
    async fn test_mismatch_keeps_previous_version() {
        let (_mirror, staging, handler) = setup();
        std::fs::write(handler.root().join("keep.txt"), b"v1").unwrap();

        let result = handler
            .receive(StagedUpload {
                staged: stage(staging.path(), b"v2-corrupt"),
                relative_path: "keep.txt".to_string(),
                checksum: Some(Checksum::of_bytes(b"v2").to_string()),
            })
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(handler.root().join("keep.txt")).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (_mirror, staging, handler) = setup();
        std::fs::write(handler.root().join("f.bin"), b"old").unwrap();

        handler
            .receive(StagedUpload {
                staged: stage(staging.path(), b"new"),
                relative_path: "f.bin".to_string(),
                checksum: None,
            })
            .await
            .unwrap();

        assert_eq!(std::fs::read(handler.root().join("f.bin")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_zero_length_and_full_byte_range() {
        let (_mirror, staging, handler) = setup();
        let all_bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        for (name, data) in [("empty", Vec::new()), ("binary", all_bytes)] {
            handler
                .receive(StagedUpload {
                    staged: stage(staging.path(), &data),
                    relative_path: name.to_string(),
                    checksum: Some(Checksum::of_bytes(&data).to_string()),
                })
                .await
                .unwrap();
            assert_eq!(std::fs::read(handler.root().join(name)).unwrap(), data);
        }
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let (mirror, staging, handler) = setup();
        let staged = stage(staging.path(), b"evil");
        let staged_path = staged.to_path_buf();

        let result = handler
            .receive(StagedUpload {
                staged,
                relative_path: "../escape.txt".to_string(),
                checksum: None,
            })
            .await;

        assert!(matches!(result, Err(MirrorError::InvalidPath(_))));
        assert!(!staged_path.exists());
        assert!(!mirror.path().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn test_cross_filesystem_fallback_copies() {
        let mirror = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let staged = stage(staging.path(), b"copied");
        let staged_path = staged.to_path_buf();
        let destination = mirror.path().join("out.txt");

        // A directory at the destination makes the rename fail
        std::fs::create_dir(&destination).unwrap();
        assert!(move_into_place(staged, &destination).is_err());
        assert!(!staged_path.exists());
        std::fs::remove_dir(&destination).unwrap();

        let staged = stage(staging.path(), b"copied");
        move_into_place(staged, &destination).unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"copied");
    }
}
