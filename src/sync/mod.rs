//! Watcher-side synchronization engine
//!
//! Turns a noisy stream of filesystem events into debounced, deduplicated,
//! checksum-verified and retried uploads.

pub mod checksum;
pub(crate) mod client;
mod engine;
mod inflight;
mod pending;
pub mod retry;
mod stats;
mod watcher;

pub use checksum::{digest_file, digest_file_blocking, Checksum};
pub use client::{
    HttpUploader, TransferClient, TransferOutcome, TransferRequest, UploadOutcome, Uploader,
};
pub use engine::SyncEngine;
pub use inflight::{InFlightGuard, InFlightSet};
pub use pending::{Cancel, InsertOutcome, PendingOperation, PendingStore};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use stats::{SyncStats, SyncStatsSnapshot};
pub use watcher::{classify, DirectoryWatcher};
