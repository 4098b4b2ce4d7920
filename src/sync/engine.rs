//! Watcher-side sync engine
//!
//! Owns the pending-operation store, the in-flight set and the stats.
//! Raw change events are debounced per path (trailing edge); when a timer
//! fires the engine claims the in-flight guard and hands the file to the
//! transfer client.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use tokio::task::AbortHandle;

use super::client::{HttpUploader, TransferClient, TransferOutcome, Uploader};
use super::inflight::InFlightSet;
use super::pending::PendingStore;
use super::retry::RetryPolicy;
use super::stats::SyncStats;
use crate::config::WatcherConfig;
use crate::error::{MirrorError, Result};
use crate::paths::to_relative_path;
use crate::types::{ChangeKind, EngineStatus};

struct EngineInner {
    config: WatcherConfig,
    source_root: PathBuf,
    ignore: Vec<Regex>,
    pending: Mutex<PendingStore<AbortHandle>>,
    in_flight: InFlightSet,
    client: TransferClient,
    stats: Arc<SyncStats>,
    started_at: Instant,
    sweeper: Mutex<Option<AbortHandle>>,
    accepting: AtomicBool,
}

/// Shared handle to the engine; clones refer to the same state
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Build an engine that uploads over HTTP to `config.remote_url`
    pub fn with_http(config: WatcherConfig) -> Result<Self> {
        let uploader = HttpUploader::from_config(&config)?;
        Self::new(config, Arc::new(uploader))
    }

    /// Build an engine around an arbitrary uploader
    ///
    /// Creates the source root if it does not exist.
    pub fn new(config: WatcherConfig, uploader: Arc<dyn Uploader>) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.source_dir).map_err(|source| {
            MirrorError::DirectoryCreation {
                path: config.source_dir.clone(),
                source,
            }
        })?;
        let source_root = config.source_dir.canonicalize()?;

        let stats = Arc::new(SyncStats::new());
        let client = TransferClient::new(
            uploader,
            RetryPolicy::new(config.max_retries, config.retry_base_delay()),
            Arc::clone(&stats),
            config.max_concurrent_transfers,
        );

        let inner = EngineInner {
            ignore: config.ignore_regexes()?,
            pending: Mutex::new(PendingStore::new(
                config.max_pending_operations,
                config.operation_expiry(),
            )),
            in_flight: InFlightSet::new(),
            client,
            stats,
            started_at: Instant::now(),
            sweeper: Mutex::new(None),
            accepting: AtomicBool::new(true),
            source_root,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Start the periodic staleness sweep and mark the engine running
    pub fn start(&self) {
        let engine = self.clone();
        let period = self.inner.config.sweep_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = engine.inner.pending.lock().sweep_expired();
                if swept > 0 {
                    tracing::warn!(swept, "Swept stale pending operations");
                }
            }
        })
        .abort_handle();

        if let Some(old) = self.inner.sweeper.lock().replace(handle) {
            old.abort();
        }
        self.inner.accepting.store(true, Ordering::SeqCst);
        self.inner.stats.set_status(EngineStatus::Running);
        tracing::info!(
            source = %self.inner.source_root.display(),
            remote = %self.inner.config.remote_url,
            "Sync engine started"
        );
    }

    /// Feed one raw change notification into the engine
    pub fn on_event(&self, kind: ChangeKind, path: PathBuf) {
        self.handle_event(kind, path);
    }

    /// Returns whether a transfer was scheduled
    fn handle_event(&self, kind: ChangeKind, path: PathBuf) -> bool {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return false;
        }

        let Some(relative) = to_relative_path(&self.inner.source_root, &path) else {
            if path.starts_with(&self.inner.source_root) && path != self.inner.source_root {
                tracing::warn!(path = %path.display(), "Path is not valid UTF-8, skipping");
            } else {
                tracing::debug!(path = %path.display(), "Event outside source root, ignoring");
            }
            return false;
        };

        if self.is_ignored(&relative) {
            tracing::trace!(relative_path = %relative, "Ignored path");
            return false;
        }

        if kind.is_removal() {
            tracing::info!(relative_path = %relative, kind = %kind, "Removal not propagated");
            return false;
        }

        if !kind.is_transferable() {
            tracing::debug!(relative_path = %relative, kind = %kind, "Directory event, nothing to send");
            return false;
        }

        self.schedule(kind, path);
        true
    }

    /// Schedule every regular file under the source root as an `Add`
    pub fn sync_existing(&self) -> Result<usize> {
        let mut scheduled = 0;
        for entry in walkdir::WalkDir::new(&self.inner.source_root)
            .follow_links(false)
            .into_iter()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable entry during initial scan");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.handle_event(ChangeKind::Add, entry.into_path()) {
                scheduled += 1;
            }
        }
        tracing::info!(scheduled, "Initial scan complete");
        Ok(scheduled)
    }

    /// Stop accepting events, cancel every pending timer and the sweep
    ///
    /// Transfers already in flight keep running; see [`SyncEngine::drain`].
    pub fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        let cancelled = self.inner.pending.lock().clear();
        self.inner.stats.set_status(EngineStatus::Stopped);
        tracing::info!(
            cancelled,
            in_flight = self.in_flight_count(),
            "Sync engine stopped"
        );
    }

    /// Wait until no transfer is in flight, up to `timeout`
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.inner.in_flight.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.inner.config
    }

    /// Canonical source root that events are resolved against
    pub fn source_root(&self) -> &Path {
        &self.inner.source_root
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.inner.stats
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    fn is_ignored(&self, relative: &str) -> bool {
        self.inner.ignore.iter().any(|re| re.is_match(relative))
    }

    fn schedule(&self, kind: ChangeKind, path: PathBuf) {
        let delay = self.inner.config.debounce_delay();
        let mut pending = self.inner.pending.lock();
        let seq = pending.next_seq();

        let engine = self.clone();
        let timer_path = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.fire(timer_path, seq).await;
        })
        .abort_handle();

        let outcome = pending.insert(path.clone(), seq, kind, handle);
        if outcome.swept > 0 {
            tracing::warn!(swept = outcome.swept, "Swept stale pending operations at capacity");
        }
        tracing::debug!(
            path = %path.display(),
            kind = %kind,
            replaced = outcome.replaced,
            pending = pending.len(),
            "Debounce scheduled"
        );
    }

    async fn fire(&self, path: PathBuf, seq: u64) {
        let Some(kind) = self.inner.pending.lock().take_if_current(&path, seq) else {
            return;
        };
        if !kind.is_transferable() {
            return;
        }

        let Some(_guard) = self.inner.in_flight.try_acquire(&path) else {
            tracing::info!(path = %path.display(), "Transfer already in flight, skipping");
            return;
        };

        let Some(relative) = to_relative_path(&self.inner.source_root, &path) else {
            return;
        };

        match self.inner.client.sync(&path, &relative).await {
            Ok(TransferOutcome::Synced(_)) | Ok(TransferOutcome::SourceMissing) => {}
            Err(e) => {
                tracing::error!(relative_path = %relative, error = %e, "Sync failed");
            }
        }
    }
}
