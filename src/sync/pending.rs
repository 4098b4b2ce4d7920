//! Bounded store of scheduled-but-unfired debounce operations
//!
//! At most one entry per path. Replacing an entry cancels its timer but
//! keeps the entry's place and creation time, so capacity eviction removes
//! the entry created first, not the one touched least recently.
//! `len() <= capacity` holds after every insert.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::types::ChangeKind;

/// Something that can stop a scheduled action
pub trait Cancel {
    fn cancel(&self);
}

impl Cancel for AbortHandle {
    fn cancel(&self) {
        self.abort();
    }
}

/// A debounce timer waiting to fire for one path
#[derive(Debug)]
pub struct PendingOperation<H> {
    /// Identifies this generation of the entry; a fired timer only claims
    /// the entry if the sequence still matches
    pub seq: u64,
    /// Kind of the most recent event for the path
    pub kind: ChangeKind,
    /// Time of the first event since the path last fired
    pub created_at: Instant,
    /// Eviction position, fixed when the entry is created
    order: u64,
    handle: H,
}

/// Result of inserting into a full store
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// An existing timer for the same path was cancelled
    pub replaced: bool,
    /// Entries removed by the staleness sweep to make room
    pub swept: usize,
    /// Path evicted (oldest insertion) to respect the capacity
    pub evicted: bool,
}

pub struct PendingStore<H: Cancel> {
    entries: HashMap<PathBuf, PendingOperation<H>>,
    /// creation order -> path, oldest first
    order: BTreeMap<u64, PathBuf>,
    next_seq: u64,
    capacity: usize,
    expiry: Duration,
}

impl<H: Cancel> PendingStore<H> {
    pub fn new(capacity: usize, expiry: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 1,
            capacity: capacity.max(1),
            expiry,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Reserve the sequence number for the next insert
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Insert or replace the operation for `path`
    ///
    /// `seq` must come from [`PendingStore::next_seq`].
    pub fn insert(&mut self, path: PathBuf, seq: u64, kind: ChangeKind, handle: H) -> InsertOutcome {
        let mut outcome = InsertOutcome::default();

        if let Some(op) = self.entries.get_mut(&path) {
            let old = std::mem::replace(&mut op.handle, handle);
            old.cancel();
            op.seq = seq;
            op.kind = kind;
            outcome.replaced = true;
            return outcome;
        }

        if self.entries.len() >= self.capacity {
            outcome.swept = self.sweep_expired();
        }

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.values().next().cloned() {
                if let Some(op) = self.remove_entry(&oldest) {
                    op.handle.cancel();
                    outcome.evicted = true;
                    tracing::warn!(
                        path = %oldest.display(),
                        capacity = self.capacity,
                        "Pending operations at capacity, evicted oldest entry"
                    );
                }
            }
        }

        self.order.insert(seq, path.clone());
        self.entries.insert(
            path,
            PendingOperation {
                seq,
                kind,
                created_at: Instant::now(),
                order: seq,
                handle,
            },
        );

        outcome
    }

    /// Claim the entry for a fired timer
    ///
    /// Returns the entry's change kind if `seq` is still the live generation
    /// for `path`; a replaced or evicted timer gets `None`.
    pub fn take_if_current(&mut self, path: &Path, seq: u64) -> Option<ChangeKind> {
        match self.entries.get(path) {
            Some(op) if op.seq == seq => self.remove_entry(path).map(|op| op.kind),
            _ => None,
        }
    }

    /// Drop entries older than the expiry, cancelling their timers
    pub fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let stale: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, op)| now.duration_since(op.created_at) >= self.expiry)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &stale {
            if let Some(op) = self.remove_entry(path) {
                op.handle.cancel();
            }
        }
        stale.len()
    }

    /// Cancel every pending timer
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, op) in self.entries.drain() {
            op.handle.cancel();
        }
        self.order.clear();
        count
    }

    fn remove_entry(&mut self, path: &Path) -> Option<PendingOperation<H>> {
        let op = self.entries.remove(path)?;
        self.order.remove(&op.order);
        Some(op)
    }
}
