//! Process-lifetime transfer counters

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::EngineStatus;

/// Counters written by the engine and read by the status surface
#[derive(Debug, Default)]
pub struct SyncStats {
    total_synced: AtomicU64,
    total_errors: AtomicU64,
    last_sync: RwLock<Option<DateTime<Utc>>>,
    status: RwLock<EngineStatus>,
}

/// Point-in-time copy of [`SyncStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatsSnapshot {
    pub total_synced: u64,
    pub total_errors: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub status: EngineStatus,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.total_synced.fetch_add(1, Ordering::Relaxed);
        *self.last_sync.write() = Some(Utc::now());
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_status(&self, status: EngineStatus) {
        *self.status.write() = status;
    }

    pub fn total_synced(&self) -> u64 {
        self.total_synced.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            total_synced: self.total_synced(),
            total_errors: self.total_errors(),
            last_sync: *self.last_sync.read(),
            status: *self.status.read(),
        }
    }
}
