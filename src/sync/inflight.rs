//! Per-path guard against overlapping transfer attempts

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;

/// Set of paths with a transfer attempt in progress
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    paths: Arc<DashSet<PathBuf>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as in flight; `None` if another attempt holds it
    ///
    /// The returned guard releases the path when dropped, on every exit path.
    pub fn try_acquire(&self, path: &Path) -> Option<InFlightGuard> {
        if self.paths.insert(path.to_path_buf()) {
            Some(InFlightGuard {
                paths: Arc::clone(&self.paths),
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Held for the whole duration of one transfer attempt
#[derive(Debug)]
pub struct InFlightGuard {
    paths: Arc<DashSet<PathBuf>>,
    path: PathBuf,
}

impl InFlightGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.paths.remove(&self.path);
    }
}
