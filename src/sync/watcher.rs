//! Recursive filesystem watch feeding the sync engine
//!
//! notify delivers events on its own thread; they cross into the runtime
//! over a bounded channel and are classified into [`ChangeKind`]s.

use std::path::PathBuf;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::engine::SyncEngine;
use crate::error::Result;
use crate::types::ChangeKind;

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Running watch over the engine's source root
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

impl DirectoryWatcher {
    /// Watch `engine.source_root()` recursively and forward events to `engine`
    pub fn start(engine: SyncEngine) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(EVENT_CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |res| {
            // Runs on notify's thread, outside the runtime
            let _ = tx.blocking_send(res);
        })?;
        watcher.watch(engine.source_root(), RecursiveMode::Recursive)?;
        tracing::info!(root = %engine.source_root().display(), "Watching for changes");

        let forwarder = tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) => {
                        for (kind, path) in classify(&event) {
                            tracing::trace!(kind = %kind, path = %path.display(), "Filesystem event");
                            engine.on_event(kind, path);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Watcher error"),
                }
            }
        });

        Ok(Self { watcher, forwarder })
    }

    /// Stop watching; events already queued are discarded
    pub fn stop(self) {
        drop(self.watcher);
        self.forwarder.abort();
    }
}

/// Map a raw notify event to zero or more change notifications
pub fn classify(event: &Event) -> Vec<(ChangeKind, PathBuf)> {
    let added = |path: &PathBuf| {
        if path.is_dir() {
            (ChangeKind::AddDir, path.clone())
        } else {
            (ChangeKind::Add, path.clone())
        }
    };

    match &event.kind {
        EventKind::Create(CreateKind::Folder) => event
            .paths
            .iter()
            .map(|p| (ChangeKind::AddDir, p.clone()))
            .collect(),
        EventKind::Create(CreateKind::File) => event
            .paths
            .iter()
            .map(|p| (ChangeKind::Add, p.clone()))
            .collect(),
        EventKind::Create(_) => event.paths.iter().map(added).collect(),

        EventKind::Remove(RemoveKind::Folder) => event
            .paths
            .iter()
            .map(|p| (ChangeKind::UnlinkDir, p.clone()))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| (ChangeKind::Unlink, p.clone()))
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|p| (ChangeKind::Unlink, p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(added).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![(ChangeKind::Unlink, from.clone()), added(to)],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    added(p)
                } else {
                    (ChangeKind::Unlink, p.clone())
                }
            })
            .collect(),

        // Permission and timestamp changes carry no content
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| (ChangeKind::Change, p.clone()))
            .collect(),

        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};
    use std::time::Duration;

    fn event(kind: EventKind, paths: &[&std::path::Path]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(p.to_path_buf());
        }
        event
    }

    #[test]
    fn test_create_and_modify() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::File), &[&file])),
            vec![(ChangeKind::Add, file.clone())]
        );
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::Any), &[dir.path()])),
            vec![(ChangeKind::AddDir, dir.path().to_path_buf())]
        );
        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &[&file]
            )),
            vec![(ChangeKind::Change, file.clone())]
        );
    }

    #[test]
    fn test_removals() {
        let path = PathBuf::from("/src/old.txt");
        assert_eq!(
            classify(&event(EventKind::Remove(RemoveKind::File), &[&path])),
            vec![(ChangeKind::Unlink, path.clone())]
        );
        assert_eq!(
            classify(&event(EventKind::Remove(RemoveKind::Folder), &[&path])),
            vec![(ChangeKind::UnlinkDir, path)]
        );
    }

    #[test]
    fn test_rename_both_is_unlink_then_add() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("draft.txt");
        let to = dir.path().join("final.txt");
        std::fs::write(&to, b"done").unwrap();

        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &[&from, &to]
            )),
            vec![(ChangeKind::Unlink, from), (ChangeKind::Add, to)]
        );
    }

    #[test]
    fn test_noise_is_dropped() {
        let path = PathBuf::from("/src/a.txt");
        assert!(classify(&event(
            EventKind::Access(AccessKind::Read),
            &[&path]
        ))
        .is_empty());
        assert!(classify(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &[&path]
        ))
        .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watcher_forwards_new_files() {
        use crate::config::WatcherConfig;
        use crate::sync::client::tests::ScriptedUploader;

        let dir = tempfile::tempdir().unwrap();
        let config = WatcherConfig {
            debounce_delay_ms: 50,
            ..WatcherConfig::new(dir.path(), "http://127.0.0.1:1")
        };
        let uploader = ScriptedUploader::failing(0);
        let engine = SyncEngine::new(config, uploader.clone()).unwrap();
        engine.start();
        let watcher = DirectoryWatcher::start(engine.clone()).unwrap();

        std::fs::write(engine.source_root().join("fresh.txt"), b"hi").unwrap();

        let mut synced = false;
        for _ in 0..100 {
            if engine.stats().total_synced() >= 1 {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        watcher.stop();
        engine.shutdown();

        assert!(synced, "watcher did not deliver the new file");
        assert_eq!(uploader.seen.lock()[0].relative_path, "fresh.txt");
    }
}
