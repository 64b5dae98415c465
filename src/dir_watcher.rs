use anyhow::{ensure, Result};
use log::{debug, warn};
use notify::event::CreateKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Filesystem activity relevant to the completion detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
}

/// Watches a single directory (not its subdirectories) for new and modified files.
///
/// Keep the `DirWatcher` alive for as long as events should keep flowing;
/// dropping it closes the channel.
pub struct DirWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl DirWatcher {
    pub fn watch(dir: &Path) -> Result<(Self, mpsc::Receiver<WatchEvent>)> {
        ensure!(dir.is_dir(), "Watch directory '{}' does not exist", dir.display());

        let (tx, rx) = mpsc::channel(128);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for watch_event in translate(event) {
                        // Receiver gone means we are shutting down.
                        let _ = tx.blocking_send(watch_event);
                    }
                }
                Err(e) => warn!("Filesystem watcher error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok((
            Self {
                _watcher: watcher,
                root: dir.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn translate(event: Event) -> Vec<WatchEvent> {
    debug!("Filesystem event: {:?}", event);
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .filter(|p| !p.is_dir())
            .map(WatchEvent::Created)
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .into_iter()
            .filter(|p| !p.is_dir())
            .map(WatchEvent::Modified)
            .collect(),
        _ => Vec::new(),
    }
}
