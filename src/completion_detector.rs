use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::dir_watcher::WatchEvent;
use crate::utilities::format_duration;

/// Source of modification timestamps.
pub trait FileProbe {
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// Reads modification times straight from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl FileProbe for FsProbe {
    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

/// The recording currently being watched for write completion.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub last_modified: Option<SystemTime>,
    pub last_check: Instant,
    /// A modify notification arrived since the previous tick.
    pub touched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    InProgress,
    Complete(PathBuf),
    Vanished(PathBuf),
}

/// Declares a single tracked file finished once its modification time stays
/// unchanged across two consecutive ticks.
pub struct CompletionDetector<P: FileProbe = FsProbe> {
    probe: P,
    tracked: Option<TrackedFile>,
}

impl CompletionDetector<FsProbe> {
    pub fn new() -> Self {
        Self::with_probe(FsProbe)
    }
}

impl Default for CompletionDetector<FsProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: FileProbe> CompletionDetector<P> {
    pub fn with_probe(probe: P) -> Self {
        Self {
            probe,
            tracked: None,
        }
    }

    /// Starts tracking `path`. A file that is already tracked is replaced and
    /// its completion check starts over.
    pub fn on_file_created(&mut self, path: PathBuf) {
        info!("Recording started: {}", path.display());
        if let Some(current) = &self.tracked {
            warn!(
                "Already tracking {}, switching to {}",
                current.path.display(),
                path.display()
            );
        }

        let last_modified = self.probe.modified(&path).ok();
        self.tracked = Some(TrackedFile {
            path,
            last_modified,
            last_check: Instant::now(),
            touched: false,
        });
    }

    pub fn on_file_modified(&mut self, path: &Path) {
        if let Some(tracked) = self.tracked.as_mut() {
            if tracked.path == path {
                tracked.touched = true;
            }
        }
    }

    pub fn check_tick(&mut self) -> TickOutcome {
        let Some(tracked) = self.tracked.as_mut() else {
            return TickOutcome::Idle;
        };

        let since_last_check = tracked.last_check.elapsed();
        let modified = match self.probe.modified(&tracked.path) {
            Ok(modified) => modified,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let path = tracked.path.clone();
                self.tracked = None;
                return TickOutcome::Vanished(path);
            }
            Err(e) => {
                warn!(
                    "Could not read {} ({}), will check again next interval",
                    tracked.path.display(),
                    e
                );
                return TickOutcome::InProgress;
            }
        };

        if tracked.touched || tracked.last_modified != Some(modified) {
            tracked.last_modified = Some(modified);
            tracked.last_check = Instant::now();
            tracked.touched = false;
            info!("File still being written: {}", tracked.path.display());
            debug!(
                "Last modified {} ago",
                format_duration(modified.elapsed().unwrap_or_default())
            );
            return TickOutcome::InProgress;
        }

        let path = tracked.path.clone();
        self.tracked = None;
        info!(
            "File finished, no modifications for {}: {}",
            format_duration(since_last_check),
            path.display()
        );
        TickOutcome::Complete(path)
    }

    /// Drives the detector: watcher events start/refresh tracking, every
    /// `interval` a tick runs, and finished files are sent on `ready`.
    /// Returns when the event channel closes or the ready receiver is dropped.
    pub async fn run(
        mut self,
        interval: Duration,
        mut events: mpsc::Receiver<WatchEvent>,
        ready: mpsc::Sender<PathBuf>,
    ) {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(WatchEvent::Created(path)) => {
                        self.on_file_created(path);
                        // Creation is the first observation; the next check is a full interval away.
                        ticker.reset();
                        info!(
                            "Tracking file, will check in {} whether the recording is finished",
                            format_duration(interval)
                        );
                    }
                    Some(WatchEvent::Modified(path)) => self.on_file_modified(&path),
                    None => break,
                },
                _ = ticker.tick() => match self.check_tick() {
                    TickOutcome::Complete(path) => {
                        info!("Recording finished: {}", path.display());
                        if ready.send(path).await.is_err() {
                            break;
                        }
                    }
                    TickOutcome::Vanished(path) => {
                        warn!("Tracked file disappeared, nothing to upload: {}", path.display());
                    }
                    TickOutcome::Idle | TickOutcome::InProgress => {}
                },
            }
        }
        debug!("Completion detector stopped");
    }
}
