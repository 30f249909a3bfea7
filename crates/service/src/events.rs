//! Filesystem event source.
//!
//! Forwards the paths of files that were just finalized. A rename into place
//! always counts; closing a file after writing counts only when
//! [`WatchOptions::close_write`] is set.

use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::ServiceError;

/// What an event means for the backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsSignal {
    /// A file reached its final name and content.
    Finalized(PathBuf),
    /// A directory appeared.
    NewDirectory(PathBuf),
}

/// How the backup roots are watched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub recursive: bool,
    /// Watch directories created under a non-recursive root.
    pub auto_add: bool,
    /// Treat close-after-write as final, for writers that do not rename.
    pub close_write: bool,
}

/// Maps a raw watcher event to the signals it carries.
pub fn classify(event: &Event, close_write: bool) -> Option<FsSignal> {
    match event.kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) if close_write => {
            event.paths.first().cloned().map(FsSignal::Finalized)
        }
        // `Both` carries `[from, to]`.
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
            event.paths.last().cloned().map(FsSignal::Finalized)
        }
        EventKind::Create(CreateKind::Folder) => {
            event.paths.first().cloned().map(FsSignal::NewDirectory)
        }
        _ => None,
    }
}

/// Watches the backup roots and yields finalized file paths.
pub struct EventSource {
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<FsSignal>,
    options: WatchOptions,
}

impl EventSource {
    /// Registers watches on `roots`.
    ///
    /// A root that cannot be watched is logged and skipped; the
    /// reconciliation walk still covers it.
    pub fn start(roots: &[PathBuf], options: WatchOptions) -> Result<Self, ServiceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let close_write = options.close_write;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Some(signal) = classify(&event, close_write) {
                    let _ = tx.send(signal);
                } else {
                    trace!(kind = ?event.kind, "ignoring event");
                }
            }
            Err(e) => warn!(error = %e, "watch error"),
        })?;

        let mode = watch_mode(options.recursive);
        for root in roots {
            match watcher.watch(root, mode) {
                Ok(()) => info!(
                    root = %root.display(),
                    recursive = options.recursive,
                    close_write,
                    "watching"
                ),
                Err(e) => warn!(root = %root.display(), error = %e, "cannot watch root"),
            }
        }

        Ok(Self {
            watcher,
            rx,
            options,
        })
    }

    /// Waits for the next finalized file. `None` once the watcher is gone.
    pub async fn next_path(&mut self) -> Option<PathBuf> {
        loop {
            match self.rx.recv().await? {
                FsSignal::Finalized(path) => return Some(path),
                FsSignal::NewDirectory(dir) => self.add_directory(&dir),
            }
        }
    }

    fn add_directory(&mut self, dir: &Path) {
        // Recursive watches pick up new directories by themselves.
        if self.options.recursive || !self.options.auto_add {
            return;
        }
        match self.watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => debug!(dir = %dir.display(), "watching new directory"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "cannot watch new directory"),
        }
    }
}

fn watch_mode(recursive: bool) -> RecursiveMode {
    if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}
