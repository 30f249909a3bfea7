//! Periodic re-discovery of files the event stream missed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ServiceError;
use crate::filter::{Admission, IngestFilter};

/// Counters of one reconciliation walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub files_seen: usize,
    pub enqueued: usize,
    pub filtered: usize,
}

/// Lists every regular file under `roots`.
///
/// Without `recursive` only the files directly inside each root are listed.
/// Unreadable directories are logged and skipped.
pub fn walk_roots(roots: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        if let Err(e) = walk_dir(root, recursive, &mut files) {
            warn!(root = %root.display(), error = %e, "cannot read watch root");
        }
    }
    files
}

fn walk_dir(current: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(dir = %current.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if recursive && let Err(e) = walk_dir(&path, recursive, files) {
                warn!(dir = %path.display(), error = %e, "skipping unreadable directory");
            }
        } else if file_type.is_file() {
            files.push(path);
        }
    }

    Ok(())
}

/// Re-submits every file under the watched roots.
#[derive(Clone)]
pub struct Reconciler {
    roots: Vec<PathBuf>,
    recursive: bool,
    filter: Arc<IngestFilter>,
}

impl Reconciler {
    pub fn new(roots: Vec<PathBuf>, recursive: bool, filter: Arc<IngestFilter>) -> Self {
        Self {
            roots,
            recursive,
            filter,
        }
    }

    /// Walks all roots once and submits what it finds.
    pub async fn run_once(&self) -> Result<WalkSummary, ServiceError> {
        let roots = self.roots.clone();
        let recursive = self.recursive;
        let files = tokio::task::spawn_blocking(move || walk_roots(&roots, recursive)).await?;

        let mut summary = WalkSummary {
            files_seen: files.len(),
            ..WalkSummary::default()
        };
        for path in &files {
            match self.filter.submit(path) {
                Admission::Enqueued(_) => summary.enqueued += 1,
                Admission::QueueClosed => break,
                _ => summary.filtered += 1,
            }
        }

        info!(
            files = summary.files_seen,
            enqueued = summary.enqueued,
            filtered = summary.filtered,
            "reconciliation walk finished"
        );
        Ok(summary)
    }
}
