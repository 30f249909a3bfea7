//! Admission of discovered paths into the upload queue.

use std::path::Path;

use regex::Regex;
use tablevault_uploader::{KeyScheme, UploadTask};
use tracing::{debug, trace, warn};

use crate::ServiceError;
use crate::queue::TaskQueue;

/// File-name marker of files still being written.
pub const DEFAULT_TRANSIENT_MARKER: &str = "-tmp";

/// Which paths are worth backing up.
#[derive(Debug, Clone)]
pub struct FilterRules {
    transient_marker: String,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            transient_marker: DEFAULT_TRANSIENT_MARKER.into(),
            include: None,
            exclude: None,
        }
    }
}

impl FilterRules {
    /// Builds rules from the configured patterns.
    pub fn new(
        transient_marker: &str,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            transient_marker: transient_marker.to_string(),
            include: include.map(Regex::new).transpose()?,
            exclude: exclude.map(Regex::new).transpose()?,
        })
    }

    fn is_transient(&self, path: &Path) -> bool {
        !self.transient_marker.is_empty()
            && path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().contains(&self.transient_marker))
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        if let Some(exclude) = &self.exclude
            && exclude.is_match(&text)
        {
            return true;
        }
        self.include.as_ref().is_some_and(|inc| !inc.is_match(&text))
    }
}

/// What the filter did with a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Still being written.
    Transient,
    Directory,
    /// Rejected by the include/exclude patterns.
    Excluded,
    /// The queue no longer accepts work.
    QueueClosed,
    Enqueued(UploadTask),
}

/// Turns discovered paths into queued [`UploadTask`]s.
///
/// Does not deduplicate: a path may be queued any number of times and the
/// integrity check keeps repeated uploads from happening.
pub struct IngestFilter {
    rules: FilterRules,
    keys: KeyScheme,
    queue: TaskQueue,
}

impl IngestFilter {
    pub fn new(rules: FilterRules, keys: KeyScheme, queue: TaskQueue) -> Self {
        Self { rules, keys, queue }
    }

    pub fn submit(&self, path: &Path) -> Admission {
        if path.to_str().is_none() {
            warn!(path = %path.display(), "skipping path that is not valid UTF-8");
            return Admission::Excluded;
        }
        if self.rules.is_transient(path) {
            trace!(path = %path.display(), "ignoring transient file");
            return Admission::Transient;
        }
        if path.is_dir() {
            return Admission::Directory;
        }
        if self.rules.is_excluded(path) {
            trace!(path = %path.display(), "excluded by pattern");
            return Admission::Excluded;
        }

        let remote_key = match self.keys.key_for(path) {
            Ok(key) => key,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot derive remote key");
                return Admission::Excluded;
            }
        };
        let task = UploadTask {
            local_path: path.to_path_buf(),
            remote_key,
        };

        match self.queue.push(task.clone()) {
            Ok(()) => {
                debug!(path = %path.display(), "queued");
                Admission::Enqueued(task)
            }
            Err(_) => Admission::QueueClosed,
        }
    }
}
