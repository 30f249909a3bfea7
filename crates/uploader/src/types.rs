use std::path::PathBuf;

/// A file waiting to be backed up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub local_path: PathBuf,
    pub remote_key: String,
}

/// Integrity check result for a local file against its remote key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No remote object yet; the file must be uploaded.
    Upload,
    /// Same size and digest already stored.
    AlreadyStored,
    /// Remote size differs. Skipped, never overwritten.
    SizeMismatch { local: u64, remote: u64 },
    /// Same size but different content. Skipped, never overwritten.
    DigestMismatch { local: String, remote: String },
}

impl Verdict {
    pub fn needs_upload(&self) -> bool {
        matches!(self, Verdict::Upload)
    }
}

/// How the file was transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Single,
    Multipart { parts: u64 },
}

/// Result of running the pipeline on one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The local file disappeared before it could be read.
    Vanished,
    /// The integrity check decided not to upload.
    Skipped(Verdict),
    Uploaded { strategy: Strategy, bytes: u64 },
}
