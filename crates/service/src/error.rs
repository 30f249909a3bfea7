//! Service error types.

use tablevault_uploader::UploadError;

/// Errors that stop the backup service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("event dispatcher stopped unexpectedly")]
    DispatcherStopped,

    #[error("worker stopped on unrecoverable error: {0}")]
    WorkerFatal(UploadError),
}
