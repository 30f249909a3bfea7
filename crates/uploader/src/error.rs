//! Upload error types.

use tablevault_store::StoreError;
use tablevault_transfer::TransferError;

/// Errors produced while uploading one file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{key}: store acknowledged ETag {remote}, local digest is {local}")]
    UploadDigestMismatch {
        key: String,
        local: String,
        remote: String,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl UploadError {
    /// Whether another attempt on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Invariant(_) => false,
            UploadError::Transfer(TransferError::PartLimit { .. }) => false,
            UploadError::Transfer(TransferError::InvalidChunkSize(_)) => false,
            _ => true,
        }
    }
}

impl From<tokio::task::JoinError> for UploadError {
    fn from(e: tokio::task::JoinError) -> Self {
        UploadError::Invariant(format!("blocking task failed: {e}"))
    }
}
