//! Store error types.

/// Errors produced by object store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{operation} {key}: unexpected status {status}")]
    Status {
        operation: &'static str,
        key: String,
        status: u16,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("no such multipart upload: {0}")]
    NoSuchUpload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("injected {0:?} failure")]
    Injected(crate::memory::Operation),
}
