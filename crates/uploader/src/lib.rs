//! Upload pipeline for a single data file.
//!
//! A [`TaskProcessor`] takes an [`UploadTask`] and drives it through the
//! [`Uploader`] inside [`execute_with_retry`], one fresh store connection per
//! attempt:
//!
//! 1. stat the local file (a vanished file is not an error)
//! 2. integrity check against the remote object
//! 3. capture ownership metadata
//! 4. write the directory index
//! 5. single-request or multipart transfer

pub mod error;
pub mod index;
pub mod integrity;
pub mod key;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod stat;
pub mod types;

pub use error::UploadError;
pub use key::{DEFAULT_SEPARATOR, KeyScheme};
pub use pipeline::Uploader;
pub use processor::{TaskProcessor, TaskReport};
pub use retry::{Backoff, RetryOutcome, RetryPolicy, execute_with_retry};
pub use types::{Strategy, UploadOutcome, UploadTask, Verdict};
