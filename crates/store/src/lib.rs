//! Object store contract used by the upload pipeline.
//!
//! The pipeline only ever talks to [`ObjectStore`]. Connections are produced
//! by a [`StoreConnector`] so that every retry attempt can start from a fresh
//! one.
//!
//! Two backends are provided:
//! - [`S3Connector`]: any S3-compatible service, requests presigned with
//!   `rusty-s3` and sent through `reqwest`.
//! - [`MemoryStore`]: an in-process store that records every call and can
//!   inject failures.

pub mod error;
pub mod memory;
pub mod s3;
pub mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::StoreError;
pub use memory::{MemoryStore, Operation, StoreCall};
pub use s3::{S3Config, S3Connector};
pub use types::{
    CompletedPart, FileStat, MultipartSession, ObjectBody, ObjectMetadata, PutReceipt,
    RemoteObject,
};

/// Boxed future returned by [`ObjectStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A connection to a remote blob store.
///
/// Implementations are not assumed to survive an error: callers drop the
/// connection after a failure and ask the [`StoreConnector`] for a new one.
pub trait ObjectStore: Send + Sync {
    /// Fetches size, ETag and metadata of `key`. `None` if it does not exist.
    fn head_object<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<RemoteObject>>;

    /// Stores `body` under `key` in a single request.
    fn put_object<'a>(
        &'a self,
        key: &'a str,
        body: ObjectBody,
        metadata: &'a ObjectMetadata,
    ) -> StoreFuture<'a, PutReceipt>;

    /// Starts a multipart upload for `key`.
    fn initiate_multipart<'a>(
        &'a self,
        key: &'a str,
        metadata: &'a ObjectMetadata,
    ) -> StoreFuture<'a, MultipartSession>;

    /// Uploads one numbered part (1-based).
    fn upload_part<'a>(
        &'a self,
        session: &'a MultipartSession,
        part_number: u16,
        data: Vec<u8>,
    ) -> StoreFuture<'a, CompletedPart>;

    /// Assembles the uploaded parts into the final object.
    fn complete_multipart<'a>(
        &'a self,
        session: &'a MultipartSession,
        parts: &'a [CompletedPart],
    ) -> StoreFuture<'a, PutReceipt>;

    /// Aborts a multipart upload and releases its parts.
    fn cancel_multipart<'a>(&'a self, session: &'a MultipartSession) -> StoreFuture<'a, ()>;
}

/// Produces fresh store connections.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn ObjectStore>, StoreError>;
}
