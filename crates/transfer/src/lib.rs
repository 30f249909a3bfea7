//! Chunked file reading, content digests and upload planning.
//!
//! Everything in this crate is store-agnostic: it knows how an S3-style
//! store computes ETags and sizes its parts, but never talks to one.

mod chunked;
mod digest;
mod memory;
mod plan;

pub use chunked::{Chunk, ChunkReader};
pub use digest::{
    CompositeDigest, file_md5, is_multipart_etag, md5_hex, multipart_etag, normalize_etag,
};
pub use memory::{FixedMemory, MemoryProbe, SystemMemory};
pub use plan::{ChunkPlanner, UploadPlan};

const MIB: u64 = 1024 * 1024;

/// Default multipart chunk size: 256 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * MIB;

/// Default size above which uploads switch to multipart: 4 GiB.
///
/// Kept strictly below [`MAX_SINGLE_OBJECT_SIZE`].
pub const DEFAULT_MAX_SINGLE_SIZE: u64 = 4096 * MIB;

/// Hard limit of a single-request upload on S3-compatible stores (5 GiB).
pub const MAX_SINGLE_OBJECT_SIZE: u64 = 5120 * MIB;

/// Smallest part size the store accepts for every part but the last.
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Maximum number of parts in one multipart upload.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("part limit exceeded: part {part} of at most {MAX_PART_COUNT}")]
    PartLimit { part: u64 },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),
}
