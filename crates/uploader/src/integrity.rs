//! Decides whether a local file still needs uploading.

use std::path::Path;

use tablevault_store::ObjectStore;
use tablevault_transfer::{file_md5, is_multipart_etag, multipart_etag};
use tracing::{debug, warn};

use crate::UploadError;
use crate::types::Verdict;

/// Compares the local file at `path` (of `local_size` bytes) with the object
/// stored under `key`.
///
/// Mismatches are reported, never repaired: the caller skips the upload.
pub async fn check(
    store: &dyn ObjectStore,
    key: &str,
    path: &Path,
    local_size: u64,
) -> Result<Verdict, UploadError> {
    let Some(remote) = store.head_object(key).await? else {
        return Ok(Verdict::Upload);
    };

    if remote.size != local_size {
        warn!(
            key = %key,
            local = local_size,
            remote = remote.size,
            "remote object size differs from local file, not uploading"
        );
        return Ok(Verdict::SizeMismatch {
            local: local_size,
            remote: remote.size,
        });
    }

    let path = path.to_path_buf();
    let local = if is_multipart_etag(&remote.etag) {
        let Some(part_size) = remote.stat.as_ref().and_then(|s| s.part_size) else {
            debug!(key = %key, etag = %remote.etag, "multipart object without part size, trusting size match");
            return Ok(Verdict::AlreadyStored);
        };
        tokio::task::spawn_blocking(move || multipart_etag(&path, part_size)).await??
    } else {
        tokio::task::spawn_blocking(move || file_md5(&path)).await??
    };

    if local != remote.etag {
        warn!(
            key = %key,
            local = %local,
            remote = %remote.etag,
            "remote object digest differs from local file, not uploading"
        );
        return Ok(Verdict::DigestMismatch {
            local,
            remote: remote.etag,
        });
    }

    debug!(key = %key, "already stored");
    Ok(Verdict::AlreadyStored)
}
