//! Per-file upload pipeline.

use std::path::{Path, PathBuf};

use tablevault_store::{CompletedPart, MultipartSession, ObjectBody, ObjectMetadata, ObjectStore};
use tablevault_transfer::{ChunkPlanner, ChunkReader, CompositeDigest, UploadPlan, file_md5};
use tracing::{debug, warn};

use crate::UploadError;
use crate::index::{snapshot, write_index};
use crate::integrity;
use crate::stat::capture_stat;
use crate::types::{Strategy, UploadOutcome, UploadTask};

/// Runs one [`UploadTask`] against one store connection.
///
/// A failure leaves nothing half-done on the store: a multipart upload is
/// either completed or cancelled before this returns.
#[derive(Clone, Default)]
pub struct Uploader {
    planner: ChunkPlanner,
}

impl Uploader {
    pub fn new(planner: ChunkPlanner) -> Self {
        Self { planner }
    }

    pub async fn upload(
        &self,
        store: &dyn ObjectStore,
        task: &UploadTask,
    ) -> Result<UploadOutcome, UploadError> {
        let path = task.local_path.as_path();
        let key = task.remote_key.as_str();

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "file vanished before upload");
                return Ok(UploadOutcome::Vanished);
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            debug!(path = %path.display(), "no longer a regular file");
            return Ok(UploadOutcome::Vanished);
        }
        let size = metadata.len();

        let verdict = integrity::check(store, key, path, size).await?;
        if !verdict.needs_upload() {
            return Ok(UploadOutcome::Skipped(verdict));
        }

        let stat = capture_stat(&metadata);
        let listing = snapshot(path).await?;

        let strategy = match self.planner.plan(size) {
            UploadPlan::Single => {
                let object_meta = ObjectMetadata::for_file(stat);
                self.upload_single(store, key, path, size, &object_meta)
                    .await?;
                Strategy::Single
            }
            UploadPlan::Multipart {
                part_size,
                part_count,
            } => {
                let mut stat = stat;
                stat.part_size = Some(part_size);
                let object_meta = ObjectMetadata::for_file(stat);
                let parts = self
                    .upload_multipart(store, key, path, size, part_size, part_count, &object_meta)
                    .await?;
                Strategy::Multipart { parts }
            }
        };

        // The index is informational. Losing it never fails the upload.
        if let Err(e) = write_index(store, key, &listing).await {
            warn!(key = %key, error = %e, "failed to write directory index");
        }

        Ok(UploadOutcome::Uploaded {
            strategy,
            bytes: size,
        })
    }

    async fn upload_single(
        &self,
        store: &dyn ObjectStore,
        key: &str,
        path: &Path,
        size: u64,
        metadata: &ObjectMetadata,
    ) -> Result<(), UploadError> {
        let digest_path = path.to_path_buf();
        let local = tokio::task::spawn_blocking(move || file_md5(&digest_path)).await??;

        debug!(key = %key, bytes = size, "uploading in one request");
        let body = ObjectBody::File {
            path: path.to_path_buf(),
            len: size,
        };
        let receipt = store.put_object(key, body, metadata).await?;

        if receipt.etag != local {
            return Err(UploadError::UploadDigestMismatch {
                key: key.to_string(),
                local,
                remote: receipt.etag,
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_multipart(
        &self,
        store: &dyn ObjectStore,
        key: &str,
        path: &Path,
        size: u64,
        part_size: u64,
        part_count: u64,
        metadata: &ObjectMetadata,
    ) -> Result<u64, UploadError> {
        debug!(key = %key, bytes = size, part_size, part_count, "starting multipart upload");
        let session = store.initiate_multipart(key, metadata).await?;

        let (parts, local) =
            match send_parts(store, &session, path, size, part_size, part_count).await {
                Ok(sent) => sent,
                Err(e) => {
                    abort(store, &session).await;
                    return Err(e);
                }
            };

        let receipt = match store.complete_multipart(&session, &parts).await {
            Ok(receipt) => receipt,
            Err(e) => {
                abort(store, &session).await;
                return Err(e.into());
            }
        };

        if receipt.etag != local {
            return Err(UploadError::UploadDigestMismatch {
                key: key.to_string(),
                local,
                remote: receipt.etag,
            });
        }
        Ok(parts.len() as u64)
    }
}

/// Reads the file chunk by chunk and uploads each one, strictly in order.
///
/// Returns the acknowledged parts and the composite ETag of what was read.
async fn send_parts(
    store: &dyn ObjectStore,
    session: &MultipartSession,
    path: &Path,
    size: u64,
    part_size: u64,
    part_count: u64,
) -> Result<(Vec<CompletedPart>, String), UploadError> {
    let open_path: PathBuf = path.to_path_buf();
    let mut reader =
        tokio::task::spawn_blocking(move || ChunkReader::new(&open_path, part_size)).await??;

    let mut parts: Vec<CompletedPart> = Vec::with_capacity(part_count as usize);
    let mut composite = CompositeDigest::new();
    let mut sent: u64 = 0;

    loop {
        let (returned, next) = tokio::task::spawn_blocking(move || {
            let next = reader.next_chunk();
            (reader, next)
        })
        .await?;
        reader = returned;

        let Some(chunk) = next? else {
            break;
        };

        let expected = parts.len() as u64 + 1;
        if u64::from(chunk.part_number) != expected {
            return Err(UploadError::Invariant(format!(
                "{}: part {} read where part {expected} was due",
                session.key, chunk.part_number
            )));
        }

        let len = chunk.data.len() as u64;
        composite.push_part(&chunk.data);
        let part = store
            .upload_part(session, chunk.part_number, chunk.data)
            .await?;
        if part.part_number != chunk.part_number {
            return Err(UploadError::Invariant(format!(
                "{}: store acknowledged part {} for part {}",
                session.key, part.part_number, chunk.part_number
            )));
        }
        sent += len;
        debug!(
            key = %session.key,
            part = part.part_number,
            of = part_count,
            sent,
            total = size,
            "part uploaded"
        );
        parts.push(part);
    }

    if sent != size {
        return Err(UploadError::Io(std::io::Error::other(format!(
            "{} changed size during upload: expected {size} bytes, read {sent}",
            path.display()
        ))));
    }

    Ok((parts, composite.finish()))
}

/// Cancels a multipart upload after a failure. The original error wins.
async fn abort(store: &dyn ObjectStore, session: &MultipartSession) {
    match store.cancel_multipart(session).await {
        Ok(()) => debug!(key = %session.key, upload_id = %session.upload_id, "multipart upload cancelled"),
        Err(e) => warn!(
            key = %session.key,
            upload_id = %session.upload_id,
            error = %e,
            "failed to cancel multipart upload"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tablevault_store::{MemoryStore, Operation, StoreCall};
    use tablevault_transfer::{FixedMemory, md5_hex, multipart_etag};
    use tracing_test::traced_test;

    use crate::types::Verdict;

    fn uploader(max_single: u64, chunk: u64) -> Uploader {
        Uploader::new(ChunkPlanner::new(
            max_single,
            chunk,
            Arc::new(FixedMemory(u64::MAX)),
        ))
    }

    fn task_for(dir: &Path, name: &str, data: &[u8]) -> UploadTask {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        UploadTask {
            remote_key: format!("node1:{}", path.display()),
            local_path: path,
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn transfer_calls(store: &MemoryStore) -> usize {
        store.count(Operation::Put) + store.count(Operation::Initiate)
    }

    #[tokio::test]
    async fn single_upload_with_metadata_then_index() {
        let dir = tempfile::tempdir().unwrap();
        let payload = data(10 * 1024 * 1024);
        let task = task_for(dir.path(), "ks-cf-ka-1-Data.db", &payload);
        let index_key = format!("{}-listdir.json", task.remote_key);
        let store = MemoryStore::new();

        let outcome = Uploader::default().upload(&store, &task).await.unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                strategy: Strategy::Single,
                bytes: payload.len() as u64
            }
        );

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Head(task.remote_key.clone()),
                StoreCall::Put(task.remote_key.clone()),
                StoreCall::Put(index_key.clone()),
            ]
        );

        let stored = store.object(&task.remote_key).unwrap();
        assert_eq!(stored.etag, md5_hex(&payload));
        let stat = stored.metadata.stat.unwrap();
        let meta = std::fs::metadata(&task.local_path).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            assert_eq!(stat.uid, meta.uid());
            assert_eq!(stat.gid, meta.gid());
            assert_eq!(stat.mode, meta.mode());
        }
        assert_eq!(stat.part_size, None);
        assert!(store.object(&index_key).is_some());
    }

    #[tokio::test]
    async fn second_upload_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_for(dir.path(), "a-Data.db", &data(100));
        let store = MemoryStore::new();
        let up = uploader(1000, 10);

        up.upload(&store, &task).await.unwrap();
        let outcome = up.upload(&store, &task).await.unwrap();

        assert_eq!(outcome, UploadOutcome::Skipped(Verdict::AlreadyStored));
        assert_eq!(store.count(Operation::Put), 2); // data + index, once
        assert_eq!(transfer_calls(&store), 2);
    }

    #[tokio::test]
    async fn size_threshold_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let up = uploader(100, 40);

        for (len, multipart) in [(99, false), (100, false), (101, true)] {
            let store = MemoryStore::new();
            let task = task_for(dir.path(), &format!("f{len}"), &data(len));
            let outcome = up.upload(&store, &task).await.unwrap();
            assert_eq!(store.count(Operation::Initiate), usize::from(multipart), "len {len}");
            match outcome {
                UploadOutcome::Uploaded {
                    strategy: Strategy::Multipart { parts },
                    ..
                } => {
                    assert!(multipart);
                    assert_eq!(parts, 3);
                }
                UploadOutcome::Uploaded {
                    strategy: Strategy::Single,
                    ..
                } => assert!(!multipart),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn multipart_parts_in_order_then_one_complete() {
        // 6 GiB over a 4 GiB threshold with 256 MiB chunks, scaled down.
        let dir = tempfile::tempdir().unwrap();
        let payload = data(240);
        let task = task_for(dir.path(), "big-Data.db", &payload);
        let store = MemoryStore::new();

        let outcome = uploader(160, 10).upload(&store, &task).await.unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                strategy: Strategy::Multipart { parts: 24 },
                bytes: 240
            }
        );

        let calls: Vec<StoreCall> = store
            .calls()
            .into_iter()
            .filter(|c| !matches!(c, StoreCall::Head(_) | StoreCall::Put(_)))
            .collect();
        let mut expected = vec![StoreCall::Initiate(task.remote_key.clone())];
        expected.extend((1..=24).map(|n| StoreCall::UploadPart {
            key: task.remote_key.clone(),
            part_number: n,
        }));
        expected.push(StoreCall::Complete {
            key: task.remote_key.clone(),
            parts: 24,
        });
        assert_eq!(calls, expected);

        let stored = store.object(&task.remote_key).unwrap();
        assert_eq!(stored.data, payload);
        assert_eq!(stored.metadata.stat.unwrap().part_size, Some(10));
        assert_eq!(stored.etag, multipart_etag(&task.local_path, 10).unwrap());
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn failed_part_cancels_once_and_never_completes() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_for(dir.path(), "big-Data.db", &data(50));
        let store = MemoryStore::new();
        store.fail_call(Operation::UploadPart, 3);

        let err = uploader(20, 10).upload(&store, &task).await.unwrap_err();
        assert!(matches!(err, UploadError::Store(_)));
        assert!(err.is_retryable());

        assert_eq!(store.count(Operation::UploadPart), 3);
        assert_eq!(store.count(Operation::Complete), 0);
        assert_eq!(store.count(Operation::Cancel), 1);
        assert_eq!(store.open_uploads(), 0);
        assert!(store.object(&task.remote_key).is_none());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn failed_complete_cancels_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_for(dir.path(), "big-Data.db", &data(50));
        let store = MemoryStore::new();
        store.fail_next(Operation::Complete, 1);

        assert!(uploader(20, 10).upload(&store, &task).await.is_err());
        assert_eq!(store.count(Operation::Complete), 1);
        assert_eq!(store.count(Operation::Cancel), 1);
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn mismatched_remote_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_for(dir.path(), "a-Data.db", b"local content");
        let store = MemoryStore::new();
        store.insert(&task.remote_key, b"other content".to_vec(), None);
        store.reset_calls();

        let outcome = uploader(1000, 10).upload(&store, &task).await.unwrap();
        assert!(matches!(
            outcome,
            UploadOutcome::Skipped(Verdict::DigestMismatch { .. })
        ));
        assert_eq!(transfer_calls(&store), 0);
        assert_eq!(store.object(&task.remote_key).unwrap().data, b"other content");
        assert!(logs_contain("digest differs from local file"));

        store.insert(&task.remote_key, b"short".to_vec(), None);
        let outcome = uploader(1000, 10).upload(&store, &task).await.unwrap();
        assert!(matches!(
            outcome,
            UploadOutcome::Skipped(Verdict::SizeMismatch { .. })
        ));
        assert_eq!(transfer_calls(&store), 0);
        assert!(logs_contain("size differs from local file"));
    }

    #[tokio::test]
    async fn vanished_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let task = UploadTask {
            local_path: dir.path().join("gone-Data.db"),
            remote_key: "k".into(),
        };
        let store = MemoryStore::new();
        let outcome = uploader(1000, 10).upload(&store, &task).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Vanished);
        assert!(store.calls().is_empty());
    }
}
