//! In-process object store.
//!
//! Honors the full [`ObjectStore`] contract, records every call in order and
//! supports scripted failures. Cloning shares the underlying state, so the
//! store doubles as its own [`StoreConnector`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tablevault_transfer::{CompositeDigest, md5_hex};

use crate::types::{
    CompletedPart, FileStat, MultipartSession, ObjectBody, ObjectMetadata, PutReceipt,
    RemoteObject,
};
use crate::{ObjectStore, StoreConnector, StoreError, StoreFuture};

/// Store operations, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Head,
    Put,
    Initiate,
    UploadPart,
    Complete,
    Cancel,
}

/// A recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Head(String),
    Put(String),
    Initiate(String),
    UploadPart { key: String, part_number: u16 },
    Complete { key: String, parts: usize },
    Cancel(String),
}

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub etag: String,
    pub metadata: ObjectMetadata,
}

struct PendingUpload {
    key: String,
    metadata: ObjectMetadata,
    parts: BTreeMap<u16, Vec<u8>>,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    calls: Vec<StoreCall>,
    connects: usize,
    next_upload_id: u64,
    /// Calls seen so far, per operation.
    counts: HashMap<Operation, usize>,
    /// Fail the next N calls of an operation.
    fail_next: HashMap<Operation, usize>,
    /// Fail specific calls (1-based, per operation).
    fail_calls: HashSet<(Operation, usize)>,
}

impl MemoryState {
    fn check(&mut self, op: Operation) -> Result<(), StoreError> {
        let count = self.counts.entry(op).or_insert(0);
        *count += 1;
        let nth = *count;

        if self.fail_calls.remove(&(op, nth)) {
            return Err(StoreError::Injected(op));
        }
        if let Some(remaining) = self.fail_next.get_mut(&op)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Injected(op));
        }
        Ok(())
    }
}

/// In-memory [`ObjectStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores `data` under `key` as if uploaded in one request.
    pub fn insert(&self, key: &str, data: Vec<u8>, stat: Option<FileStat>) {
        let etag = md5_hex(&data);
        self.insert_with_etag(key, data, &etag, stat);
    }

    /// Stores `data` under `key` with an arbitrary ETag.
    pub fn insert_with_etag(&self, key: &str, data: Vec<u8>, etag: &str, stat: Option<FileStat>) {
        self.state().objects.insert(
            key.to_string(),
            StoredObject {
                data,
                etag: etag.to_string(),
                metadata: ObjectMetadata {
                    stat,
                    content_type: None,
                },
            },
        );
    }

    /// Returns the object stored under `key`.
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.state().objects.get(key).cloned()
    }

    /// Returns all stored keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Returns every recorded call in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    /// Returns the number of calls made for `op`, including failed ones.
    pub fn count(&self, op: Operation) -> usize {
        match op {
            Operation::Connect => self.state().connects,
            _ => self.state().counts.get(&op).copied().unwrap_or(0),
        }
    }

    /// Returns the number of connections handed out.
    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Returns the number of multipart uploads neither completed nor cancelled.
    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Makes the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: Operation, times: usize) {
        *self.state().fail_next.entry(op).or_insert(0) += times;
    }

    /// Makes the `nth` call (1-based) of `op` fail.
    pub fn fail_call(&self, op: Operation, nth: usize) {
        self.state().fail_calls.insert((op, nth));
    }

    /// Clears the call log and counters, keeping objects.
    pub fn reset_calls(&self) {
        let mut s = self.state();
        s.calls.clear();
        s.counts.clear();
        s.connects = 0;
    }
}

impl StoreConnector for MemoryStore {
    fn connect(&self) -> Result<Box<dyn ObjectStore>, StoreError> {
        let mut s = self.state();
        s.connects += 1;
        s.check(Operation::Connect)?;
        drop(s);
        Ok(Box::new(self.clone()))
    }
}

impl ObjectStore for MemoryStore {
    fn head_object<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<RemoteObject>> {
        Box::pin(async move {
            let mut s = self.state();
            s.calls.push(StoreCall::Head(key.to_string()));
            s.check(Operation::Head)?;
            Ok(s.objects.get(key).map(|obj| RemoteObject {
                key: key.to_string(),
                size: obj.data.len() as u64,
                etag: obj.etag.clone(),
                stat: obj.metadata.stat.clone(),
            }))
        })
    }

    fn put_object<'a>(
        &'a self,
        key: &'a str,
        body: ObjectBody,
        metadata: &'a ObjectMetadata,
    ) -> StoreFuture<'a, PutReceipt> {
        Box::pin(async move {
            {
                let mut s = self.state();
                s.calls.push(StoreCall::Put(key.to_string()));
                s.check(Operation::Put)?;
            }

            let data = match body {
                ObjectBody::Bytes(data) => data,
                ObjectBody::File { path, len } => {
                    let data = tokio::fs::read(&path).await?;
                    if data.len() as u64 != len {
                        return Err(StoreError::InvalidResponse(format!(
                            "short body for {key}: expected {len} bytes, read {}",
                            data.len()
                        )));
                    }
                    data
                }
            };

            let etag = md5_hex(&data);
            self.state().objects.insert(
                key.to_string(),
                StoredObject {
                    data,
                    etag: etag.clone(),
                    metadata: metadata.clone(),
                },
            );
            Ok(PutReceipt { etag })
        })
    }

    fn initiate_multipart<'a>(
        &'a self,
        key: &'a str,
        metadata: &'a ObjectMetadata,
    ) -> StoreFuture<'a, MultipartSession> {
        Box::pin(async move {
            let mut s = self.state();
            s.calls.push(StoreCall::Initiate(key.to_string()));
            s.check(Operation::Initiate)?;

            s.next_upload_id += 1;
            let upload_id = format!("upload-{}", s.next_upload_id);
            s.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    key: key.to_string(),
                    metadata: metadata.clone(),
                    parts: BTreeMap::new(),
                },
            );
            Ok(MultipartSession {
                key: key.to_string(),
                upload_id,
            })
        })
    }

    fn upload_part<'a>(
        &'a self,
        session: &'a MultipartSession,
        part_number: u16,
        data: Vec<u8>,
    ) -> StoreFuture<'a, CompletedPart> {
        Box::pin(async move {
            let mut s = self.state();
            s.calls.push(StoreCall::UploadPart {
                key: session.key.clone(),
                part_number,
            });
            s.check(Operation::UploadPart)?;

            let upload = s
                .uploads
                .get_mut(&session.upload_id)
                .ok_or_else(|| StoreError::NoSuchUpload(session.upload_id.clone()))?;
            let etag = md5_hex(&data);
            upload.parts.insert(part_number, data);
            Ok(CompletedPart { part_number, etag })
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        session: &'a MultipartSession,
        parts: &'a [CompletedPart],
    ) -> StoreFuture<'a, PutReceipt> {
        Box::pin(async move {
            let mut s = self.state();
            s.calls.push(StoreCall::Complete {
                key: session.key.clone(),
                parts: parts.len(),
            });
            s.check(Operation::Complete)?;

            let upload = s
                .uploads
                .remove(&session.upload_id)
                .ok_or_else(|| StoreError::NoSuchUpload(session.upload_id.clone()))?;

            let mut data = Vec::new();
            let mut composite = CompositeDigest::new();
            for part in parts {
                let bytes = upload.parts.get(&part.part_number).ok_or_else(|| {
                    StoreError::InvalidResponse(format!(
                        "part {} of {} was never uploaded",
                        part.part_number, upload.key
                    ))
                })?;
                if md5_hex(bytes) != part.etag {
                    return Err(StoreError::InvalidResponse(format!(
                        "part {} of {} has a stale ETag",
                        part.part_number, upload.key
                    )));
                }
                composite.push_part(bytes);
                data.extend_from_slice(bytes);
            }

            let etag = composite.finish();
            s.objects.insert(
                upload.key,
                StoredObject {
                    data,
                    etag: etag.clone(),
                    metadata: upload.metadata,
                },
            );
            Ok(PutReceipt { etag })
        })
    }

    fn cancel_multipart<'a>(&'a self, session: &'a MultipartSession) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut s = self.state();
            s.calls.push(StoreCall::Cancel(session.key.clone()));
            s.check(Operation::Cancel)?;

            s.uploads
                .remove(&session.upload_id)
                .map(|_| ())
                .ok_or_else(|| StoreError::NoSuchUpload(session.upload_id.clone()))
        })
    }
}
