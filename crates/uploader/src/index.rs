//! Directory index objects.
//!
//! Every upload is accompanied by `<key>-listdir.json`, a snapshot of the
//! file's parent directory taken just before the transfer. It lets a restore
//! tell which files belonged together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tablevault_store::{ObjectBody, ObjectMetadata, ObjectStore};
use tracing::debug;

use crate::UploadError;
use crate::key::KeyScheme;

/// Sorted entry names of one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub dir: PathBuf,
    pub entries: Vec<String>,
}

impl DirectorySnapshot {
    /// Lists the parent directory of `file`.
    pub fn of_parent(file: &Path) -> std::io::Result<Self> {
        let dir = std::path::absolute(file)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| "/".into());
        let entries = list_directory(&dir)?;
        Ok(Self { dir, entries })
    }

    /// Serializes `{ "<dir>": [names...] }`.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut doc = BTreeMap::new();
        doc.insert(self.dir.to_string_lossy(), &self.entries);
        serde_json::to_vec(&doc)
    }
}

/// Lists the entry names of `dir`, sorted.
pub fn list_directory(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Takes the snapshot of `file`'s parent directory on a blocking thread.
pub async fn snapshot(file: &Path) -> Result<DirectorySnapshot, UploadError> {
    let file = file.to_path_buf();
    Ok(tokio::task::spawn_blocking(move || DirectorySnapshot::of_parent(&file)).await??)
}

/// Writes (or overwrites) the index object for the file stored at `remote_key`.
pub async fn write_index(
    store: &dyn ObjectStore,
    remote_key: &str,
    snapshot: &DirectorySnapshot,
) -> Result<(), UploadError> {
    let key = KeyScheme::index_key(remote_key);
    let body = snapshot.to_json()?;
    store
        .put_object(&key, ObjectBody::Bytes(body), &ObjectMetadata::json())
        .await?;
    debug!(key = %key, entries = snapshot.entries.len(), "directory index written");
    Ok(())
}
