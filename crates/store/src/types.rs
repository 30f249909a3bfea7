//! Data types exchanged with the object store.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// User-metadata key holding the serialized [`FileStat`].
pub const STAT_METADATA_KEY: &str = "stat";

/// Ownership and permission bits captured at upload time.
///
/// Stored as JSON in the object's user metadata so file attributes can be
/// restored later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Part size of a multipart upload, used to recompute its ETag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
}

impl FileStat {
    /// Serializes to the JSON carried in object metadata.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses the JSON carried in object metadata.
    pub fn from_json(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

/// Metadata attached to an object when it is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub stat: Option<FileStat>,
    pub content_type: Option<String>,
}

impl ObjectMetadata {
    /// Metadata for a backed-up data file.
    pub fn for_file(stat: FileStat) -> Self {
        Self {
            stat: Some(stat),
            content_type: None,
        }
    }

    /// Metadata for a JSON document.
    pub fn json() -> Self {
        Self {
            stat: None,
            content_type: Some("application/json".into()),
        }
    }
}

/// Payload of a single-request upload.
#[derive(Debug, Clone)]
pub enum ObjectBody {
    /// In-memory bytes.
    Bytes(Vec<u8>),
    /// A local file of `len` bytes, streamed from disk.
    File { path: PathBuf, len: u64 },
}

impl ObjectBody {
    pub fn len(&self) -> u64 {
        match self {
            ObjectBody::Bytes(data) => data.len() as u64,
            ObjectBody::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An object as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    /// ETag without surrounding quotes.
    pub etag: String,
    pub stat: Option<FileStat>,
}

/// Acknowledgement of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub etag: String,
}

/// A store-side multipart upload in progress.
///
/// Must end in exactly one complete or cancel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    pub key: String,
    pub upload_id: String,
}

/// A part the store has acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u16,
    pub etag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stat_json_omits_missing_fields() {
        let stat = FileStat {
            uid: 1000,
            gid: 1000,
            mode: 0o100644,
            ..FileStat::default()
        };
        let json = stat.to_json().unwrap();
        assert_eq!(json, r#"{"uid":1000,"gid":1000,"mode":33188}"#);
        assert_eq!(FileStat::from_json(&json).unwrap(), stat);
    }

    #[test]
    fn file_stat_json_with_names_and_part_size() {
        let stat = FileStat {
            uid: 105,
            gid: 110,
            mode: 0o100600,
            user: Some("cassandra".into()),
            group: Some("cassandra".into()),
            part_size: Some(256 * 1024 * 1024),
        };
        let parsed = FileStat::from_json(&stat.to_json().unwrap()).unwrap();
        assert_eq!(parsed, stat);
    }

    #[test]
    fn file_stat_ignores_unknown_fields() {
        let parsed = FileStat::from_json(r#"{"uid":1,"gid":2,"mode":3,"extra":true}"#).unwrap();
        assert_eq!(parsed.uid, 1);
        assert_eq!(parsed.part_size, None);
    }

    #[test]
    fn object_body_len() {
        assert_eq!(ObjectBody::Bytes(vec![1, 2, 3]).len(), 3);
        let body = ObjectBody::File {
            path: "/tmp/x".into(),
            len: 42,
        };
        assert_eq!(body.len(), 42);
        assert!(!body.is_empty());
    }
}
