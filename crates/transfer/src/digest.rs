use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::TransferError;

const READ_BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Single-part digests
// ---------------------------------------------------------------------------

/// Computes MD5 of `data` and returns the hex-encoded digest.
///
/// This is the ETag an S3-compatible store assigns to a single-request upload.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Computes MD5 of an entire file and returns the hex-encoded digest.
pub fn file_md5(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Multipart ETags
// ---------------------------------------------------------------------------

/// Accumulates part digests into a multipart ETag.
///
/// The store computes `md5(md5(part_1) || ... || md5(part_n))` and appends
/// `-n`.
#[derive(Debug, Default, Clone)]
pub struct CompositeDigest {
    digests: Vec<u8>,
    parts: usize,
}

impl CompositeDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the bytes of the next part.
    pub fn push_part(&mut self, data: &[u8]) {
        self.digests.extend_from_slice(&Md5::digest(data));
        self.parts += 1;
    }

    /// Number of parts seen so far.
    pub fn parts(&self) -> usize {
        self.parts
    }

    /// Returns the ETag for the parts pushed so far.
    pub fn finish(&self) -> String {
        format!("{}-{}", hex::encode(Md5::digest(&self.digests)), self.parts)
    }
}

/// Recomputes the multipart ETag a file would get when uploaded with
/// parts of `part_size` bytes.
pub fn multipart_etag(path: &Path, part_size: u64) -> Result<String, TransferError> {
    if part_size == 0 {
        return Err(TransferError::InvalidChunkSize(part_size));
    }

    let mut file = std::fs::File::open(path)?;
    let mut composite = CompositeDigest::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let mut part = Md5::new();
        let mut in_part: u64 = 0;
        while in_part < part_size {
            let want = std::cmp::min(buf.len() as u64, part_size - in_part) as usize;
            let n = file.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            part.update(&buf[..n]);
            in_part += n as u64;
        }
        if in_part == 0 {
            break;
        }
        composite.digests.extend_from_slice(&part.finalize());
        composite.parts += 1;
        if in_part < part_size {
            break;
        }
    }

    Ok(composite.finish())
}

// ---------------------------------------------------------------------------
// ETag helpers
// ---------------------------------------------------------------------------

/// Strips the quotes stores wrap around ETags (`"abc"`, `&quot;abc&quot;`).
pub fn normalize_etag(etag: &str) -> String {
    etag.trim()
        .trim_start_matches("&quot;")
        .trim_end_matches("&quot;")
        .trim_matches('"')
        .to_ascii_lowercase()
}

/// Returns `true` for ETags of the form `<hex>-<parts>`.
pub fn is_multipart_etag(etag: &str) -> bool {
    let etag = normalize_etag(etag);
    match etag.rsplit_once('-') {
        Some((digest, parts)) => {
            !digest.is_empty()
                && digest.chars().all(|c| c.is_ascii_hexdigit())
                && !parts.is_empty()
                && parts.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
