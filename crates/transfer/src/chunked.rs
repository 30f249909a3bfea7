use std::io::Read;
use std::path::Path;

use crate::{MAX_PART_COUNT, TransferError};

/// One part of a multipart upload, held in memory until it is sent.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 1-based part number.
    pub part_number: u16,
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reads a file sequentially in fixed-size chunks, numbering them as parts.
///
/// Every chunk except the last is exactly `chunk_size` bytes, even when the
/// underlying reads come back short.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: u64,
    offset: u64,
    file_size: u64,
    next_part: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub fn new(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize(chunk_size));
        }
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size,
            next_part: 1,
        })
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.next_part > MAX_PART_COUNT {
            // Only an error if there is still data left to send.
            let mut probe = [0u8; 1];
            if self.file.read(&mut probe)? == 0 {
                return Ok(None);
            }
            return Err(TransferError::PartLimit {
                part: self.next_part,
            });
        }

        let mut buf = Vec::with_capacity(self.chunk_size as usize);
        let n = (&mut self.file).take(self.chunk_size).read_to_end(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }

        let chunk = Chunk {
            part_number: self.next_part as u16,
            offset: self.offset,
            data: buf,
        };
        self.offset += n as u64;
        self.next_part += 1;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File size in bytes at open time.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read, based on the size at open time.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn chunk_reader_reads_all() {
        let dir = TempDir::new().unwrap();
        let data = b"AABBCCDDEE"; // 10 bytes.
        let path = create_test_file(dir.path(), "test.db", data);

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.remaining(), 10);

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c1.part_number, 1);
        assert_eq!(c1.offset, 0);
        assert_eq!(&c1.data, b"AABB");
        assert_eq!(reader.remaining(), 6);

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c2.part_number, 2);
        assert_eq!(c2.offset, 4);
        assert_eq!(&c2.data, b"CCDD");

        let c3 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c3.part_number, 3);
        assert_eq!(c3.offset, 8);
        assert_eq!(&c3.data, b"EE");

        assert!(reader.next_chunk().unwrap().is_none());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn chunk_reader_exact_multiple_has_no_empty_tail() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.db", b"12345678");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), 4);
        assert_eq!(reader.next_chunk().unwrap().unwrap().len(), 4);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.db", b"");
        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_rejects_zero_chunk_size() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "x.db", b"x");
        assert!(matches!(
            ChunkReader::new(&path, 0),
            Err(TransferError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn chunk_reader_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = ChunkReader::new(&dir.path().join("gone.db"), 4);
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn chunk_reader_reassembles_original() {
        let dir = TempDir::new().unwrap();
        let original = b"The quick brown fox jumps over the lazy dog";
        let path = create_test_file(dir.path(), "fox.db", original);

        let mut reader = ChunkReader::new(&path, 10).unwrap();
        let mut out = Vec::new();
        let mut last_part = 0;
        while let Some(chunk) = reader.next_chunk().unwrap() {
            assert_eq!(chunk.part_number, last_part + 1);
            assert_eq!(chunk.offset, out.len() as u64);
            last_part = chunk.part_number;
            out.extend_from_slice(&chunk.data);
        }
        assert_eq!(&out, original);
        assert_eq!(last_part, 5);
    }
}
