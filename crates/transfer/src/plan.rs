//! Upload strategy selection.

use std::sync::Arc;

use tracing::debug;

use crate::memory::{MemoryProbe, SystemMemory};
use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_SINGLE_SIZE, MAX_PART_COUNT, MIN_PART_SIZE};

/// Fraction of available memory a single chunk may use once memory is tight.
const MEMORY_SHARE_DIVISOR: u64 = 20;

/// How a file is sent to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    /// One request carrying the whole file.
    Single,
    /// A multipart upload with parts of `part_size` bytes (the last may be shorter).
    Multipart { part_size: u64, part_count: u64 },
}

/// Chooses between single-request and multipart uploads and sizes the parts.
#[derive(Clone)]
pub struct ChunkPlanner {
    max_single_size: u64,
    chunk_size: u64,
    memory: Arc<dyn MemoryProbe>,
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_SINGLE_SIZE,
            DEFAULT_CHUNK_SIZE,
            Arc::new(SystemMemory),
        )
    }
}

impl ChunkPlanner {
    /// Creates a planner.
    ///
    /// Files larger than `max_single_size` go multipart with parts of
    /// `chunk_size` bytes, shrunk when `memory` reports less than one chunk
    /// available.
    pub fn new(max_single_size: u64, chunk_size: u64, memory: Arc<dyn MemoryProbe>) -> Self {
        Self {
            max_single_size,
            chunk_size: chunk_size.max(1),
            memory,
        }
    }

    /// Plans the upload of a file of `file_size` bytes.
    pub fn plan(&self, file_size: u64) -> UploadPlan {
        if file_size <= self.max_single_size {
            return UploadPlan::Single;
        }

        let part_size = self.part_size_for(file_size);
        UploadPlan::Multipart {
            part_size,
            part_count: file_size.div_ceil(part_size),
        }
    }

    /// Part size for a multipart upload of `file_size` bytes.
    pub fn part_size_for(&self, file_size: u64) -> u64 {
        let mut part_size = self.chunk_size;

        if let Some(available) = self.memory.available_bytes()
            && available < part_size
        {
            let shrunk = (available / MEMORY_SHARE_DIVISOR)
                .max(MIN_PART_SIZE)
                .min(part_size);
            debug!(
                available,
                configured = part_size,
                shrunk,
                "low memory, shrinking chunk size"
            );
            part_size = shrunk;
        }

        // Never exceed the store's part count limit.
        let floor = file_size.div_ceil(MAX_PART_COUNT);
        part_size.max(floor).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedMemory;

    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;

    fn planner(max: u64, chunk: u64, available: u64) -> ChunkPlanner {
        ChunkPlanner::new(max, chunk, Arc::new(FixedMemory(available)))
    }

    #[test]
    fn threshold_boundaries() {
        let p = planner(1000, 100, u64::MAX);
        assert_eq!(p.plan(999), UploadPlan::Single);
        assert_eq!(p.plan(1000), UploadPlan::Single);
        assert_eq!(
            p.plan(1001),
            UploadPlan::Multipart {
                part_size: 100,
                part_count: 11
            }
        );
    }

    #[test]
    fn empty_file_is_single() {
        let p = planner(1000, 100, u64::MAX);
        assert_eq!(p.plan(0), UploadPlan::Single);
    }

    #[test]
    fn six_gib_over_four_gib_threshold() {
        let p = planner(4 * GIB, 256 * MIB, 64 * GIB);
        assert_eq!(
            p.plan(6 * GIB),
            UploadPlan::Multipart {
                part_size: 256 * MIB,
                part_count: 24
            }
        );
    }

    #[test]
    fn low_memory_shrinks_to_a_twentieth() {
        let p = planner(4 * GIB, 256 * MIB, 200 * MIB);
        assert_eq!(p.part_size_for(6 * GIB), 10 * MIB);
    }

    #[test]
    fn shrink_is_floored_at_min_part_size() {
        let p = planner(4 * GIB, 256 * MIB, 20 * MIB);
        assert_eq!(p.part_size_for(6 * GIB), MIN_PART_SIZE);
    }

    #[test]
    fn enough_memory_keeps_configured_chunk() {
        let p = planner(4 * GIB, 256 * MIB, 256 * MIB);
        assert_eq!(p.part_size_for(6 * GIB), 256 * MIB);
    }

    #[test]
    fn part_count_never_exceeds_limit() {
        let p = planner(4 * GIB, 5 * MIB, u64::MAX);
        let size = 100 * GIB;
        match p.plan(size) {
            UploadPlan::Multipart {
                part_size,
                part_count,
            } => {
                assert!(part_count <= MAX_PART_COUNT);
                assert!(part_size * part_count >= size);
            }
            UploadPlan::Single => panic!("expected multipart"),
        }
    }

    struct UnknownMemory;

    impl MemoryProbe for UnknownMemory {
        fn available_bytes(&self) -> Option<u64> {
            None
        }
    }

    #[test]
    fn unknown_memory_never_shrinks() {
        let p = ChunkPlanner::new(4 * GIB, 256 * MIB, Arc::new(UnknownMemory));
        assert_eq!(p.part_size_for(6 * GIB), 256 * MIB);
    }
}
