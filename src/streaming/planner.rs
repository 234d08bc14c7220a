//! Chunk planning: whole-file frame vs. a sequence of chunk frames.

use crate::error::{Result, UploadError};
use crate::streaming::protocol::TransferId;
use std::ops::Range;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Decides per file whether to send one frame or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    threshold: u64,
}

impl ChunkPlanner {
    pub fn new(threshold_bytes: u64) -> Result<Self> {
        if threshold_bytes == 0 {
            return Err(UploadError::Config(
                "chunk threshold must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            threshold: threshold_bytes,
        })
    }

    pub fn from_megabytes(mb: u64) -> Result<Self> {
        let bytes = mb.checked_mul(BYTES_PER_MB).ok_or_else(|| {
            UploadError::Config(format!("chunk threshold of {} MB overflows", mb))
        })?;
        Self::new(bytes)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Strictly greater-than: a file exactly at the threshold is not chunked.
    pub fn needs_chunking(&self, file_size: u64) -> bool {
        file_size > self.threshold
    }

    pub fn plan(&self, file_size: u64) -> TransferPlan {
        if self.needs_chunking(file_size) {
            TransferPlan::Chunked(ChunkPlan::new(file_size, self.threshold))
        } else {
            TransferPlan::WholeFile
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPlan {
    WholeFile,
    Chunked(ChunkPlan),
}

/// Byte ranges for one chunked file, all tagged with one transfer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub transfer_id: TransferId,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

impl ChunkPlan {
    fn new(file_size: u64, chunk_size: u64) -> Self {
        let total_chunks = file_size.div_ceil(chunk_size);
        Self {
            transfer_id: TransferId::random(),
            file_size,
            chunk_size,
            // bounded by the encoder: total_chunks that overflow i32 fail there
            total_chunks: u32::try_from(total_chunks).unwrap_or(u32::MAX),
        }
    }

    /// The chunk with 1-based `index`, or `None` when out of range.
    pub fn chunk(&self, index: u32) -> Option<ChunkRange> {
        if index == 0 || index > self.total_chunks {
            return None;
        }
        let start = (index as u64 - 1) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file_size);
        Some(ChunkRange {
            index,
            range: start..end,
        })
    }

    /// Chunks in ascending index order.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkRange> + '_ {
        (1..=self.total_chunks).filter_map(move |i| self.chunk(i))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRange {
    /// 1-based
    pub index: u32,
    pub range: Range<u64>,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
