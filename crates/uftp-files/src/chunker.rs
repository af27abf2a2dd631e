//! File chunking and in-order reassembly.

use crate::DEFAULT_CHUNK_SIZE;
use std::ops::Range;

/// Split a file body into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with the default chunk size
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with a custom chunk size.
    ///
    /// A zero size is bumped to one byte.
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.max(1),
        }
    }

    /// Get chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks for a file of `file_size` bytes (0 for an empty file)
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// Byte range of chunk `index`, or `None` past the end
    pub fn chunk_range(&self, index: u64, file_size: u64) -> Option<Range<usize>> {
        if index >= self.chunk_count(file_size) {
            return None;
        }
        let start = index as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(file_size as usize);
        Some(start..end)
    }

    /// Slice of chunk `index` within `data`
    pub fn chunk<'a>(&self, data: &'a [u8], index: u64) -> Option<&'a [u8]> {
        self.chunk_range(index, data.len() as u64)
            .map(|range| &data[range])
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembly errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    /// A chunk arrived ahead of or behind the next expected index
    #[error("out-of-order chunk: expected {expected}, got {got}")]
    OutOfOrder {
        /// Index the reassembler is waiting for
        expected: u64,
        /// Index that arrived
        got: u64,
    },

    /// Every chunk has already been accepted
    #[error("transfer already complete")]
    Complete,

    /// Accepted bytes would not add up to the announced size
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Announced file size
        expected: u64,
        /// Bytes accepted (or that would be accepted)
        actual: u64,
    },
}

/// Strict in-order reassembler.
///
/// Only the chunk at [`FileReassembler::next_index`] is accepted; nothing is
/// buffered ahead.
#[derive(Debug)]
pub struct FileReassembler {
    total_size: u64,
    expected_chunks: u64,
    next_index: u64,
    chunks: Vec<Vec<u8>>,
    received_bytes: u64,
}

impl FileReassembler {
    /// Prepare to receive `total_size` bytes in chunks of `chunk_size`
    pub fn new(total_size: u64, chunk_size: usize) -> Self {
        let expected_chunks = FileChunker::with_chunk_size(chunk_size).chunk_count(total_size);
        Self {
            total_size,
            expected_chunks,
            next_index: 0,
            chunks: Vec::with_capacity(expected_chunks.min(4096) as usize),
            received_bytes: 0,
        }
    }

    /// Index of the next chunk to accept
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Total number of chunks expected
    pub fn expected_chunks(&self) -> u64 {
        self.expected_chunks
    }

    /// Whether every chunk has been accepted
    pub fn is_complete(&self) -> bool {
        self.next_index >= self.expected_chunks
    }

    /// Accept chunk `index`.
    ///
    /// # Errors
    /// `OutOfOrder` unless `index == next_index`; `Complete` once done;
    /// `SizeMismatch` if the payload would overrun the announced size.
    pub fn accept(&mut self, index: u64, payload: &[u8]) -> Result<(), ReassemblyError> {
        if self.is_complete() {
            return Err(ReassemblyError::Complete);
        }
        if index != self.next_index {
            return Err(ReassemblyError::OutOfOrder {
                expected: self.next_index,
                got: index,
            });
        }
        let after = self.received_bytes + payload.len() as u64;
        if after > self.total_size {
            return Err(ReassemblyError::SizeMismatch {
                expected: self.total_size,
                actual: after,
            });
        }

        self.chunks.push(payload.to_vec());
        self.received_bytes = after;
        self.next_index += 1;
        Ok(())
    }

    /// Concatenate the accepted chunks.
    ///
    /// # Errors
    /// `SizeMismatch` if the byte count differs from the announced size.
    pub fn finish(self) -> Result<Vec<u8>, ReassemblyError> {
        if self.received_bytes != self.total_size {
            return Err(ReassemblyError::SizeMismatch {
                expected: self.total_size,
                actual: self.received_bytes,
            });
        }
        Ok(self.chunks.concat())
    }
}
