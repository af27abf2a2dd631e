//! # UFTP Files
//!
//! File transfer engine for the UFTP protocol.
//!
//! This crate provides:
//! - Fixed-size chunking of an in-memory file body
//! - Strict in-order reassembly of received chunks
//! - SHA-256 content digests for end-to-end integrity verification

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod hasher;

pub use chunker::{FileChunker, FileReassembler, ReassemblyError};
pub use hasher::{Digest, DigestError};

/// Default chunk payload size in bytes.
///
/// A 2048-byte datagram minus the 45-byte chunk header and the 16-byte
/// checksum trailer.
pub const DEFAULT_CHUNK_SIZE: usize = 1987;

/// Metadata announced before a file body is streamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File name (no directory components)
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// SHA-256 of the entire file
    pub digest: Digest,
    /// Number of chunks at the chunk size used to build this metadata
    pub chunk_count: u64,
}

impl FileMetadata {
    /// Describe `content` under `name`, chunked at `chunk_size`
    pub fn from_content(name: impl Into<String>, content: &[u8], chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            size: content.len() as u64,
            digest: hasher::hash_content(content),
            chunk_count: FileChunker::with_chunk_size(chunk_size).chunk_count(content.len() as u64),
        }
    }
}
