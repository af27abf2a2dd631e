//! Reliable chunked file transfer.
//!
//! The sender streams every chunk in index order at a fixed pace and
//! restarts from whatever index the receiver asks for. The receiver accepts
//! chunks strictly in order; on a gap it asks for the missing index and
//! throws away whatever is already queued. A body is only handed out after
//! its SHA-256 digest matches the announced one.

pub mod integrity;
pub mod receiver;
pub mod sender;

pub use integrity::verify_or_reject;
pub use receiver::{receive_checked, receive_file, receive_verified};
pub use sender::{SendReport, send_announced, send_file};

use crate::error::TransferError;
use uftp_files::FileChunker;

/// Chunk count for `size` bytes, checked against the u32 index space
pub(crate) fn chunk_total(size: u64, chunk_size: usize) -> Result<u32, TransferError> {
    let count = FileChunker::with_chunk_size(chunk_size).chunk_count(size);
    u32::try_from(count).map_err(|_| TransferError::TooLarge(count))
}
