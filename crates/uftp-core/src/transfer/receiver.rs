//! Chunked file receiver.
//!
//! Chunks are accepted strictly in index order. Anything else means the
//! stream has a hole: the receiver asks the sender to resume from the
//! missing index and discards whatever is queued behind it, since those
//! chunks will be streamed again anyway.

use super::chunk_total;
use super::integrity::verify_or_reject;
use crate::config::TransferConfig;
use crate::demux::{InboundQueue, QueueError};
use crate::error::TransferError;
use crate::frame::Frame;
use crate::link::PeerLink;
use tokio::time::Instant;
use uftp_files::{Digest, FileReassembler, ReassemblyError};

/// Receive the `total_size`-byte body tagged `digest`.
///
/// The returned bytes have the announced length but have not been checked
/// against the digest; see [`receive_verified`].
///
/// # Errors
/// `SizeMismatch` if chunks overrun the announced size, `Stalled` or
/// `TooManyResends` when the configured limits are hit, `Closed` if the
/// queue closes, or a transport error sending resend requests.
pub async fn receive_file(
    link: &PeerLink,
    queue: &mut InboundQueue,
    digest: Digest,
    total_size: u64,
    config: &TransferConfig,
) -> Result<Vec<u8>, TransferError> {
    let total = chunk_total(total_size, config.chunk_size)?;
    let mut reassembler = FileReassembler::new(total_size, config.chunk_size);
    let mut resends = 0u32;
    let mut last_progress = Instant::now();

    tracing::info!(
        "Receiving {} ({} bytes, {} chunks) from {}",
        digest.short(),
        total_size,
        total,
        link.peer()
    );

    while !reassembler.is_complete() {
        if let Some(stall) = config.stall_timeout {
            if last_progress.elapsed() >= stall {
                return Err(TransferError::Stalled(stall));
            }
        }
        // Bounded by `total`, which fits in a u32
        let next = reassembler.next_index() as u32;

        let chunk = match queue.recv_frame(config.chunk_timeout).await {
            Ok(Frame::FileChunk(chunk)) if chunk.digest == digest => chunk,
            Ok(Frame::FileChunk(chunk)) => {
                tracing::trace!("Discarding chunk {} of {}", chunk.index, chunk.digest.short());
                continue;
            }
            Ok(other) => {
                tracing::debug!("Ignoring {} while receiving {}", other.tag(), digest.short());
                continue;
            }
            Err(QueueError::Timeout) => {
                tracing::debug!("Timed out waiting for chunk {} of {}", next, digest.short());
                request_resend(link, digest, next, &mut resends, config).await?;
                continue;
            }
            Err(QueueError::Closed) => return Err(TransferError::Closed),
        };

        match reassembler.accept(u64::from(chunk.index), &chunk.payload) {
            Ok(()) => {
                last_progress = Instant::now();
                tracing::trace!("Accepted chunk {}/{} of {}", chunk.index, total, digest.short());
            }
            Err(ReassemblyError::OutOfOrder { expected, got }) => {
                tracing::debug!("Sequence gap in {}: expected {}, got {}", digest.short(), expected, got);
                request_resend(link, digest, next, &mut resends, config).await?;
                let drained = queue.drain();
                tracing::trace!("Drained {} queued frames", drained);
                tokio::time::sleep(config.resend_pause).await;
            }
            Err(ReassemblyError::Complete) => break,
            Err(e) => return Err(e.into()),
        }
    }

    reassembler.finish().map_err(TransferError::from)
}

/// Receive a body and check it against `digest` without acknowledging it.
///
/// Any body that cannot be accepted, whether it hashes wrong or does not
/// fit the announced size, is answered with `FAIL\0<hex>`. The caller
/// sends the final `OK` once it has stored the content.
///
/// # Errors
/// `IntegrityFailure` when the digest does not match, or any error from
/// [`receive_file`].
pub async fn receive_checked(
    link: &PeerLink,
    queue: &mut InboundQueue,
    digest: Digest,
    total_size: u64,
    config: &TransferConfig,
) -> Result<Vec<u8>, TransferError> {
    let content = match receive_file(link, queue, digest, total_size, config).await {
        Ok(content) => content,
        Err(e @ (TransferError::SizeMismatch { .. } | TransferError::Reassembly(_))) => {
            tracing::warn!("Rejecting {} from {}: {}", digest.short(), link.peer(), e);
            link.send_frame(&Frame::Fail { digest }).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };
    verify_or_reject(link, &content, &digest).await?;
    Ok(content)
}

/// Receive a body and accept it only if it matches `digest`.
///
/// Sends `OK\0<hex>` after successful verification and `FAIL\0<hex>`
/// otherwise.
///
/// # Errors
/// As [`receive_checked`].
pub async fn receive_verified(
    link: &PeerLink,
    queue: &mut InboundQueue,
    digest: Digest,
    total_size: u64,
    config: &TransferConfig,
) -> Result<Vec<u8>, TransferError> {
    let content = receive_checked(link, queue, digest, total_size, config).await?;

    link.send_frame(&Frame::Ack {
        digest: Some(digest),
    })
    .await?;
    tracing::info!("Received {} from {}", digest.short(), link.peer());
    Ok(content)
}

async fn request_resend(
    link: &PeerLink,
    digest: Digest,
    index: u32,
    resends: &mut u32,
    config: &TransferConfig,
) -> Result<(), TransferError> {
    *resends += 1;
    if let Some(max) = config.max_resends {
        if *resends > max {
            return Err(TransferError::TooManyResends(max));
        }
    }
    link.send_frame(&Frame::Resend { digest, index }).await?;
    Ok(())
}
