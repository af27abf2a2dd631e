//! Chunked file sender.
//!
//! A streaming task emits chunks `start..total` in order, pausing
//! `config.pacing` between sends. The control loop watches the peer's queue
//! and replaces the task whenever the receiver asks to resume from another
//! index. At most one streaming task exists per transfer: the old one is
//! cancelled and awaited before its replacement is spawned.

use super::chunk_total;
use crate::config::TransferConfig;
use crate::demux::{InboundQueue, QueueError};
use crate::error::TransferError;
use crate::frame::{Frame, encode_chunk};
use crate::link::PeerLink;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uftp_files::{Digest, FileChunker, hasher};
use uftp_transport::TransportError;

/// Outcome of a completed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Digest of the body sent
    pub digest: Digest,
    /// Number of chunks in the body
    pub chunks: u32,
    /// Streaming restarts honoured on resend requests
    pub restarts: u32,
}

/// Send `content` to the peer behind `link`, reading control frames from
/// `queue`.
///
/// Returns once the receiver acknowledges the body.
///
/// # Errors
/// `RejectedByPeer` when the receiver reports an integrity failure,
/// `Stalled` / `TooManyResends` when the configured limits are hit,
/// `Closed` if the queue closes, or a transport error.
pub async fn send_file(
    link: &PeerLink,
    queue: &mut InboundQueue,
    content: Arc<[u8]>,
    config: &TransferConfig,
) -> Result<SendReport, TransferError> {
    let digest = hasher::hash_content(&content);
    send_announced(link, queue, content, digest, config).await
}

/// Like [`send_file`] for a body whose digest was already computed and
/// announced to the peer
///
/// # Errors
/// As [`send_file`].
pub async fn send_announced(
    link: &PeerLink,
    queue: &mut InboundQueue,
    content: Arc<[u8]>,
    digest: Digest,
    config: &TransferConfig,
) -> Result<SendReport, TransferError> {
    let total = chunk_total(content.len() as u64, config.chunk_size)?;

    tracing::info!(
        "Sending {} ({} bytes, {} chunks) to {}",
        digest.short(),
        content.len(),
        total,
        link.peer()
    );

    let mut streamer = ChunkStreamer::new(link.clone(), content, digest, total, config);
    streamer.restart(0).await;

    let result = control_loop(&mut streamer, queue, config).await;
    streamer.complete().await;

    match &result {
        Ok(report) => tracing::info!(
            "Sent {} to {} ({} restarts)",
            digest.short(),
            link.peer(),
            report.restarts
        ),
        Err(e) => tracing::warn!("Send of {} to {} failed: {}", digest.short(), link.peer(), e),
    }
    result
}

async fn control_loop(
    streamer: &mut ChunkStreamer,
    queue: &mut InboundQueue,
    config: &TransferConfig,
) -> Result<SendReport, TransferError> {
    let digest = streamer.digest;
    let total = streamer.total;
    let mut restarts = 0u32;
    let mut last_resend: Option<(u32, Instant)> = None;
    let mut last_activity = Instant::now();

    loop {
        let next = match config.stall_timeout {
            Some(stall) => {
                let remaining = stall.saturating_sub(last_activity.elapsed());
                queue.recv_frame(remaining).await
            }
            None => queue.next_frame().await.ok_or(QueueError::Closed),
        };

        let frame = match next {
            Ok(frame) => frame,
            Err(QueueError::Timeout) => {
                return Err(TransferError::Stalled(
                    config.stall_timeout.unwrap_or_default(),
                ));
            }
            Err(QueueError::Closed) => return Err(TransferError::Closed),
        };

        match frame {
            Frame::Ack { digest: None } => break,
            Frame::Ack { digest: Some(acked) } if acked == digest => break,
            Frame::Fail { digest: failed } if failed == digest => {
                return Err(TransferError::RejectedByPeer { digest });
            }
            Frame::Resend {
                digest: wanted,
                index,
            } if wanted == digest => {
                last_activity = Instant::now();

                if index >= total {
                    tracing::debug!("Ignoring resend of {} past the last chunk {}", index, total);
                    continue;
                }
                if is_debounced(last_resend, index, config.resend_debounce) {
                    tracing::debug!("Ignoring repeated resend from {}", index);
                    continue;
                }
                if let Some(max) = config.max_resends {
                    if restarts >= max {
                        return Err(TransferError::TooManyResends(max));
                    }
                }

                tracing::debug!("Restarting {} from chunk {}", digest.short(), index);
                streamer.restart(index).await;
                restarts += 1;
                last_resend = Some((index, Instant::now()));
            }
            other => tracing::debug!("Ignoring {} during send of {}", other.tag(), digest.short()),
        }
    }

    Ok(SendReport {
        digest,
        chunks: total,
        restarts,
    })
}

fn is_debounced(last: Option<(u32, Instant)>, index: u32, window: Duration) -> bool {
    matches!(last, Some((last_index, at)) if last_index == index && at.elapsed() < window)
}

struct StreamTask {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), TransportError>>,
}

impl StreamTask {
    /// Cancel and wait for the task to finish
    async fn stop(self) -> Result<(), TransportError> {
        self.cancel.cancel();
        self.handle
            .await
            .map_err(|e| TransportError::Other(format!("streaming task failed: {e}")))?
    }
}

/// Restartable chunk stream for one body
struct ChunkStreamer {
    link: PeerLink,
    content: Arc<[u8]>,
    digest: Digest,
    total: u32,
    chunker: FileChunker,
    pacing: Duration,
    running: Option<StreamTask>,
    completed: bool,
}

impl ChunkStreamer {
    fn new(
        link: PeerLink,
        content: Arc<[u8]>,
        digest: Digest,
        total: u32,
        config: &TransferConfig,
    ) -> Self {
        Self {
            link,
            content,
            digest,
            total,
            chunker: FileChunker::with_chunk_size(config.chunk_size),
            pacing: config.pacing,
            running: None,
            completed: false,
        }
    }

    /// Replace the running stream with one starting at `start`.
    ///
    /// A send error in the replaced stream is logged and dropped: the new
    /// stream covers every chunk it may have missed. Returns false without
    /// sending anything once the transfer is complete.
    async fn restart(&mut self, start: u32) -> bool {
        if self.completed {
            tracing::debug!("Transfer {} already complete, not restarting", self.digest.short());
            return false;
        }
        self.stop_running().await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream_chunks(
            self.link.clone(),
            self.content.clone(),
            self.digest,
            self.chunker,
            start,
            self.total,
            self.pacing,
            cancel.clone(),
        ));
        self.running = Some(StreamTask { cancel, handle });
        true
    }

    /// Stop streaming for good
    async fn complete(&mut self) {
        self.completed = true;
        self.stop_running().await;
    }

    async fn stop_running(&mut self) {
        if let Some(task) = self.running.take() {
            if let Err(e) = task.stop().await {
                tracing::warn!(
                    "Stream of {} to {} failed: {}",
                    self.digest.short(),
                    self.link.peer(),
                    e
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn stream_chunks(
    link: PeerLink,
    content: Arc<[u8]>,
    digest: Digest,
    chunker: FileChunker,
    start: u32,
    total: u32,
    pacing: Duration,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    for index in start..total {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let Some(payload) = chunker.chunk(&content, u64::from(index)) else {
            break;
        };

        link.send_encoded(encode_chunk(&digest, index, payload))
            .await?;
        tracing::trace!("Sent chunk {}/{} of {}", index, total, digest.short());

        if index + 1 < total {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(pacing) => {}
            }
        }
    }
    Ok(())
}
