//! Inbound demultiplexer.
//!
//! One background task owns the only read path on a transport. Each datagram
//! has its checksum trailer validated and stripped, then the frame body is
//! pushed onto the queue for its source address. Queues are created on first
//! contact and announced through [`Endpoint::accept`]. The task never looks
//! inside a frame and never waits on a consumer.

use crate::error::FrameError;
use crate::frame::Frame;
use crate::link::PeerLink;
use crate::{RECV_BUFFER_SIZE, checksum};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uftp_transport::{Transport, TransportError};

type Registry = DashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>;
type Arrival = (SocketAddr, InboundQueue);

/// Errors waiting on an [`InboundQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Nothing arrived in time
    #[error("timed out waiting for a frame")]
    Timeout,

    /// The demultiplexer stopped
    #[error("inbound queue closed")]
    Closed,
}

/// Ordered frames from one remote address.
///
/// Holds checksum-validated frame bodies in arrival order. Only the
/// demultiplexer writes to it.
#[derive(Debug)]
pub struct InboundQueue {
    peer: SocketAddr,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl InboundQueue {
    /// Address this queue collects frames from
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Next frame body, or `None` once the demultiplexer has stopped
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next frame body, waiting at most `timeout`
    ///
    /// # Errors
    /// `QueueError::Timeout` if nothing arrives, `QueueError::Closed` if the
    /// demultiplexer stopped.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>, QueueError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(body)) => Ok(body),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Timeout),
        }
    }

    /// Next decodable frame, or `None` once the demultiplexer has stopped.
    ///
    /// Undecodable bodies are logged and skipped.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        while let Some(body) = self.rx.recv().await {
            match Frame::decode(&body) {
                Ok(frame) => return Some(frame),
                Err(e) => log_undecodable(self.peer, &e),
            }
        }
        None
    }

    /// Next decodable frame within `timeout`.
    ///
    /// Skipped undecodable bodies do not extend the deadline.
    ///
    /// # Errors
    /// As [`InboundQueue::recv_timeout`].
    pub async fn recv_frame(&mut self, timeout: Duration) -> Result<Frame, QueueError> {
        match tokio::time::timeout(timeout, self.next_frame()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Timeout),
        }
    }

    /// Discard everything currently buffered, returning how many bodies
    /// were dropped
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

fn log_undecodable(peer: SocketAddr, error: &FrameError) {
    tracing::warn!("Undecodable frame from {}: {}", peer, error);
}

/// Owning handle for a transport and its demultiplexer task
pub struct Endpoint {
    transport: Arc<dyn Transport>,
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    arrivals: mpsc::UnboundedReceiver<Arrival>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), TransportError>>>,
}

impl Endpoint {
    /// Spawn the demultiplexer for `transport`.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns `TransportError` if the local address cannot be read.
    pub fn start(transport: Arc<dyn Transport>) -> Result<Self, TransportError> {
        let local_addr = transport.local_addr()?;
        let registry = Arc::new(Registry::new());
        let dropped = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let (arrivals_tx, arrivals) = mpsc::unbounded_channel();

        let task = tokio::spawn(demultiplex(
            transport.clone(),
            registry.clone(),
            arrivals_tx,
            dropped.clone(),
            cancel.clone(),
        ));

        tracing::debug!("Endpoint started on {}", local_addr);

        Ok(Self {
            transport,
            local_addr,
            registry,
            arrivals,
            dropped,
            cancel,
            task: Some(task),
        })
    }

    /// Local address of the underlying transport
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the underlying transport
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Send half for `peer`
    pub fn link(&self, peer: SocketAddr) -> PeerLink {
        PeerLink::new(self.transport.clone(), peer)
    }

    /// Next newly seen peer and its queue, or `None` once the
    /// demultiplexer has stopped
    pub async fn accept(&mut self) -> Option<(SocketAddr, InboundQueue)> {
        self.arrivals.recv().await
    }

    /// Datagrams dropped for a bad checksum trailer
    pub fn dropped_datagrams(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait for the demultiplexer to stop on its own.
    ///
    /// # Errors
    /// Returns the transport error that ended the task, if any.
    pub async fn closed(&mut self) -> Result<(), TransportError> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| TransportError::Other(format!("demultiplexer task failed: {e}")))?,
            None => Ok(()),
        }
    }

    /// Stop the demultiplexer and wait for it to finish.
    ///
    /// Every queue and the arrivals channel observe closure afterwards.
    ///
    /// # Errors
    /// Returns the transport error that ended the task, if it failed before
    /// the stop request.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        self.cancel.cancel();
        self.closed().await
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.registry.len())
            .field("dropped", &self.dropped_datagrams())
            .finish_non_exhaustive()
    }
}

async fn demultiplex(
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    arrivals: mpsc::UnboundedSender<Arrival>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    let result = loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            received = transport.recv_from(&mut buf) => received,
        };

        let (len, from) = match received {
            Ok(received) => received,
            Err(TransportError::Closed) if cancel.is_cancelled() => break Ok(()),
            Err(e) => {
                tracing::warn!("Demultiplexer receive failed: {}", e);
                break Err(e);
            }
        };

        match checksum::open(&buf[..len]) {
            Ok(body) => route(&registry, &arrivals, from, body.to_vec()),
            Err(e) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Dropped {} byte datagram from {}: {}", len, from, e);
            }
        }
    };

    // Dropping the senders closes every queue.
    registry.clear();
    tracing::debug!("Demultiplexer stopped");
    result
}

fn route(
    registry: &Registry,
    arrivals: &mpsc::UnboundedSender<Arrival>,
    from: SocketAddr,
    body: Vec<u8>,
) {
    let body = match registry.get(&from) {
        Some(queue) => match queue.send(body) {
            Ok(()) => return,
            Err(mpsc::error::SendError(body)) => body,
        },
        None => body,
    };

    // First contact, or the previous consumer went away.
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(body);
    registry.insert(from, tx);

    tracing::debug!("New peer queue for {}", from);
    if arrivals.send((from, InboundQueue { peer: from, rx })).is_err() {
        tracing::trace!("No acceptor for {}", from);
    }
}
