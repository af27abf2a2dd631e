//! Async UDP transport.
//!
//! The real datagram channel used by the `uftp` binary: a tokio `UdpSocket`
//! created through socket2 so the kernel buffers can be enlarged before bind.

use crate::SOCKET_BUFFER_SIZE;
use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::Notify;

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

/// Async UDP transport using tokio.
///
/// Cheap to clone; clones share the socket, the counters and the closed flag.
/// Closing wakes a task blocked in `recv_from`.
#[derive(Clone)]
pub struct AsyncUdpTransport {
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    counters: Arc<Counters>,
}

impl AsyncUdpTransport {
    /// Bind a UDP socket to `addr`.
    ///
    /// Use port 0 for an ephemeral port.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created,
    /// configured or bound.
    pub async fn bind<A: Into<SocketAddr>>(addr: A) -> TransportResult<Self> {
        let addr = addr.into();

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let bind_err = |e: std::io::Error| TransportError::BindFailed(format!("{addr}: {e}"));

        let socket =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(bind_err)?;
        socket
            .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(bind_err)?;
        socket
            .set_send_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;

        tracing::debug!("UDP transport bound to {}", addr);
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already-bound tokio socket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            counters: Arc::new(Counters::default()),
        }
    }
}

#[async_trait]
impl Transport for AsyncUdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        match self.socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.counters
                    .bytes_sent
                    .fetch_add(sent as u64, Ordering::Relaxed);
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        tokio::select! {
            _ = notified => Err(TransportError::Closed),
            received = self.socket.recv_from(buf) => match received {
                Ok((size, addr)) => {
                    self.counters
                        .bytes_received
                        .fetch_add(size as u64, Ordering::Relaxed);
                    self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
                    Ok((size, addr))
                }
                Err(e) => {
                    self.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                    Err(TransportError::Io(e))
                }
            },
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn stats(&self) -> TransportStats {
        let c = &self.counters;
        TransportStats {
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            packets_received: c.packets_received.load(Ordering::Relaxed),
            send_errors: c.send_errors.load(Ordering::Relaxed),
            recv_errors: c.recv_errors.load(Ordering::Relaxed),
        }
    }
}
