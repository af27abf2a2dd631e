//! Transport trait shared by every datagram backend.
//!
//! Everything above this layer (demultiplexer, sender, receiver) only sees
//! `Arc<dyn Transport>`, so the UDP socket and the in-memory network are
//! interchangeable.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport has been closed
    #[error("Transport is closed")]
    Closed,

    /// Binding the local address failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Backend-specific failure
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Unreliable datagram channel.
///
/// No delivery, ordering or duplication guarantees are made. `send_to` takes
/// `&self` and must be safe to call from several tasks at once; `recv_from`
/// is expected to have a single caller (the inbound demultiplexer).
///
/// # Examples
///
/// ```no_run
/// use uftp_transport::{AsyncUdpTransport, Transport};
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: SocketAddr = "127.0.0.1:28889".parse()?;
/// let transport = AsyncUdpTransport::bind(addr).await?;
///
/// transport.send_to(b"PWD", "127.0.0.1:28888".parse()?).await?;
///
/// let mut buf = vec![0u8; 2048];
/// let (size, from) = transport.recv_from(&mut buf).await?;
/// println!("{} bytes from {}", size, from);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `addr`, returning the number of bytes sent.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` after [`Transport::close`], or the
    /// backend error otherwise.
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize>;

    /// Receive one datagram into `buf`.
    ///
    /// Returns the datagram length and the sender's address.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the transport is closed.
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Local address this transport is bound to.
    ///
    /// # Errors
    /// Returns `TransportError` if the address cannot be determined.
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Close the transport. Subsequent operations fail with `Closed`.
    ///
    /// # Errors
    /// Returns `TransportError` if closing fails.
    async fn close(&self) -> TransportResult<()>;

    /// Whether [`Transport::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Counters for datagrams and bytes moved through this transport.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Datagrams sent
    pub packets_sent: u64,
    /// Datagrams received
    pub packets_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
    }

    /// Record a successful receive
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.packets_received += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_stats_accumulate() {
        let mut stats = TransportStats::new();
        for i in 1..=4 {
            stats.record_send(2048);
            assert_eq!(stats.packets_sent, i);
        }
        stats.record_recv(61);

        assert_eq!(stats.bytes_sent, 4 * 2048);
        assert_eq!(stats.bytes_received, 61);
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.send_errors, 0);
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "Transport is closed");
        assert!(
            TransportError::BindFailed("0.0.0.0:28888".into())
                .to_string()
                .contains("Failed to bind")
        );
        assert_eq!(
            TransportError::Other("boom".into()).to_string(),
            "Transport error: boom"
        );
    }

    #[test]
    fn test_transport_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            TransportError::from(io_err),
            TransportError::Io(_)
        ));
    }
}
