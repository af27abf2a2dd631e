//! # UFTP Transport
//!
//! Datagram transport layer for the UFTP file-transfer protocol.
//!
//! The protocol runs on top of an unreliable, unordered datagram channel. This
//! crate provides:
//! - The [`Transport`] trait that the rest of the stack is written against
//! - [`AsyncUdpTransport`], a tokio UDP socket tuned with socket2
//! - [`MemoryNetwork`], an in-process network with a per-datagram fault hook
//!   for reproducing loss, reordering and corruption

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod transport;
pub mod udp_async;

pub use memory::{Delivery, MemoryNetwork, MemoryTransport};
pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp_async::AsyncUdpTransport;

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Socket buffer size requested for UDP sockets (send and receive)
pub const SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;
