//! # UFTP Core
//!
//! Core protocol implementation for UFTP, a file-transfer protocol for one
//! client and one server over an unreliable datagram transport.
//!
//! This crate provides:
//! - Frame encoding and decoding, with a per-datagram MD5 checksum trailer
//! - The inbound demultiplexer: the single socket reader feeding one queue
//!   per remote address
//! - Reliable chunked transfer: a restartable, paced sender and a strict
//!   in-order receiver with gap detection and resend requests
//! - Whole-file SHA-256 verification before anything is accepted
//! - Server and client sessions (`pwd`, `ls`, `cd`, `get`, `put`, `exit`)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Server / Client sessions                       │
//! │        (command dispatch, working directory, get / put)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │             Chunked sender  │  Chunked receiver                  │
//! │   (paced stream, restarts)  │  (in-order, resend on gap)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │     Endpoint: demultiplexer task → per-address inbound queues    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              Frames + MD5 trailer over a Transport               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod config;
pub mod demux;
pub mod error;
pub mod frame;
pub mod link;
pub mod session;
pub mod transfer;

pub use config::TransferConfig;
pub use demux::{Endpoint, InboundQueue, QueueError};
pub use error::{Error, FrameError, SessionError, TransferError};
pub use frame::{FileChunk, Frame, FrameTag};
pub use link::PeerLink;
pub use session::{Client, PeerSession, Server, SessionState};
pub use transfer::{
    SendReport, receive_checked, receive_file, receive_verified, send_announced, send_file,
};
pub use uftp_files::Digest;

/// Port the server listens on
pub const DEFAULT_SERVER_PORT: u16 = 28888;

/// Port the client listens on
pub const DEFAULT_CLIENT_PORT: u16 = 28889;

/// Practical datagram size the default chunk size is derived from
pub const DEFAULT_DATAGRAM_SIZE: usize = 2048;

/// Size of the buffer the demultiplexer receives into
pub const RECV_BUFFER_SIZE: usize = 65_536;

/// Chunk frame header: `FILE\0`, 32-byte digest, u32 index, u32 length
pub const CHUNK_HEADER_SIZE: usize = 5 + uftp_files::hasher::DIGEST_SIZE + 4 + 4;

/// Checksum trailer appended to every datagram
pub const CHECKSUM_SIZE: usize = 16;

/// Largest chunk payload that still fits a UDP datagram
pub const MAX_CHUNK_SIZE: usize =
    uftp_transport::MAX_DATAGRAM_SIZE - CHUNK_HEADER_SIZE - CHECKSUM_SIZE;

const _: () = assert!(
    uftp_files::DEFAULT_CHUNK_SIZE + CHUNK_HEADER_SIZE + CHECKSUM_SIZE == DEFAULT_DATAGRAM_SIZE
);
