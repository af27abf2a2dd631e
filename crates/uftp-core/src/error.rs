//! Error types for the UFTP core protocol.
//!
//! Errors local to a single datagram ([`FrameError`]) never travel further
//! than a log line. Only transfer outcomes ([`TransferError`]) and session
//! failures ([`SessionError`]) reach the caller.

use crate::session::SessionState;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;
use uftp_files::{Digest, DigestError, ReassemblyError};
use uftp_transport::TransportError;

/// Core protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Frame decoding error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// File transfer error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Session error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

/// Frame-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Datagram or frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Checksum trailer does not match the body
    #[error("wire checksum mismatch")]
    ChecksumMismatch,

    /// Tag is not part of the protocol
    #[error("unknown frame tag: {0:?}")]
    UnknownTag(String),

    /// A required field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Digest field is malformed
    #[error("invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),

    /// Numeric field is malformed
    #[error("invalid number in field: {0}")]
    InvalidNumber(&'static str),

    /// Text field is not UTF-8
    #[error("invalid UTF-8 in field: {0}")]
    InvalidUtf8(&'static str),

    /// Declared payload length exceeds the bytes present
    #[error("payload length {declared} exceeds {available} available bytes")]
    PayloadOverflow {
        /// Length from the chunk header
        declared: usize,
        /// Bytes actually present after the header
        available: usize,
    },
}

/// Transfer-level errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// Reassembled content does not hash to the announced digest
    #[error("integrity verification failed for {digest}")]
    IntegrityFailure {
        /// Announced digest
        digest: Digest,
    },

    /// The receiver reported an integrity failure
    #[error("peer rejected transfer {digest}")]
    RejectedByPeer {
        /// Digest of the rejected transfer
        digest: Digest,
    },

    /// No progress within the stall timeout
    #[error("transfer stalled for {0:?}")]
    Stalled(Duration),

    /// Resend limit reached
    #[error("gave up after {0} resends")]
    TooManyResends(u32),

    /// Received byte count differs from the announced size
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Announced size
        expected: u64,
        /// Bytes received
        actual: u64,
    },

    /// Chunk bookkeeping went wrong
    #[error("reassembly error: {0}")]
    Reassembly(ReassemblyError),

    /// File has more chunks than a u32 index can address
    #[error("file too large: {0} chunks")]
    TooLarge(u64),

    /// The peer's inbound queue closed (endpoint shut down)
    #[error("inbound queue closed")]
    Closed,

    /// Transport failure while sending
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ReassemblyError> for TransferError {
    fn from(e: ReassemblyError) -> Self {
        match e {
            ReassemblyError::SizeMismatch { expected, actual } => {
                Self::SizeMismatch { expected, actual }
            }
            other => Self::Reassembly(other),
        }
    }
}

/// Session-level errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer answered with an `ERR` frame
    #[error("remote error: {0}")]
    Remote(String),

    /// No answer after every retry
    #[error("no response to {request} after {attempts} attempts")]
    Timeout {
        /// Request tag
        request: &'static str,
        /// Attempts made
        attempts: u32,
    },

    /// A frame arrived that makes no sense at this point
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(Cow<'static, str>),

    /// The endpoint or queue closed
    #[error("session closed")]
    Closed,

    /// Illegal session state change
    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state
        from: SessionState,
        /// Requested state
        to: SessionState,
    },

    /// File transfer failed
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type defaulting to the core [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;
