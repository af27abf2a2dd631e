//! Transfer and session tuning.

use crate::MAX_CHUNK_SIZE;
use crate::error::Error;
use std::time::Duration;
use uftp_files::DEFAULT_CHUNK_SIZE;

/// Tuning for chunked transfers and request/response exchanges
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk payload size in bytes
    pub chunk_size: usize,

    /// Pause between consecutive chunk sends
    pub pacing: Duration,

    /// Window in which a repeated resend request for the same index is ignored
    pub resend_debounce: Duration,

    /// Pause after a sequence gap before reading on
    pub resend_pause: Duration,

    /// How long the receiver waits for the next chunk before asking again
    pub chunk_timeout: Duration,

    /// Give up when nothing useful arrives for this long
    pub stall_timeout: Option<Duration>,

    /// Give up after this many resend requests (sender: honoured restarts)
    pub max_resends: Option<u32>,

    /// Wait for a reply to a control request
    pub request_timeout: Duration,

    /// Attempts for idempotent control requests
    pub request_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pacing: Duration::from_millis(1),
            resend_debounce: Duration::from_millis(50),
            resend_pause: Duration::from_millis(10),
            chunk_timeout: Duration::from_millis(500),
            stall_timeout: Some(Duration::from_secs(30)),
            max_resends: None,
            request_timeout: Duration::from_secs(2),
            request_retries: 3,
        }
    }
}

impl TransferConfig {
    /// Check the values are usable
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` describing the first bad value.
    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be non-zero".into()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig(
                format!("chunk_size must be at most {MAX_CHUNK_SIZE} bytes").into(),
            ));
        }
        if self.chunk_timeout.is_zero() {
            return Err(Error::InvalidConfig("chunk_timeout must be non-zero".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "request_timeout must be non-zero".into(),
            ));
        }
        if self.request_retries == 0 {
            return Err(Error::InvalidConfig(
                "request_retries must be at least 1".into(),
            ));
        }
        if let Some(stall) = self.stall_timeout {
            if stall < self.chunk_timeout {
                return Err(Error::InvalidConfig(
                    "stall_timeout must not be shorter than chunk_timeout".into(),
                ));
            }
        }
        Ok(())
    }
}
