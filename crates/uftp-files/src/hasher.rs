//! SHA-256 content digests.
//!
//! A [`Digest`] identifies a file body end to end and tags every chunk of the
//! transfer that carries it.

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// Digest length in bytes
pub const DIGEST_SIZE: usize = 32;

/// Length of the hex encoding used on control frames
pub const DIGEST_HEX_LEN: usize = DIGEST_SIZE * 2;

/// Errors parsing a digest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    /// Wrong number of bytes or hex characters
    #[error("digest must be {DIGEST_SIZE} bytes, got {0}")]
    Length(usize),

    /// Non-hex character in the encoding
    #[error("invalid hex digest: {0}")]
    Hex(String),
}

/// SHA-256 digest of a file body
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// Wrap raw digest bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from a slice that must be exactly [`DIGEST_SIZE`] long
    ///
    /// # Errors
    /// Returns `DigestError::Length` for any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestError> {
        let raw: [u8; DIGEST_SIZE] = bytes
            .try_into()
            .map_err(|_| DigestError::Length(bytes.len()))?;
        Ok(Self(raw))
    }

    /// Parse the 64-character hex encoding (either case)
    ///
    /// # Errors
    /// Returns `DigestError` on bad length or characters.
    pub fn from_hex(hex_str: &str) -> Result<Self, DigestError> {
        if hex_str.len() != DIGEST_HEX_LEN {
            return Err(DigestError::Length(hex_str.len() / 2));
        }
        let mut raw = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(hex_str, &mut raw).map_err(|e| DigestError::Hex(e.to_string()))?;
        Ok(Self(raw))
    }

    /// Raw digest bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Hash an in-memory file body
#[must_use]
pub fn hash_content(data: &[u8]) -> Digest {
    Digest(Sha256::digest(data).into())
}

/// Whole-file integrity check
#[must_use]
pub fn verify(data: &[u8], expected: &Digest) -> bool {
    hash_content(data) == *expected
}
