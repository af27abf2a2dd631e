//! Per-datagram wire checksum.
//!
//! Every datagram carries the 16-byte MD5 of its frame body as a trailer.
//! This only catches corruption in transit; end-to-end integrity is the
//! SHA-256 content digest.

use crate::CHECKSUM_SIZE;
use crate::error::FrameError;
use md5::{Digest as _, Md5};

/// Compute the trailer for `body`
pub fn compute(body: &[u8]) -> [u8; CHECKSUM_SIZE] {
    Md5::digest(body).into()
}

/// Append the checksum trailer to an encoded frame
pub fn seal(mut frame: Vec<u8>) -> Vec<u8> {
    let trailer = compute(&frame);
    frame.extend_from_slice(&trailer);
    frame
}

/// Validate and strip the trailer, returning the frame body
///
/// # Errors
/// `TooShort` when the datagram cannot hold a trailer, `ChecksumMismatch`
/// when the trailer does not match.
pub fn open(datagram: &[u8]) -> Result<&[u8], FrameError> {
    if datagram.len() < CHECKSUM_SIZE {
        return Err(FrameError::TooShort {
            expected: CHECKSUM_SIZE,
            actual: datagram.len(),
        });
    }

    let (body, trailer) = datagram.split_at(datagram.len() - CHECKSUM_SIZE);
    if compute(body).as_slice() != trailer {
        return Err(FrameError::ChecksumMismatch);
    }
    Ok(body)
}
