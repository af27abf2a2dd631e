//! Fault hooks for the memory network
//!
//! Helpers that look inside sealed datagrams so a test can lose, delay or
//! tamper with specific frames, and record what crossed the wire.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uftp_core::{CHECKSUM_SIZE, CHUNK_HEADER_SIZE, Frame, checksum};
use uftp_transport::Delivery;

/// Offset of the big-endian chunk index inside a chunk frame
const INDEX_OFFSET: usize = 5 + 32;

/// Chunk index of a sealed chunk datagram, if it is one
pub fn chunk_index(datagram: &[u8]) -> Option<u32> {
    if !datagram.starts_with(b"FILE\0") || datagram.len() < CHUNK_HEADER_SIZE + CHECKSUM_SIZE {
        return None;
    }
    let bytes: [u8; 4] = datagram[INDEX_OFFSET..INDEX_OFFSET + 4].try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Decode a sealed datagram the way an endpoint would
pub fn peek(datagram: &[u8]) -> Option<Frame> {
    let body = checksum::open(datagram).ok()?;
    Frame::decode(body).ok()
}

/// Flip one payload byte of a chunk and re-seal it with a valid trailer
pub fn tamper_payload(datagram: &mut Vec<u8>) {
    let body_len = datagram.len() - CHECKSUM_SIZE;
    let mut body = datagram[..body_len].to_vec();
    if let Some(byte) = body.get_mut(CHUNK_HEADER_SIZE) {
        *byte ^= 0xFF;
    }
    *datagram = checksum::seal(body);
}

/// One-shot trigger shared between a hook and the test
#[derive(Clone, Default)]
pub struct Once {
    fired: Arc<AtomicBool>,
}

impl Once {
    /// Create an unfired trigger
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time only
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    /// Whether the trigger has fired
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Frames observed on the wire, in delivery-hook order
#[derive(Clone, Default)]
pub struct WireLog {
    frames: Arc<Mutex<Vec<(SocketAddr, Frame)>>>,
}

impl WireLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the frame in `datagram`, sent by `from`
    pub fn record(&self, from: SocketAddr, datagram: &[u8]) {
        if let Some(frame) = peek(datagram) {
            self.frames.lock().unwrap().push((from, frame));
        }
    }

    /// Resend indices requested by `from`
    pub fn resends_from(&self, from: SocketAddr) -> Vec<u32> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(sender, _)| *sender == from)
            .filter_map(|(_, frame)| match frame {
                Frame::Resend { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Number of `FAIL` frames sent by `from`
    pub fn failures_from(&self, from: SocketAddr) -> usize {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(sender, frame)| *sender == from && matches!(frame, Frame::Fail { .. }))
            .count()
    }
}

/// Hook that loses the first chunk `index` sent by `from` and logs control
/// frames
pub fn drop_chunk_once(
    from: SocketAddr,
    index: u32,
    log: WireLog,
) -> impl Fn(SocketAddr, SocketAddr, &mut Vec<u8>) -> Delivery + Send + Sync + 'static {
    let once = Once::new();
    move |src, _dst, datagram| {
        if src == from && chunk_index(datagram) == Some(index) && once.fire() {
            return Delivery::Drop;
        }
        if chunk_index(datagram).is_none() {
            log.record(src, datagram);
        }
        Delivery::Deliver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uftp_core::frame::encode_chunk;
    use uftp_files::hasher;

    #[test]
    fn test_chunk_index_of_sealed_chunk() {
        let digest = hasher::hash_content(b"abc");
        let datagram = checksum::seal(encode_chunk(&digest, 7, b"payload"));
        assert_eq!(chunk_index(&datagram), Some(7));

        let control = checksum::seal(Frame::Pwd.encode());
        assert_eq!(chunk_index(&control), None);
    }

    #[test]
    fn test_tamper_keeps_trailer_valid() {
        let digest = hasher::hash_content(b"abc");
        let mut datagram = checksum::seal(encode_chunk(&digest, 0, b"payload"));
        tamper_payload(&mut datagram);

        let Some(Frame::FileChunk(chunk)) = peek(&datagram) else {
            panic!("tampered chunk no longer decodes");
        };
        assert_ne!(chunk.payload, b"payload".to_vec());
        assert_eq!(chunk.payload.len(), 7);
    }

    #[test]
    fn test_once_fires_once() {
        let once = Once::new();
        assert!(!once.fired());
        assert!(once.fire());
        assert!(!once.fire());
        assert!(once.fired());
    }
}
