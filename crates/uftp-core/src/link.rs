//! Send half of a peer connection.

use crate::checksum;
use crate::frame::Frame;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use uftp_transport::{Transport, TransportError};

/// Sends sealed frames to one peer address.
///
/// Cheap to clone; all clones share the transport.
#[derive(Clone)]
pub struct PeerLink {
    transport: Arc<dyn Transport>,
    peer: SocketAddr,
}

impl PeerLink {
    /// Bind `transport` to `peer`
    pub fn new(transport: Arc<dyn Transport>, peer: SocketAddr) -> Self {
        Self { transport, peer }
    }

    /// Destination address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Encode, seal and send `frame`
    ///
    /// # Errors
    /// Returns the transport's send error.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        tracing::trace!("-> {} {}", self.peer, frame.tag());
        self.send_encoded(frame.encode()).await
    }

    /// Seal and send an already encoded frame body
    ///
    /// # Errors
    /// Returns the transport's send error.
    pub async fn send_encoded(&self, body: Vec<u8>) -> Result<(), TransportError> {
        let datagram = checksum::seal(body);
        self.transport.send_to(&datagram, self.peer).await?;
        Ok(())
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink").field("peer", &self.peer).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uftp_transport::MemoryNetwork;

    #[tokio::test]
    async fn test_send_frame_is_sealed() {
        let net = MemoryNetwork::new();
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let sender = Arc::new(net.bind(a).unwrap());
        let receiver = net.bind(b).unwrap();

        let link = PeerLink::new(sender, b);
        assert_eq!(link.peer(), b);
        link.send_frame(&Frame::Pwd).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, a);
        assert_eq!(checksum::open(&buf[..len]).unwrap(), b"PWD");
    }
}
