//! Whole-file integrity check before a body is accepted.

use crate::error::TransferError;
use crate::frame::Frame;
use crate::link::PeerLink;
use uftp_files::{Digest, hasher};

/// Accept `content` only if it hashes to `digest`.
///
/// On mismatch the peer is told with `FAIL` and the content must be
/// discarded.
///
/// # Errors
/// `TransferError::IntegrityFailure` on mismatch, or the transport error
/// if the `FAIL` frame cannot be sent.
pub async fn verify_or_reject(
    link: &PeerLink,
    content: &[u8],
    digest: &Digest,
) -> Result<(), TransferError> {
    if hasher::verify(content, digest) {
        tracing::debug!("Verified {} bytes for {}", content.len(), digest.short());
        return Ok(());
    }

    tracing::warn!(
        "Integrity check failed for {} from {}",
        digest.short(),
        link.peer()
    );
    link.send_frame(&Frame::Fail { digest: *digest }).await?;
    Err(TransferError::IntegrityFailure { digest: *digest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::Endpoint;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use uftp_transport::MemoryNetwork;

    #[tokio::test]
    async fn test_mismatch_sends_fail() {
        let net = MemoryNetwork::new();
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let local = Endpoint::start(Arc::new(net.bind(a).unwrap())).unwrap();
        let mut remote = Endpoint::start(Arc::new(net.bind(b).unwrap())).unwrap();

        let body = vec![9u8; 5000];
        let digest = hasher::hash_content(&body);
        let link = local.link(b);

        verify_or_reject(&link, &body, &digest).await.unwrap();

        let mut corrupted = body.clone();
        corrupted[100] ^= 0xff;
        let err = verify_or_reject(&link, &corrupted, &digest)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::IntegrityFailure { digest: d } if d == digest));

        let (_, mut queue) = remote.accept().await.unwrap();
        assert_eq!(
            queue.recv_frame(Duration::from_secs(1)).await.unwrap(),
            Frame::Fail { digest }
        );
    }
}
