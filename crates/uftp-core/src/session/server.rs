//! Server role: one peer session at a time over a shared endpoint.

use super::SessionState;
use crate::config::TransferConfig;
use crate::demux::{Endpoint, InboundQueue};
use crate::error::{SessionError, TransferError};
use crate::frame::Frame;
use crate::link::PeerLink;
use crate::transfer::{receive_checked, send_announced};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uftp_files::{Digest, FileMetadata};

/// File server.
///
/// Peers that show up while a session is running wait in the endpoint's
/// arrivals channel until the server is idle again.
pub struct Server {
    endpoint: Endpoint,
    root: PathBuf,
    config: TransferConfig,
    shutdown: CancellationToken,
}

impl Server {
    /// Serve `root` over `endpoint`.
    ///
    /// # Errors
    /// Returns `SessionError::Io` if `root` cannot be resolved.
    pub fn new(
        endpoint: Endpoint,
        root: impl AsRef<Path>,
        config: TransferConfig,
    ) -> Result<Self, SessionError> {
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            )));
        }

        Ok(Self {
            endpoint,
            root,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the server receives on
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Directory every session starts in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Token that stops [`Server::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve peers until shutdown or until the endpoint stops.
    ///
    /// # Errors
    /// Returns the transport error that stopped the endpoint, if any.
    pub async fn run(mut self) -> Result<(), SessionError> {
        tracing::info!(
            "Serving {} on {}",
            self.root.display(),
            self.endpoint.local_addr()
        );

        loop {
            let arrival = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                arrival = self.endpoint.accept() => arrival,
            };
            let Some((peer, queue)) = arrival else {
                break;
            };

            tracing::info!("Session with {} started", peer);
            let mut session = PeerSession::new(
                self.endpoint.link(peer),
                queue,
                self.root.clone(),
                self.config.clone(),
            );
            match session.run(&self.shutdown).await {
                Ok(()) => tracing::info!("Session with {} ended", peer),
                Err(e) => tracing::warn!("Session with {} ended: {}", peer, e),
            }
        }

        tracing::info!("Server on {} stopping", self.endpoint.local_addr());
        self.endpoint.shutdown().await?;
        Ok(())
    }
}

/// Server side of one peer connection
pub struct PeerSession {
    link: PeerLink,
    queue: InboundQueue,
    cwd: PathBuf,
    state: SessionState,
    config: TransferConfig,
}

impl PeerSession {
    /// Session for the peer behind `link`, reading from its `queue`,
    /// starting in `cwd`
    pub fn new(link: PeerLink, queue: InboundQueue, cwd: PathBuf, config: TransferConfig) -> Self {
        Self {
            link,
            queue,
            cwd,
            state: SessionState::AwaitingConnect,
            config,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current working directory
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Dispatch frames until `EXIT`, queue closure or `shutdown`.
    ///
    /// Handler failures are logged and the session carries on.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the queue closes mid-session.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        let result = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                next = self.queue.next_frame() => next,
            };
            let Some(frame) = next else {
                break Err(SessionError::Closed);
            };

            match self.handle(frame).await {
                Ok(()) if self.state == SessionState::Idle => break Ok(()),
                Ok(()) => {}
                Err(SessionError::Closed | SessionError::Transfer(TransferError::Closed)) => {
                    break Err(SessionError::Closed);
                }
                Err(e) => tracing::warn!("Handler error for {}: {}", self.link.peer(), e),
            }
        };

        if self.state != SessionState::Idle {
            self.state.transition_to(SessionState::Idle)?;
        }
        result
    }

    async fn handle(&mut self, frame: Frame) -> Result<(), SessionError> {
        if self.state == SessionState::AwaitingConnect {
            if frame == Frame::Connect {
                self.state.transition_to(SessionState::Active)?;
                tracing::info!("{} connected", self.link.peer());
                self.link.send_frame(&Frame::Ack { digest: None }).await?;
            } else {
                tracing::debug!("Ignoring {} before CONNECT from {}", frame.tag(), self.link.peer());
            }
            return Ok(());
        }

        match frame {
            Frame::Connect => self.link.send_frame(&Frame::Ack { digest: None }).await?,
            Frame::Exit => {
                tracing::info!("{} sent EXIT", self.link.peer());
                self.state.transition_to(SessionState::Idle)?;
            }
            Frame::Pwd => self.reply(Ok(self.cwd.display().to_string())).await?,
            Frame::Ls => {
                let listing = list_dir(&self.cwd).await;
                self.reply(listing).await?;
            }
            Frame::Cd { path } => {
                let changed = self.change_dir(&path).await;
                self.reply(changed).await?;
            }
            Frame::Get { path } => self.handle_get(&path).await?,
            Frame::Put {
                filename,
                digest,
                size,
            } => self.handle_put(&filename, digest, size).await?,
            Frame::FileChunk(chunk) => {
                tracing::trace!("Ignoring chunk {} outside a transfer", chunk.index);
            }
            other @ (Frame::GetReady { .. }
            | Frame::Resend { .. }
            | Frame::Ack { .. }
            | Frame::Fail { .. }
            | Frame::Reply { .. }
            | Frame::Error { .. }) => {
                tracing::debug!("Ignoring stray {} from {}", other.tag(), self.link.peer());
            }
        }
        Ok(())
    }

    async fn reply(&self, result: std::io::Result<String>) -> Result<(), SessionError> {
        let frame = match result {
            Ok(body) => Frame::Reply { body },
            Err(e) => Frame::Error {
                message: e.to_string(),
            },
        };
        self.link.send_frame(&frame).await?;
        Ok(())
    }

    async fn change_dir(&mut self, path: &str) -> std::io::Result<String> {
        let target = tokio::fs::canonicalize(self.cwd.join(path)).await?;
        if !tokio::fs::metadata(&target).await?.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{path}: not a directory"),
            ));
        }
        tracing::debug!("cwd {} -> {}", self.cwd.display(), target.display());
        self.cwd = target;
        Ok(self.cwd.display().to_string())
    }

    async fn handle_get(&mut self, path: &str) -> Result<(), SessionError> {
        let (name, content) = match read_regular_file(&self.cwd.join(path)).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!("GET {} refused: {}", path, e);
                return self.reply(Err(e)).await;
            }
        };

        let meta = FileMetadata::from_content(name, &content, self.config.chunk_size);
        self.link
            .send_frame(&Frame::GetReady {
                filename: meta.name.clone(),
                digest: meta.digest,
                size: meta.size,
            })
            .await?;

        send_announced(
            &self.link,
            &mut self.queue,
            Arc::from(content),
            meta.digest,
            &self.config,
        )
        .await?;
        Ok(())
    }

    async fn handle_put(
        &mut self,
        filename: &str,
        digest: Digest,
        size: u64,
    ) -> Result<(), SessionError> {
        let Some(name) = base_name(filename) else {
            tracing::warn!("Refusing upload with file name {:?}", filename);
            self.link.send_frame(&Frame::Fail { digest }).await?;
            return Ok(());
        };

        let content =
            receive_checked(&self.link, &mut self.queue, digest, size, &self.config).await?;

        let path = self.cwd.join(name);
        if let Err(e) = tokio::fs::write(&path, &content).await {
            self.link.send_frame(&Frame::Fail { digest }).await?;
            return Err(e.into());
        }
        self.link
            .send_frame(&Frame::Ack {
                digest: Some(digest),
            })
            .await?;

        tracing::info!("Stored {} ({} bytes)", path.display(), content.len());
        Ok(())
    }
}

/// Final path component, if it names a file
pub(crate) fn base_name(filename: &str) -> Option<&str> {
    let name = Path::new(filename).file_name()?.to_str()?;
    (!name.is_empty()).then_some(name)
}

async fn read_regular_file(path: &Path) -> std::io::Result<(String, Vec<u8>)> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{}: not a regular file", path.display()),
        ));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content = tokio::fs::read(path).await?;
    Ok((name, content))
}

async fn list_dir(dir: &Path) -> std::io::Result<String> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(names.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_chunk;
    use std::time::Duration;
    use tempfile::TempDir;
    use uftp_files::hasher::hash_content;
    use uftp_transport::MemoryNetwork;

    const WAIT: Duration = Duration::from_secs(2);

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    struct Harness {
        session: PeerSession,
        peer: PeerLink,
        replies: InboundQueue,
        _dir: TempDir,
        _endpoints: (Endpoint, Endpoint),
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bee").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"ay").unwrap();

        let net = MemoryNetwork::new();
        let mut server = Endpoint::start(Arc::new(net.bind(addr(1)).unwrap())).unwrap();
        let mut client = Endpoint::start(Arc::new(net.bind(addr(2)).unwrap())).unwrap();

        let peer = client.link(addr(1));
        peer.send_frame(&Frame::Pwd).await.unwrap();
        let (_, queue) = server.accept().await.unwrap();

        server.link(addr(2)).send_frame(&Frame::Exit).await.unwrap();
        let (_, mut replies) = client.accept().await.unwrap();
        assert_eq!(replies.next_frame().await, Some(Frame::Exit));

        let session = PeerSession::new(
            server.link(addr(2)),
            queue,
            std::fs::canonicalize(dir.path()).unwrap(),
            TransferConfig {
                chunk_size: 2000,
                chunk_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        );
        Harness {
            session,
            peer,
            replies,
            _dir: dir,
            _endpoints: (server, client),
        }
    }

    async fn step(h: &mut Harness) {
        let frame = h.session.queue.next_frame().await.unwrap();
        h.session.handle(frame).await.unwrap();
    }

    async fn connected() -> Harness {
        let mut h = harness().await;
        // The PWD sent before CONNECT is ignored
        step(&mut h).await;
        assert_eq!(h.session.state(), SessionState::AwaitingConnect);

        h.peer.send_frame(&Frame::Connect).await.unwrap();
        step(&mut h).await;
        assert_eq!(h.session.state(), SessionState::Active);
        assert_eq!(
            h.replies.recv_frame(WAIT).await.unwrap(),
            Frame::Ack { digest: None }
        );
        h
    }

    async fn ask(h: &mut Harness, frame: Frame) -> Frame {
        h.peer.send_frame(&frame).await.unwrap();
        step(h).await;
        h.replies.recv_frame(WAIT).await.unwrap()
    }

    #[tokio::test]
    async fn test_pwd_ls_cd() {
        let mut h = connected().await;
        let root = h.session.cwd().to_path_buf();

        assert_eq!(
            ask(&mut h, Frame::Pwd).await,
            Frame::Reply {
                body: root.display().to_string()
            }
        );
        assert_eq!(
            ask(&mut h, Frame::Ls).await,
            Frame::Reply {
                body: "a.txt\nb.txt\nsub/".into()
            }
        );

        let sub = root.join("sub");
        assert_eq!(
            ask(&mut h, Frame::Cd { path: "sub".into() }).await,
            Frame::Reply {
                body: sub.display().to_string()
            }
        );
        assert_eq!(h.session.cwd(), sub);

        let reply = ask(&mut h, Frame::Cd {
            path: "missing".into(),
        })
        .await;
        assert!(matches!(reply, Frame::Error { .. }));
        assert_eq!(h.session.cwd(), sub);

        assert_eq!(
            ask(&mut h, Frame::Cd { path: "..".into() }).await,
            Frame::Reply {
                body: root.display().to_string()
            }
        );
        let reply = ask(&mut h, Frame::Cd {
            path: "a.txt".into(),
        })
        .await;
        assert!(matches!(reply, Frame::Error { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_file_errors() {
        let mut h = connected().await;
        let reply = ask(&mut h, Frame::Get {
            path: "nope".into(),
        })
        .await;
        assert!(matches!(reply, Frame::Error { .. }));

        let reply = ask(&mut h, Frame::Get { path: "sub".into() }).await;
        assert!(matches!(reply, Frame::Error { .. }));
    }

    #[tokio::test]
    async fn test_put_with_wrong_digest_writes_nothing() {
        let mut h = connected().await;
        let content = vec![5u8; 3000];
        let claimed = hash_content(b"not the content");

        h.peer
            .send_frame(&Frame::Put {
                filename: "upload.bin".into(),
                digest: claimed,
                size: 3000,
            })
            .await
            .unwrap();
        h.peer
            .send_encoded(encode_chunk(&claimed, 0, &content[..2000]))
            .await
            .unwrap();
        h.peer
            .send_encoded(encode_chunk(&claimed, 1, &content[2000..]))
            .await
            .unwrap();

        let frame = h.session.queue.next_frame().await.unwrap();
        assert!(matches!(
            h.session.handle(frame).await,
            Err(SessionError::Transfer(TransferError::IntegrityFailure { .. }))
        ));

        assert_eq!(
            h.replies.recv_frame(WAIT).await.unwrap(),
            Frame::Fail { digest: claimed }
        );
        assert!(!h.session.cwd().join("upload.bin").exists());
    }

    #[tokio::test]
    async fn test_put_larger_than_announced_fails() {
        let mut h = connected().await;
        let digest = hash_content(b"short");

        h.peer
            .send_frame(&Frame::Put {
                filename: "upload.bin".into(),
                digest,
                size: 10,
            })
            .await
            .unwrap();
        h.peer
            .send_encoded(encode_chunk(&digest, 0, &[7u8; 20]))
            .await
            .unwrap();

        let frame = h.session.queue.next_frame().await.unwrap();
        assert!(matches!(
            h.session.handle(frame).await,
            Err(SessionError::Transfer(TransferError::SizeMismatch { .. }))
        ));

        assert_eq!(
            h.replies.recv_frame(WAIT).await.unwrap(),
            Frame::Fail { digest }
        );
        assert!(!h.session.cwd().join("upload.bin").exists());
    }

    #[tokio::test]
    async fn test_put_writes_verified_file() {
        let mut h = connected().await;
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 13) as u8).collect();
        let digest = hash_content(&content);

        h.peer
            .send_frame(&Frame::Put {
                filename: "../nested/upload.bin".into(),
                digest,
                size: 5000,
            })
            .await
            .unwrap();
        for (index, chunk) in content.chunks(2000).enumerate() {
            h.peer
                .send_encoded(encode_chunk(&digest, index as u32, chunk))
                .await
                .unwrap();
        }
        step(&mut h).await;

        assert_eq!(
            h.replies.recv_frame(WAIT).await.unwrap(),
            Frame::Ack {
                digest: Some(digest)
            }
        );
        let stored = std::fs::read(h.session.cwd().join("upload.bin")).unwrap();
        assert_eq!(stored, content);
    }

    #[tokio::test]
    async fn test_stray_frames_ignored_and_exit() {
        let mut h = connected().await;
        let digest = hash_content(b"x");

        for stray in [
            Frame::Ack { digest: None },
            Frame::Resend { digest, index: 0 },
            Frame::Reply { body: "hi".into() },
        ] {
            h.peer.send_frame(&stray).await.unwrap();
            step(&mut h).await;
        }
        h.peer
            .send_encoded(encode_chunk(&digest, 0, b"x"))
            .await
            .unwrap();
        step(&mut h).await;
        assert_eq!(h.session.state(), SessionState::Active);

        h.peer.send_frame(&Frame::Exit).await.unwrap();
        let shutdown = CancellationToken::new();
        h.session.run(&shutdown).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(
            h.replies.recv_timeout(Duration::from_millis(50)).await,
            Err(crate::demux::QueueError::Timeout)
        );
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("file.txt"), Some("file.txt"));
        assert_eq!(base_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(base_name(".."), None);
        assert_eq!(base_name(""), None);
    }
}
