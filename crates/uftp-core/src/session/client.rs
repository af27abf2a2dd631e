//! Client role.

use super::server::base_name;
use crate::config::TransferConfig;
use crate::demux::{Endpoint, InboundQueue, QueueError};
use crate::error::SessionError;
use crate::frame::Frame;
use crate::link::PeerLink;
use crate::transfer::{SendReport, receive_verified, send_announced};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use uftp_files::FileMetadata;

/// Connected client session
pub struct Client {
    endpoint: Endpoint,
    link: PeerLink,
    queue: InboundQueue,
    config: TransferConfig,
}

impl Client {
    /// Open a session with `server`.
    ///
    /// Queues from any other address are dropped while waiting.
    ///
    /// # Errors
    /// `SessionError::Timeout` if the server never acknowledges,
    /// `SessionError::Closed` if the endpoint stops.
    pub async fn connect(
        mut endpoint: Endpoint,
        server: SocketAddr,
        config: TransferConfig,
    ) -> Result<Self, SessionError> {
        let link = endpoint.link(server);
        let mut queue: Option<InboundQueue> = None;

        for attempt in 1..=config.request_retries {
            link.send_frame(&Frame::Connect).await?;
            let deadline = Instant::now() + config.request_timeout;

            if queue.is_none() {
                queue = accept_from(&mut endpoint, server, deadline).await?;
            }
            if let Some(q) = queue.as_mut() {
                if await_ack(q, deadline).await? {
                    tracing::info!("Connected to {}", server);
                    let queue = queue.take().ok_or(SessionError::Closed)?;
                    return Ok(Self {
                        endpoint,
                        link,
                        queue,
                        config,
                    });
                }
            }
            tracing::debug!("No answer to CONNECT from {} (attempt {})", server, attempt);
        }

        Err(SessionError::Timeout {
            request: "CONNECT",
            attempts: config.request_retries,
        })
    }

    /// Server address
    pub fn server(&self) -> SocketAddr {
        self.link.peer()
    }

    /// Local address
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Server's working directory
    ///
    /// # Errors
    /// `Remote` for a server-side failure, `Timeout` after every retry.
    pub async fn pwd(&mut self) -> Result<String, SessionError> {
        self.request(Frame::Pwd, self.config.request_retries).await
    }

    /// Entries of the server's working directory; directories end in `/`
    ///
    /// # Errors
    /// As [`Client::pwd`].
    pub async fn ls(&mut self) -> Result<Vec<String>, SessionError> {
        let body = self.request(Frame::Ls, self.config.request_retries).await?;
        Ok(body
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Change the server's working directory, returning the new one.
    ///
    /// Only absolute paths are retried: repeating a relative `cd` whose
    /// reply was lost would move twice.
    ///
    /// # Errors
    /// As [`Client::pwd`].
    pub async fn cd(&mut self, path: &str) -> Result<String, SessionError> {
        let attempts = if Path::new(path).is_absolute() {
            self.config.request_retries
        } else {
            1
        };
        self.request(Frame::Cd { path: path.into() }, attempts)
            .await
    }

    /// Download `remote_path`, returning the server's file name and the
    /// verified content.
    ///
    /// # Errors
    /// `Remote` if the server refuses, `Timeout` if it never answers, or a
    /// transfer error.
    pub async fn get(&mut self, remote_path: &str) -> Result<(String, Vec<u8>), SessionError> {
        self.queue.drain();
        self.link
            .send_frame(&Frame::Get {
                path: remote_path.into(),
            })
            .await?;

        let deadline = Instant::now() + self.config.request_timeout;
        let (filename, digest, size) = loop {
            match self.queue.recv_frame(remaining(deadline)).await {
                Ok(Frame::GetReady {
                    filename,
                    digest,
                    size,
                }) => break (filename, digest, size),
                Ok(Frame::Error { message }) => return Err(SessionError::Remote(message)),
                Ok(other) => tracing::debug!("Ignoring {} while waiting for GETR", other.tag()),
                Err(QueueError::Timeout) => {
                    return Err(SessionError::Timeout {
                        request: "GET",
                        attempts: 1,
                    });
                }
                Err(QueueError::Closed) => return Err(SessionError::Closed),
            }
        };

        let content =
            receive_verified(&self.link, &mut self.queue, digest, size, &self.config).await?;
        Ok((filename, content))
    }

    /// Download `remote_path` into `local_dir`, returning the written path
    ///
    /// # Errors
    /// As [`Client::get`], plus local I/O errors.
    pub async fn get_to(
        &mut self,
        remote_path: &str,
        local_dir: &Path,
    ) -> Result<PathBuf, SessionError> {
        let (filename, content) = self.get(remote_path).await?;
        let name = base_name(&filename).ok_or_else(|| {
            SessionError::UnexpectedFrame(format!("GETR with file name {filename:?}").into())
        })?;

        let path = local_dir.join(name);
        tokio::fs::write(&path, &content).await?;
        tracing::info!("Saved {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }

    /// Upload the file at `local_path` under its base name
    ///
    /// # Errors
    /// Local I/O errors or any error from [`Client::put_bytes`].
    pub async fn put(&mut self, local_path: &Path) -> Result<SendReport, SessionError> {
        let filename = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{}: no usable file name", local_path.display()),
                )
            })?
            .to_owned();
        let content = tokio::fs::read(local_path).await?;
        self.put_bytes(&filename, content).await
    }

    /// Upload `content` as `filename`
    ///
    /// # Errors
    /// `Transfer(RejectedByPeer)` if the server rejects the body, or any
    /// other transfer error.
    pub async fn put_bytes(
        &mut self,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<SendReport, SessionError> {
        let meta = FileMetadata::from_content(filename, &content, self.config.chunk_size);

        // Stale acknowledgements must not complete this transfer.
        self.queue.drain();
        self.link
            .send_frame(&Frame::Put {
                filename: meta.name.clone(),
                digest: meta.digest,
                size: meta.size,
            })
            .await?;

        let report = send_announced(
            &self.link,
            &mut self.queue,
            content.into(),
            meta.digest,
            &self.config,
        )
        .await?;
        Ok(report)
    }

    /// End the session and stop the endpoint
    ///
    /// # Errors
    /// Transport errors sending `EXIT` or stopping the endpoint.
    pub async fn disconnect(self) -> Result<(), SessionError> {
        self.link.send_frame(&Frame::Exit).await?;
        tracing::info!("Disconnected from {}", self.link.peer());
        self.endpoint.shutdown().await?;
        Ok(())
    }

    async fn request(&mut self, frame: Frame, attempts: u32) -> Result<String, SessionError> {
        let attempts = attempts.max(1);
        self.queue.drain();

        for attempt in 1..=attempts {
            self.link.send_frame(&frame).await?;
            let deadline = Instant::now() + self.config.request_timeout;

            loop {
                match self.queue.recv_frame(remaining(deadline)).await {
                    Ok(Frame::Reply { body }) => return Ok(body),
                    Ok(Frame::Error { message }) => return Err(SessionError::Remote(message)),
                    Ok(other) => {
                        tracing::debug!("Ignoring {} while waiting for {}", other.tag(), frame.tag());
                    }
                    Err(QueueError::Timeout) => break,
                    Err(QueueError::Closed) => return Err(SessionError::Closed),
                }
            }
            tracing::debug!("No answer to {} (attempt {})", frame.tag(), attempt);
        }

        Err(SessionError::Timeout {
            request: frame.tag().as_str(),
            attempts,
        })
    }
}

fn remaining(deadline: Instant) -> std::time::Duration {
    deadline.saturating_duration_since(Instant::now())
}

async fn accept_from(
    endpoint: &mut Endpoint,
    server: SocketAddr,
    deadline: Instant,
) -> Result<Option<InboundQueue>, SessionError> {
    loop {
        match tokio::time::timeout_at(deadline, endpoint.accept()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(SessionError::Closed),
            Ok(Some((peer, queue))) if peer == server => return Ok(Some(queue)),
            Ok(Some((peer, _))) => tracing::debug!("Dropping queue from unexpected peer {}", peer),
        }
    }
}

async fn await_ack(queue: &mut InboundQueue, deadline: Instant) -> Result<bool, SessionError> {
    loop {
        match queue.recv_frame(remaining(deadline)).await {
            Ok(Frame::Ack { digest: None }) => return Ok(true),
            Ok(other) => tracing::debug!("Ignoring {} while connecting", other.tag()),
            Err(QueueError::Timeout) => return Ok(false),
            Err(QueueError::Closed) => return Err(SessionError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Server;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use uftp_transport::MemoryNetwork;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn config() -> TransferConfig {
        TransferConfig {
            chunk_size: 1000,
            chunk_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_millis(300),
            stall_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }
    }

    struct Setup {
        client: Client,
        root: TempDir,
        server: tokio::task::JoinHandle<Result<(), SessionError>>,
        shutdown: tokio_util::sync::CancellationToken,
    }

    async fn setup() -> Setup {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("hello.txt"), b"hello world").unwrap();
        std::fs::create_dir(root.path().join("docs")).unwrap();

        let net = MemoryNetwork::new();
        let server_endpoint = Endpoint::start(Arc::new(net.bind(addr(28888)).unwrap())).unwrap();
        let server = Server::new(server_endpoint, root.path(), config()).unwrap();
        let shutdown = server.shutdown_token();
        let server = tokio::spawn(server.run());

        let client_endpoint = Endpoint::start(Arc::new(net.bind(addr(28889)).unwrap())).unwrap();
        let client = Client::connect(client_endpoint, addr(28888), config())
            .await
            .unwrap();

        Setup {
            client,
            root,
            server,
            shutdown,
        }
    }

    #[tokio::test]
    async fn test_browse() {
        let mut s = setup().await;
        let root = std::fs::canonicalize(s.root.path()).unwrap();

        assert_eq!(s.client.pwd().await.unwrap(), root.display().to_string());
        assert_eq!(s.client.ls().await.unwrap(), vec!["docs/", "hello.txt"]);
        assert_eq!(
            s.client.cd("docs").await.unwrap(),
            root.join("docs").display().to_string()
        );
        assert!(s.client.ls().await.unwrap().is_empty());
        assert!(matches!(
            s.client.cd("nowhere").await,
            Err(SessionError::Remote(_))
        ));

        s.client.disconnect().await.unwrap();
        s.shutdown.cancel();
        s.server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let mut s = setup().await;
        let content: Vec<u8> = (0..4500u32).map(|i| (i % 199) as u8).collect();

        let report = s.client.put_bytes("data.bin", content.clone()).await.unwrap();
        assert_eq!(report.chunks, 5);
        assert_eq!(
            std::fs::read(s.root.path().join("data.bin")).unwrap(),
            content
        );

        let (name, fetched) = s.client.get("data.bin").await.unwrap();
        assert_eq!(name, "data.bin");
        assert_eq!(fetched, content);

        let download = TempDir::new().unwrap();
        let path = s
            .client
            .get_to("hello.txt", download.path())
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello world");

        assert!(matches!(
            s.client.get("missing.txt").await,
            Err(SessionError::Remote(_))
        ));

        s.shutdown.cancel();
        s.server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_times_out_without_server() {
        let net = MemoryNetwork::new();
        let endpoint = Endpoint::start(Arc::new(net.bind(addr(28889)).unwrap())).unwrap();
        let config = TransferConfig {
            request_timeout: Duration::from_millis(30),
            request_retries: 2,
            ..Default::default()
        };

        let result = Client::connect(endpoint, addr(28888), config).await;
        assert!(matches!(
            result,
            Err(SessionError::Timeout {
                request: "CONNECT",
                attempts: 2
            })
        ));
    }
}
