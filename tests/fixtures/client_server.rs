//! Client/server test fixture
//!
//! Runs a [`Server`] over a temporary root directory in a background task
//! and connects a [`Client`] to it, either over UDP loopback or over a
//! [`MemoryNetwork`] whose fault hook the test controls.
//!
//! # Example
//!
//! ```no_run
//! use uftp_integration_tests::fixtures::{ClientServerFixture, test_config};
//!
//! # async fn example() -> Result<(), uftp_core::SessionError> {
//! let mut fixture = ClientServerFixture::over_udp(test_config()).await?;
//! let cwd = fixture.client.pwd().await?;
//! fixture.cleanup().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uftp_core::{Client, Endpoint, Server, SessionError, TransferConfig};
use uftp_transport::{AsyncUdpTransport, MemoryNetwork};

/// Address allocator for memory-network fixtures
static NEXT_PORT: AtomicU16 = AtomicU16::new(30000);

/// Allocate a pair of unique addresses for a test
fn allocate_addr_pair() -> (SocketAddr, SocketAddr) {
    let base = NEXT_PORT.fetch_add(2, Ordering::SeqCst);
    (
        SocketAddr::from(([127, 0, 0, 1], base)),
        SocketAddr::from(([127, 0, 0, 1], base + 1)),
    )
}

/// Transfer tuning for tests: short timeouts, small chunks
pub fn test_config() -> TransferConfig {
    TransferConfig {
        chunk_size: 2000,
        chunk_timeout: Duration::from_millis(150),
        request_timeout: Duration::from_millis(500),
        stall_timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    }
}

/// A server task plus a connected client
pub struct ClientServerFixture {
    /// Connected client
    pub client: Client,
    /// Address the server listens on
    pub server_addr: SocketAddr,
    /// Network the pair runs on, when not on UDP
    pub network: Option<MemoryNetwork>,
    root: TempDir,
    shutdown: CancellationToken,
    server: JoinHandle<Result<(), SessionError>>,
}

impl ClientServerFixture {
    /// Server and client on UDP loopback with OS-assigned ports
    ///
    /// # Errors
    ///
    /// Returns an error if sockets cannot be bound or the client cannot
    /// connect.
    pub async fn over_udp(config: TransferConfig) -> Result<Self, SessionError> {
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        let server_transport = AsyncUdpTransport::bind(loopback).await?;
        let client_transport = AsyncUdpTransport::bind(loopback).await?;

        Self::start(
            Endpoint::start(Arc::new(server_transport))?,
            Endpoint::start(Arc::new(client_transport))?,
            config,
            None,
        )
        .await
    }

    /// Server and client on a fresh in-memory network
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot connect.
    pub async fn over_memory(config: TransferConfig) -> Result<Self, SessionError> {
        let network = MemoryNetwork::new();
        let (server_addr, client_addr) = allocate_addr_pair();

        Self::start(
            Endpoint::start(Arc::new(network.bind(server_addr)?))?,
            Endpoint::start(Arc::new(network.bind(client_addr)?))?,
            config,
            Some(network),
        )
        .await
    }

    async fn start(
        server_endpoint: Endpoint,
        client_endpoint: Endpoint,
        config: TransferConfig,
        network: Option<MemoryNetwork>,
    ) -> Result<Self, SessionError> {
        let root = tempfile::tempdir()?;
        let server_addr = server_endpoint.local_addr();

        let server = Server::new(server_endpoint, root.path(), config.clone())?;
        let shutdown = server.shutdown_token();
        let server = tokio::spawn(server.run());

        let client = Client::connect(client_endpoint, server_addr, config).await?;

        Ok(Self {
            client,
            server_addr,
            network,
            root,
            shutdown,
            server,
        })
    }

    /// Directory the server serves
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Memory network the pair runs on
    ///
    /// # Panics
    ///
    /// Panics if the fixture runs over UDP.
    pub fn network(&self) -> &MemoryNetwork {
        self.network
            .as_ref()
            .expect("fixture is not running on a memory network")
    }

    /// Disconnect the client and stop the server
    ///
    /// # Errors
    ///
    /// Returns the error the server stopped with, if any.
    pub async fn cleanup(self) -> Result<(), SessionError> {
        if let Some(network) = &self.network {
            network.clear_fault_hook();
        }
        self.client.disconnect().await?;

        self.shutdown.cancel();
        let stopped = self
            .server
            .await
            .map_err(|e| SessionError::Io(std::io::Error::other(e)))?;
        tracing::debug!("Fixture server for {} stopped", self.server_addr);
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_over_udp() {
        let mut fixture = ClientServerFixture::over_udp(test_config()).await.unwrap();
        assert_ne!(fixture.server_addr.port(), 0);
        assert!(fixture.network.is_none());

        let cwd = fixture.client.pwd().await.unwrap();
        assert_eq!(
            Path::new(&cwd),
            std::fs::canonicalize(fixture.root()).unwrap()
        );
        fixture.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_fixture_address_allocation() {
        let first = ClientServerFixture::over_memory(test_config()).await.unwrap();
        let second = ClientServerFixture::over_memory(test_config()).await.unwrap();

        assert_ne!(first.server_addr, second.server_addr);
        assert_ne!(first.client.local_addr(), second.client.local_addr());

        first.cleanup().await.unwrap();
        second.cleanup().await.unwrap();
    }
}
