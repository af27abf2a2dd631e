//! In-process datagram network.
//!
//! `MemoryNetwork` routes datagrams between `MemoryTransport` endpoints by
//! address. A fault hook sees every datagram before delivery and may drop it,
//! hold it back (to be released after later datagrams, i.e. reordering) or
//! rewrite its bytes, which makes loss scenarios reproducible in tests.

use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};

/// Fate of one datagram, decided by the fault hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Deliver (possibly after the hook rewrote the bytes)
    Deliver,
    /// Lose the datagram
    Drop,
    /// Keep the datagram back and deliver it right after the next delivered
    /// datagram on the same route
    Delay,
}

type Datagram = (Vec<u8>, SocketAddr);
type FaultHook = Arc<dyn Fn(SocketAddr, SocketAddr, &mut Vec<u8>) -> Delivery + Send + Sync>;

#[derive(Default)]
struct NetworkInner {
    endpoints: DashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    held: DashMap<(SocketAddr, SocketAddr), Vec<Vec<u8>>>,
    hook: RwLock<Option<FaultHook>>,
}

/// Shared in-memory network.
///
/// Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Create an empty network with no fault hook
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint at `addr`.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the address is already taken.
    pub fn bind(&self, addr: SocketAddr) -> TransportResult<MemoryTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.endpoints.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::BindFailed(format!(
                    "{addr}: address already in use"
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        Ok(MemoryTransport {
            addr,
            network: self.clone(),
            rx: AsyncMutex::new(rx),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            stats: Mutex::new(TransportStats::new()),
        })
    }

    /// Install a fault hook called as `hook(from, to, &mut datagram)`.
    pub fn set_fault_hook<F>(&self, hook: F)
    where
        F: Fn(SocketAddr, SocketAddr, &mut Vec<u8>) -> Delivery + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.hook.write() {
            *slot = Some(Arc::new(hook));
        }
    }

    /// Remove the fault hook; every datagram is delivered afterwards.
    pub fn clear_fault_hook(&self) {
        if let Ok(mut slot) = self.inner.hook.write() {
            *slot = None;
        }
    }

    fn route(&self, from: SocketAddr, to: SocketAddr, mut datagram: Vec<u8>) {
        let hook = self.inner.hook.read().ok().and_then(|slot| slot.clone());
        let fate = hook.map_or(Delivery::Deliver, |hook| hook(from, to, &mut datagram));

        match fate {
            Delivery::Drop => {
                tracing::trace!("memory network dropped {} bytes {} -> {}", datagram.len(), from, to);
            }
            Delivery::Delay => {
                self.inner.held.entry((from, to)).or_default().push(datagram);
            }
            Delivery::Deliver => {
                let Some(endpoint) = self.inner.endpoints.get(&to) else {
                    return;
                };
                let _ = endpoint.send((datagram, from));
                if let Some((_, held)) = self.inner.held.remove(&(from, to)) {
                    for late in held {
                        let _ = endpoint.send((late, from));
                    }
                }
            }
        }
    }

    fn detach(&self, addr: SocketAddr) {
        self.inner.endpoints.remove(&addr);
    }
}

/// Endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Datagram>>,
    closed: AtomicBool,
    shutdown: Notify,
    stats: Mutex<TransportStats>,
}

impl MemoryTransport {
    fn record(&self, f: impl FnOnce(&mut TransportStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.network.route(self.addr, addr, buf.to_vec());
        self.record(|s| s.record_send(buf.len()));
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = notified => Err(TransportError::Closed),
            datagram = rx.recv() => {
                let (data, from) = datagram.ok_or(TransportError::Closed)?;
                // Excess bytes are truncated, as with a real socket.
                let size = data.len().min(buf.len());
                buf[..size].copy_from_slice(&data[..size]);
                self.record(|s| s.record_recv(size));
                Ok((size, from))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.addr)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        self.network.detach(self.addr);
        self.shutdown.notify_waiters();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn stats(&self) -> TransportStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.detach(self.addr);
    }
}
