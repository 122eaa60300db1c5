//! In-process transport.
//!
//! Endpoints become reachable by calling [`MemoryTransport::listen`]. Each
//! successful `connect` hands a [`MemoryPeer`] to the listener; the peer
//! sees what the client sends and can reply or hang up.

use super::{Link, LinkReader, LinkWriter, Transport, WireMessage};
use crate::config::TransportConfig;
use crate::endpoint::Endpoint;
use crate::{Result, TetherError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Registry {
    listeners: HashMap<Endpoint, mpsc::UnboundedSender<MemoryPeer>>,
    attempts: Vec<Endpoint>,
}

/// Transport over in-process channels.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `endpoint` accept connections. Replaces any previous listener.
    pub fn listen(&self, endpoint: Endpoint) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().listeners.insert(endpoint, tx);
        MemoryListener { endpoint, rx }
    }

    /// Make `endpoint` refuse connections again.
    pub fn unlisten(&self, endpoint: Endpoint) {
        self.lock().listeners.remove(&endpoint);
    }

    /// Every endpoint `connect` was called with, in call order.
    pub fn attempts(&self) -> Vec<Endpoint> {
        self.lock().attempts.clone()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        f.debug_struct("MemoryTransport")
            .field("listening", &registry.listeners.len())
            .field("attempts", &registry.attempts.len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: Endpoint) -> Result<Link> {
        let listener = {
            let mut registry = self.lock();
            registry.attempts.push(endpoint);
            registry.listeners.get(&endpoint).cloned()
        };
        let listener =
            listener.ok_or_else(|| TetherError::transport(endpoint, "connection refused"))?;

        let (to_peer, from_client) = mpsc::channel(TransportConfig::MEMORY_LINK_CAPACITY);
        let (to_client, from_peer) = mpsc::channel(TransportConfig::MEMORY_LINK_CAPACITY);

        let peer = MemoryPeer {
            endpoint,
            rx: from_client,
            tx: Some(to_client),
        };
        listener
            .send(peer)
            .map_err(|_| TetherError::transport(endpoint, "connection refused"))?;

        debug!("In-memory session established with {}", endpoint);
        Ok(Link::new(
            MemoryLinkReader { rx: from_peer },
            MemoryLinkWriter {
                endpoint,
                tx: Some(to_peer),
            },
        ))
    }
}

/// Accepts in-memory sessions for one endpoint.
#[derive(Debug)]
pub struct MemoryListener {
    endpoint: Endpoint,
    rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Wait for the next client. `None` once the transport is dropped or the
    /// endpoint stops listening.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.rx.recv().await
    }
}

/// Server side of an in-memory session.
#[derive(Debug)]
pub struct MemoryPeer {
    endpoint: Endpoint,
    rx: mpsc::Receiver<WireMessage>,
    tx: Option<mpsc::Sender<WireMessage>>,
}

impl MemoryPeer {
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Next message from the client. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }

    pub async fn send(&self, message: WireMessage) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TetherError::transport(self.endpoint, "peer closed"))?;
        tx.send(message)
            .await
            .map_err(|_| TetherError::transport(self.endpoint, "client went away"))
    }

    /// Hang up. The client reader sees a clean close.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

struct MemoryLinkReader {
    rx: mpsc::Receiver<WireMessage>,
}

#[async_trait]
impl LinkReader for MemoryLinkReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        Ok(self.rx.recv().await)
    }
}

struct MemoryLinkWriter {
    endpoint: Endpoint,
    tx: Option<mpsc::Sender<WireMessage>>,
}

#[async_trait]
impl LinkWriter for MemoryLinkWriter {
    async fn send(&mut self, message: &WireMessage) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TetherError::transport(self.endpoint, "session closed"))?;
        tx.send(message.clone())
            .await
            .map_err(|_| TetherError::transport(self.endpoint, "peer went away"))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}
