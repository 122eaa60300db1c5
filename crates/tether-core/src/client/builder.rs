//! Builder for configuring a [`TetherClient`].

use super::TetherClient;
use crate::config::ClientConfig;
use crate::directory::{CellId, DirectoryResolver};
use crate::dispatch::EventDispatcher;
use crate::endpoint::{Endpoint, EndpointStore};
use crate::job::JobRegistry;
use crate::supervisor::ConnectionSupervisor;
use crate::transport::{TcpTransport, Transport};
use crate::{Result, TetherError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring a [`TetherClient`].
///
/// # Example
///
/// ```rust,ignore
/// use tether_core::{HttpDirectory, TetherClient};
///
/// let (client, mut dispatcher) = TetherClient::builder()
///     .data_dir("./tether-data")
///     .directory(Arc::new(HttpDirectory::new()?))
///     .build()?;
/// ```
pub struct TetherClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    directory: Option<Arc<dyn DirectoryResolver>>,
    store: Option<Arc<EndpointStore>>,
    servers: Vec<Endpoint>,
    registry: Option<Arc<JobRegistry>>,
    connect_timeout: Duration,
    cell_id: CellId,
    data_dir: Option<PathBuf>,
}

impl TetherClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            directory: None,
            store: None,
            servers: Vec::new(),
            registry: None,
            connect_timeout: ClientConfig::CONNECT_TIMEOUT,
            cell_id: CellId::default(),
            data_dir: None,
        }
    }

    /// Transport used to open sessions.
    ///
    /// Default: [`TcpTransport`]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Directory consulted when no servers are known.
    ///
    /// Default: none, so an empty server list cannot be recovered.
    pub fn directory(mut self, directory: Arc<dyn DirectoryResolver>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Share an existing endpoint store.
    pub fn endpoint_store(mut self, store: Arc<EndpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Seed the endpoint store with known servers.
    pub fn servers(mut self, servers: impl IntoIterator<Item = Endpoint>) -> Self {
        self.servers.extend(servers);
        self
    }

    /// Share an existing job registry.
    pub fn job_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Default: [`ClientConfig::CONNECT_TIMEOUT`]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Initial region hint. Overridden by a persisted `cellid.txt` when
    /// [`data_dir`](Self::data_dir) is set.
    pub fn cell_id(mut self, cell_id: CellId) -> Self {
        self.cell_id = cell_id;
        self
    }

    /// Directory holding `servers.bin` and `cellid.txt`.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Wire everything together.
    ///
    /// Returns the client and the dispatcher whose loop must be driven by
    /// the caller. The dispatcher is left idle.
    pub fn build(self) -> Result<(TetherClient, EventDispatcher)> {
        if self.connect_timeout.is_zero() {
            return Err(TetherError::Validation {
                field: "connect_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(EndpointStore::new()));
        store.extend(self.servers);

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(JobRegistry::new()));
        let dispatcher = EventDispatcher::new().with_job_registry(registry.clone());

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::new().with_connect_timeout(self.connect_timeout)));

        let mut supervisor = ConnectionSupervisor::new(transport, store, dispatcher.handle())
            .with_connect_timeout(self.connect_timeout);
        if let Some(directory) = self.directory {
            supervisor = supervisor.with_directory(directory);
        }
        supervisor.set_cell_id(self.cell_id);

        let client = TetherClient {
            supervisor,
            registry,
            events: dispatcher.handle(),
            data_dir: self.data_dir,
        };
        Ok((client, dispatcher))
    }
}

impl Default for TetherClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
