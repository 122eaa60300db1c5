//! High-level client facade.
//!
//! [`TetherClient`] bundles the endpoint store, job registry, dispatcher
//! handle and connection supervisor behind one cloneable value. The
//! [`EventDispatcher`](crate::EventDispatcher) is returned separately by
//! [`TetherClientBuilder::build`] because exactly one task drives it.

mod builder;
mod request;

pub use builder::TetherClientBuilder;
pub use request::ServiceRequest;

use crate::config::PersistenceConfig;
use crate::directory::CellId;
use crate::dispatch::DispatcherHandle;
use crate::endpoint::{Endpoint, EndpointStore};
use crate::event::EventKind;
use crate::job::{JobId, JobRegistry};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, ReconnectPolicy};
use crate::transport::WireMessage;
use crate::{Result, TetherError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the startup server list came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Records read from the persisted server list.
    pub cached: usize,
    /// Endpoints added by a directory lookup.
    pub from_directory: usize,
    pub cell_id: CellId,
}

/// Cloneable entry point to a running client.
#[derive(Debug, Clone)]
pub struct TetherClient {
    supervisor: ConnectionSupervisor,
    registry: Arc<JobRegistry>,
    events: DispatcherHandle,
    data_dir: Option<PathBuf>,
}

impl TetherClient {
    pub fn builder() -> TetherClientBuilder {
        TetherClientBuilder::new()
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn store(&self) -> &Arc<EndpointStore> {
        self.supervisor.store()
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Handle for enqueueing application events or stopping the loop.
    pub fn events(&self) -> &DispatcherHandle {
        &self.events
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn cell_id(&self) -> CellId {
        self.supervisor.cell_id()
    }

    pub fn set_cell_id(&self, cell_id: CellId) {
        self.supervisor.set_cell_id(cell_id);
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    fn data_file(&self, name: &str) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(name))
    }

    /// Prepare the server list before the first connect.
    ///
    /// Loads the persisted cell id and server list from the data directory,
    /// then asks the directory for servers if the store is still empty.
    /// A [`TetherError::DirectoryUnavailable`] here means there is nothing
    /// to connect to; the transport is never touched.
    pub async fn bootstrap(&self) -> Result<StartupReport> {
        let mut report = StartupReport::default();

        if let Some(path) = self.data_file(PersistenceConfig::CELL_ID_FILE) {
            let cell_id = CellId::load(&path)?;
            if cell_id != CellId::default() {
                self.set_cell_id(cell_id);
            }
        }

        if let Some(path) = self.data_file(PersistenceConfig::SERVER_LIST_FILE) {
            match self.store().load_file(&path) {
                Ok(Some(count)) => report.cached = count,
                Ok(None) => {}
                // Keep whatever was read before the bad record.
                Err(TetherError::CorruptPersistedState { .. }) => report.cached = self.store().len(),
                Err(e) => return Err(e),
            }
        }

        if self.store().is_empty() {
            report.from_directory = self.supervisor.refresh_from_directory().await?;
            if self.store().is_empty() {
                return Err(TetherError::directory("directory returned no servers"));
            }
        }

        report.cell_id = self.cell_id();
        info!(
            "Startup server list: {} cached, {} from directory",
            report.cached, report.from_directory
        );
        Ok(report)
    }

    /// Save the server list and cell id to the data directory.
    ///
    /// Does nothing when no data directory is configured.
    pub fn persist(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            debug!("No data directory configured, skipping persistence");
            return Ok(());
        };
        self.store()
            .save_file(&dir.join(PersistenceConfig::SERVER_LIST_FILE))?;
        self.cell_id()
            .save(&dir.join(PersistenceConfig::CELL_ID_FILE))?;
        Ok(())
    }

    pub async fn connect(&self) -> Result<Endpoint> {
        self.supervisor.connect().await
    }

    pub async fn connect_with_policy(&self, policy: &ReconnectPolicy) -> Result<Endpoint> {
        self.supervisor.connect_with_policy(policy).await
    }

    pub async fn disconnect(&self) -> bool {
        self.supervisor.disconnect().await
    }

    /// Send a raw message on the current session.
    pub async fn send(&self, message: WireMessage) -> Result<()> {
        self.supervisor.send(message).await
    }

    /// Send a service request and track it until its response arrives.
    ///
    /// The response is delivered as a `ServiceResponse` event whose
    /// [`claimed_job`](crate::Event::claimed_job) carries the returned id. If
    /// the send fails the job is released and the error returned.
    pub async fn issue(&self, request: ServiceRequest) -> Result<JobId> {
        let job_id = self.registry.new_job(EventKind::ServiceResponse);
        let method = request.name().to_string();
        let message =
            WireMessage::new(EventKind::ServiceRequest, request.into_payload()).with_job(job_id);

        if let Err(e) = self.supervisor.send(message).await {
            self.registry.complete(job_id);
            warn!("Failed to send {}: {}", method, e);
            return Err(e);
        }
        debug!("Issued {} as job {}", method, job_id);
        Ok(job_id)
    }

    /// Ask the server to start a session. The reply arrives as `LoggedOn`.
    pub async fn log_on(&self, details: serde_json::Value) -> Result<()> {
        self.supervisor
            .send(WireMessage::new(EventKind::LogOn, details))
            .await
    }

    /// Ask the server to end the session. The reply arrives as `LoggedOff`.
    pub async fn log_off(&self) -> Result<()> {
        self.supervisor
            .send(WireMessage::new(EventKind::LogOff, serde_json::Value::Null))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::transport::MemoryTransport;
    use tempfile::TempDir;

    fn endpoint(port: u16) -> Endpoint {
        format!("10.0.0.3:{}", port).parse().unwrap()
    }

    #[tokio::test]
    async fn test_issue_without_connection_releases_job() {
        let (client, _dispatcher) = TetherClient::builder()
            .transport(Arc::new(MemoryTransport::new()))
            .build()
            .unwrap();

        let err = client
            .issue(ServiceRequest::method("Player", "GetGameBadgeLevels", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::NotConnected));
        assert!(client.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_issue_stamps_job_on_the_wire() {
        let transport = MemoryTransport::new();
        let mut listener = transport.listen(endpoint(1));
        let (client, _dispatcher) = TetherClient::builder()
            .transport(Arc::new(transport))
            .servers([endpoint(1)])
            .build()
            .unwrap();

        client.connect().await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        let job = client
            .issue(ServiceRequest::method("Player", "GetGameBadgeLevels", 1))
            .await
            .unwrap();
        assert!(client.jobs().is_outstanding(job));

        let sent = peer.recv().await.unwrap();
        assert_eq!(sent.kind, EventKind::ServiceRequest);
        assert_eq!(sent.job_id, Some(job));
        assert_eq!(sent.payload["method"], "Player.GetGameBadgeLevels#1");
    }

    #[tokio::test]
    async fn test_log_on_and_off_send_messages() {
        let transport = MemoryTransport::new();
        let mut listener = transport.listen(endpoint(1));
        let (client, _dispatcher) = TetherClient::builder()
            .transport(Arc::new(transport))
            .servers([endpoint(1)])
            .build()
            .unwrap();

        client.connect().await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        client
            .log_on(serde_json::json!({"username": "demo"}))
            .await
            .unwrap();
        client.log_off().await.unwrap();

        assert_eq!(peer.recv().await.unwrap().kind, EventKind::LogOn);
        assert_eq!(peer.recv().await.unwrap().kind, EventKind::LogOff);
    }

    #[tokio::test]
    async fn test_bootstrap_prefers_cache() {
        let temp_dir = TempDir::new().unwrap();
        let seed = EndpointStore::with_endpoints([endpoint(1), endpoint(2)]);
        seed.save_file(&temp_dir.path().join("servers.bin")).unwrap();
        CellId::new(5).save(&temp_dir.path().join("cellid.txt")).unwrap();

        let (client, _dispatcher) = TetherClient::builder()
            .transport(Arc::new(MemoryTransport::new()))
            .directory(Arc::new(StaticDirectory::new([endpoint(9)])))
            .data_dir(temp_dir.path())
            .build()
            .unwrap();

        let report = client.bootstrap().await.unwrap();
        assert_eq!(report.cached, 2);
        assert_eq!(report.from_directory, 0);
        assert_eq!(report.cell_id, CellId::new(5));
        assert_eq!(client.store().snapshot_all(), vec![endpoint(1), endpoint(2)]);
    }

    #[tokio::test]
    async fn test_bootstrap_falls_back_to_directory() {
        let temp_dir = TempDir::new().unwrap();
        let (client, _dispatcher) = TetherClient::builder()
            .transport(Arc::new(MemoryTransport::new()))
            .directory(Arc::new(StaticDirectory::new([endpoint(9)])))
            .data_dir(temp_dir.path())
            .build()
            .unwrap();

        let report = client.bootstrap().await.unwrap();
        assert_eq!(report.cached, 0);
        assert_eq!(report.from_directory, 1);
    }

    #[tokio::test]
    async fn test_bootstrap_without_servers_is_fatal() {
        let transport = MemoryTransport::new();
        let (client, _dispatcher) = TetherClient::builder()
            .transport(Arc::new(transport.clone()))
            .directory(Arc::new(StaticDirectory::default()))
            .build()
            .unwrap();

        let err = client.bootstrap().await.unwrap_err();
        assert!(err.is_fatal_for_startup());
        assert!(transport.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_persist_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let (client, _dispatcher) = TetherClient::builder()
            .servers([endpoint(3)])
            .data_dir(temp_dir.path())
            .build()
            .unwrap();
        client.set_cell_id(CellId::new(12));
        client.persist().unwrap();

        let (reloaded, _dispatcher) = TetherClient::builder()
            .data_dir(temp_dir.path())
            .build()
            .unwrap();
        let report = reloaded.bootstrap().await.unwrap();
        assert_eq!(report.cached, 1);
        assert_eq!(reloaded.cell_id(), CellId::new(12));
    }
}
