//! Connection lifecycle.
//!
//! The [`ConnectionSupervisor`] picks an endpoint, opens a session through a
//! [`Transport`], and turns everything the session delivers into events on
//! the dispatch queue. It emits exactly one `Disconnected` event per
//! session, whether the application hung up or the transport dropped.
//!
//! Reconnecting is the application's call; see [`ReconnectPolicy`] for an
//! opt-in backoff loop.

mod reconnect;
mod state;

pub use reconnect::ReconnectPolicy;
pub use state::ConnectionState;

use crate::cancel::CancellationToken;
use crate::config::ClientConfig;
use crate::directory::{CellId, DirectoryResolver};
use crate::dispatch::DispatcherHandle;
use crate::endpoint::{Endpoint, EndpointStore};
use crate::event::{DisconnectedInfo, Event};
use crate::transport::{LinkReader, LinkWriter, Transport, WireMessage};
use crate::{Result, TetherError};
use state::AtomicConnectionState;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type SharedWriter = Arc<Mutex<Box<dyn LinkWriter>>>;

struct Session {
    generation: u64,
    endpoint: Endpoint,
    writer: SharedWriter,
    /// Fired when the session is torn down; aborts sends stuck on a full link.
    closing: CancellationToken,
    reader_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Release the link. Never blocks behind an in-flight send.
    async fn close(mut self, abort_reader: bool) -> Endpoint {
        self.closing.cancel();
        if abort_reader {
            if let Some(task) = self.reader_task.take() {
                task.abort();
            }
        }
        if let Err(e) = self.writer.lock().await.close().await {
            debug!("Error closing session with {}: {}", self.endpoint, e);
        }
        self.endpoint
    }
}

/// State shared with the reader task.
struct Shared {
    store: Arc<EndpointStore>,
    events: DispatcherHandle,
    state: AtomicConnectionState,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    cell_id: AtomicU32,
    /// Set by `disconnect` while a connect is in flight.
    disconnect_requested: AtomicBool,
}

impl Shared {
    fn emit(&self, event: Event) {
        if let Err(e) = self.events.enqueue(event) {
            warn!("Dropping connection event: {}", e);
        }
    }

    /// Tear down session `generation` after the transport dropped it.
    async fn severed(&self, generation: u64, reason: String) {
        let old = {
            let mut session = self.session.lock().await;
            if session.as_ref().map(|s| s.generation) != Some(generation) {
                return;
            }
            if !self
                .state
                .transition(ConnectionState::Connected, ConnectionState::Disconnecting)
            {
                return;
            }
            session.take()
        };
        let Some(old) = old else {
            return;
        };
        let endpoint = old.close(false).await;

        self.store.mark_failed(&endpoint);
        self.state.store(ConnectionState::Disconnected);
        warn!("Lost connection to {}: {}", endpoint, reason);
        self.emit(Event::disconnected(DisconnectedInfo {
            user_initiated: false,
            endpoint: Some(endpoint),
            reason: Some(reason),
        }));
    }
}

/// Owns the session with one server at a time.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    directory: Option<Arc<dyn DirectoryResolver>>,
    connect_timeout: Duration,
    shared: Arc<Shared>,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<EndpointStore>,
        events: DispatcherHandle,
    ) -> Self {
        Self {
            transport,
            directory: None,
            connect_timeout: ClientConfig::CONNECT_TIMEOUT,
            shared: Arc::new(Shared {
                store,
                events,
                state: AtomicConnectionState::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                cell_id: AtomicU32::new(0),
                disconnect_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Directory consulted when the endpoint store is empty.
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryResolver>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn store(&self) -> &Arc<EndpointStore> {
        &self.shared.store
    }

    pub fn cell_id(&self) -> CellId {
        CellId::new(self.shared.cell_id.load(Ordering::Relaxed))
    }

    /// Region hint passed to the directory on the next lookup.
    pub fn set_cell_id(&self, cell_id: CellId) {
        self.shared.cell_id.store(cell_id.get(), Ordering::Relaxed);
    }

    /// Endpoint of the current session, if any.
    pub async fn endpoint(&self) -> Option<Endpoint> {
        self.shared.session.lock().await.as_ref().map(|s| s.endpoint)
    }

    /// Open a session with the best candidate endpoint.
    ///
    /// Falls back to the directory when no endpoints are known. On failure
    /// the endpoint is deprioritized, a `Disconnected` event is emitted and
    /// the error is returned. A [`disconnect`](Self::disconnect) issued while
    /// this is in flight makes it close the fresh link and fail.
    pub async fn connect(&self) -> Result<Endpoint> {
        if !self
            .shared
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return Err(TetherError::InvalidState {
                expected: ConnectionState::Disconnected.as_str(),
                actual: self.state().as_str(),
            });
        }
        self.shared.disconnect_requested.store(false, Ordering::SeqCst);

        let endpoint = match self.select_endpoint().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.fail_connect(None, &e);
                return Err(e);
            }
        };

        info!("Connecting to {}", endpoint);
        let link = match tokio::time::timeout(self.connect_timeout, self.transport.connect(endpoint))
            .await
        {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                self.fail_connect(Some(endpoint), &e);
                return Err(e);
            }
            Err(_) => {
                let e = TetherError::transport(
                    endpoint,
                    format!("connect timed out after {:?}", self.connect_timeout),
                );
                self.fail_connect(Some(endpoint), &e);
                return Err(e);
            }
        };

        let (reader, mut writer) = link.into_split();
        let mut session = self.shared.session.lock().await;

        if self.shared.disconnect_requested.swap(false, Ordering::SeqCst) {
            drop(session);
            if let Err(e) = writer.close().await {
                debug!("Error closing abandoned link: {}", e);
            }
            self.shared.state.store(ConnectionState::Disconnected);
            info!("Connect to {} abandoned by disconnect", endpoint);
            self.shared.emit(Event::disconnected(DisconnectedInfo {
                user_initiated: true,
                endpoint: Some(endpoint),
                reason: Some("disconnect requested while connecting".to_string()),
            }));
            return Err(TetherError::Other(format!(
                "connect to {} abandoned by disconnect",
                endpoint
            )));
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *session = Some(Session {
            generation,
            endpoint,
            writer: Arc::new(Mutex::new(writer)),
            closing: CancellationToken::new(),
            reader_task: None,
        });
        self.shared.store.mark_good(&endpoint);
        self.shared.state.store(ConnectionState::Connected);
        self.shared.emit(Event::connected(endpoint));

        let task = tokio::spawn(read_loop(self.shared.clone(), reader, generation));
        if let Some(current) = session.as_mut() {
            current.reader_task = Some(task);
        }
        drop(session);

        info!("Connected to {}", endpoint);
        Ok(endpoint)
    }

    async fn select_endpoint(&self) -> Result<Endpoint> {
        if let Some(endpoint) = self.shared.store.next_candidate() {
            return Ok(endpoint);
        }
        self.refresh_from_directory().await?;
        self.shared
            .store
            .next_candidate()
            .ok_or_else(|| TetherError::directory("directory returned no servers"))
    }

    /// Ask the directory for servers and add them to the store.
    ///
    /// Returns the number of endpoints that were new to the store.
    pub async fn refresh_from_directory(&self) -> Result<usize> {
        let directory = self
            .directory
            .as_ref()
            .ok_or_else(|| TetherError::directory("no servers known and no directory configured"))?;
        let cell_id = self.cell_id();
        info!("Loading server list from directory (cell {})", cell_id);

        let endpoints = directory.resolve(cell_id).await?;
        let added = self.shared.store.extend(endpoints);
        debug!("Directory added {} servers", added);
        Ok(added)
    }

    fn fail_connect(&self, endpoint: Option<Endpoint>, error: &TetherError) {
        if let Some(endpoint) = endpoint {
            self.shared.store.mark_failed(&endpoint);
        }
        self.shared.disconnect_requested.store(false, Ordering::SeqCst);
        self.shared.state.store(ConnectionState::Disconnected);
        warn!("Connect failed: {}", error);
        self.shared.emit(Event::disconnected(DisconnectedInfo {
            user_initiated: false,
            endpoint,
            reason: Some(error.to_string()),
        }));
    }

    /// Close the current session.
    ///
    /// Returns `true` when a connected session was closed. While a connect
    /// is in flight the request is recorded and `false` is returned; that
    /// connect then closes its link, emits the `Disconnected` event and
    /// fails. Never waits on the dispatch loop or on a stalled send.
    pub async fn disconnect(&self) -> bool {
        let old = {
            let mut session = self.shared.session.lock().await;
            if !self
                .shared
                .state
                .transition(ConnectionState::Connected, ConnectionState::Disconnecting)
            {
                if self.state() == ConnectionState::Connecting {
                    debug!("Disconnect requested while connecting");
                    self.shared.disconnect_requested.store(true, Ordering::SeqCst);
                } else {
                    debug!("Disconnect ignored while {}", self.state());
                }
                return false;
            }
            session.take()
        };

        let endpoint = match old {
            Some(old) => Some(old.close(true).await),
            None => None,
        };

        self.shared.state.store(ConnectionState::Disconnected);
        info!("Disconnected");
        self.shared.emit(Event::disconnected(DisconnectedInfo {
            user_initiated: true,
            endpoint,
            reason: None,
        }));
        true
    }

    /// Send a message on the current session.
    ///
    /// Fails with `NotConnected` if the session is closed while the send is
    /// waiting for room on the link.
    pub async fn send(&self, message: WireMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(TetherError::NotConnected);
        }
        let (writer, closing) = {
            let session = self.shared.session.lock().await;
            let current = session.as_ref().ok_or(TetherError::NotConnected)?;
            (current.writer.clone(), current.closing.clone())
        };

        tokio::select! {
            result = async {
                let mut writer = writer.lock().await;
                if closing.is_cancelled() {
                    return Err(TetherError::NotConnected);
                }
                writer.send(&message).await
            } => result,
            _ = closing.cancelled() => Err(TetherError::NotConnected),
        }
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state())
            .field("connect_timeout", &self.connect_timeout)
            .field("has_directory", &self.directory.is_some())
            .finish()
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: Box<dyn LinkReader>, generation: u64) {
    let reason = loop {
        match reader.recv().await {
            Ok(Some(message)) => {
                if shared.events.enqueue(Event::from(message)).is_err() {
                    break "event dispatcher closed".to_string();
                }
            }
            Ok(None) => break "connection closed by peer".to_string(),
            // The frame was consumed whole, so the stream is still in sync.
            Err(TetherError::Json { message, .. }) => {
                warn!("Skipping malformed message: {}", message);
            }
            Err(e) => break e.to_string(),
        }
    };
    shared.severed(generation, reason).await;
}
