//! Typed events routed by the dispatcher.
//!
//! An [`Event`] is a kind tag, an optional job correlation id and a JSON
//! payload. Connection state changes are produced locally by the
//! supervisor; everything else arrives from the transport.

use crate::codec::DecodeError;
use crate::endpoint::Endpoint;
use crate::job::{JobId, OutstandingJob};
use crate::transport::WireMessage;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Type tag used to route events to subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    LogOn,
    LoggedOn,
    LogOff,
    LoggedOff,
    ServiceRequest,
    ServiceResponse,
    /// Application-defined message type.
    Message(u32),
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Connected => write!(f, "connected"),
            EventKind::Disconnected => write!(f, "disconnected"),
            EventKind::LogOn => write!(f, "log_on"),
            EventKind::LoggedOn => write!(f, "logged_on"),
            EventKind::LogOff => write!(f, "log_off"),
            EventKind::LoggedOff => write!(f, "logged_off"),
            EventKind::ServiceRequest => write!(f, "service_request"),
            EventKind::ServiceResponse => write!(f, "service_response"),
            EventKind::Message(id) => write!(f, "message({})", id),
        }
    }
}

/// Result code carried by server replies. `1` means success.
pub const RESULT_OK: i32 = 1;

/// Payload of a `Connected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedInfo {
    pub endpoint: Endpoint,
}

/// Payload of a `Disconnected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectedInfo {
    /// `true` when the application asked for the disconnect.
    pub user_initiated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `LoggedOn` / `LoggedOff` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub result: i32,
    #[serde(default)]
    pub extended_result: i32,
    /// Region hint handed out by the server on log-on.
    #[serde(default)]
    pub cell_id: Option<u32>,
}

impl SessionResult {
    pub fn is_ok(&self) -> bool {
        self.result == RESULT_OK
    }
}

/// Payload of a `ServiceResponse` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub method: String,
    pub result: i32,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl ServiceResponse {
    pub fn is_ok(&self) -> bool {
        self.result == RESULT_OK
    }

    /// Deserialize the response body into a concrete type.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| DecodeError::new(format!("{} response: {}", self.method, e)).into())
    }
}

/// One occurrence delivered through the dispatch loop.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    job_id: Option<JobId>,
    payload: serde_json::Value,
    claimed: Option<OutstandingJob>,
}

impl Event {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            job_id: None,
            payload,
            claimed: None,
        }
    }

    /// Attach a job correlation id.
    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn connected(endpoint: Endpoint) -> Self {
        Self::new(
            EventKind::Connected,
            serde_json::json!(ConnectedInfo { endpoint }),
        )
    }

    pub fn disconnected(info: DisconnectedInfo) -> Self {
        Self::new(EventKind::Disconnected, serde_json::json!(info))
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Deserialize the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| DecodeError::new(format!("{} payload: {}", self.kind, e)).into())
    }

    /// The outstanding job this event completed, if the dispatcher matched one.
    ///
    /// Only set while the event is being dispatched with a job registry
    /// attached. `None` means the event is not a reply to a request issued by
    /// this process, and handlers should ignore it.
    pub fn claimed_job(&self) -> Option<&OutstandingJob> {
        self.claimed.as_ref()
    }

    pub(crate) fn set_claimed(&mut self, job: Option<OutstandingJob>) {
        self.claimed = job;
    }
}

impl From<WireMessage> for Event {
    fn from(message: WireMessage) -> Self {
        Self {
            kind: message.kind,
            job_id: message.job_id,
            payload: message.payload,
            claimed: None,
        }
    }
}
