//! Session transports.
//!
//! A [`Transport`] opens a [`Link`] to an [`Endpoint`]. The link is split
//! into a [`LinkReader`], owned by the supervisor's reader task, and a
//! [`LinkWriter`], shared by everything that sends.
//!
//! Two implementations ship with the crate:
//! - [`TcpTransport`]: length-prefixed JSON frames over TCP
//! - [`MemoryTransport`]: in-process channels, with a [`MemoryPeer`] playing
//!   the server side

pub mod frame;
mod memory;
mod tcp;

pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;

use crate::endpoint::Endpoint;
use crate::event::EventKind;
use crate::job::JobId;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One message as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: EventKind,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WireMessage {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            job_id: None,
            payload,
        }
    }

    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Reply to this message, echoing its job id.
    pub fn reply(&self, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            job_id: self.job_id,
            payload,
        }
    }
}

/// Opens sessions to endpoints.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, endpoint: Endpoint) -> Result<Link>;
}

/// Inbound half of a session.
#[async_trait]
pub trait LinkReader: Send + 'static {
    /// Next message, or `None` once the peer closed the session cleanly.
    async fn recv(&mut self) -> Result<Option<WireMessage>>;
}

/// Outbound half of a session.
#[async_trait]
pub trait LinkWriter: Send + 'static {
    async fn send(&mut self, message: &WireMessage) -> Result<()>;

    /// Close the session. Further sends fail.
    async fn close(&mut self) -> Result<()>;
}

/// An established session.
pub struct Link {
    pub reader: Box<dyn LinkReader>,
    pub writer: Box<dyn LinkWriter>,
}

impl Link {
    pub fn new(reader: impl LinkReader, writer: impl LinkWriter) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn into_split(self) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}
