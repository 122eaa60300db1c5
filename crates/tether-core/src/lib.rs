//! Tether Core - a long-lived network client runtime.
//!
//! Provides an ordered, single-task event dispatch loop, job-id based
//! correlation of requests with their replies, and a persisted list of
//! candidate servers with a directory fallback when the list is empty.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether_core::{EventKind, HttpDirectory, ServiceRequest, TetherClient};
//!
//! #[tokio::main]
//! async fn main() -> tether_core::Result<()> {
//!     let (client, mut dispatcher) = TetherClient::builder()
//!         .data_dir("./tether-data")
//!         .directory(Arc::new(HttpDirectory::new()?))
//!         .build()?;
//!
//!     dispatcher.subscribe(EventKind::ServiceResponse, |event| {
//!         if let Some(job) = event.claimed_job() {
//!             println!("job {} answered: {}", job.job_id(), event.payload());
//!         }
//!         Ok(())
//!     });
//!
//!     client.bootstrap().await?;
//!     dispatcher.start();
//!     client.connect().await?;
//!     client.issue(ServiceRequest::method("Player", "GetGameBadgeLevels", 1)).await?;
//!
//!     dispatcher.run_once(Duration::from_secs(1)).await;
//!     client.persist()?;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod client;
pub mod codec;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod job;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use client::{ServiceRequest, StartupReport, TetherClient, TetherClientBuilder};
pub use codec::{DecodeError, Decoded, DecoderRegistry};
pub use directory::{CellId, DirectoryResolver, HttpDirectory, StaticDirectory};
pub use dispatch::{DispatchState, DispatchStats, DispatcherHandle, EventDispatcher, SubscriptionId};
pub use endpoint::{Endpoint, EndpointStore};
pub use error::{Result, TetherError};
pub use event::{
    ConnectedInfo, DisconnectedInfo, Event, EventKind, ServiceResponse, SessionResult, RESULT_OK,
};
pub use job::{JobId, JobIdGenerator, JobRegistry, OutstandingJob};
pub use supervisor::{ConnectionState, ConnectionSupervisor, ReconnectPolicy};
pub use transport::{
    Link, LinkReader, LinkWriter, MemoryListener, MemoryPeer, MemoryTransport, TcpTransport,
    Transport, WireMessage,
};
