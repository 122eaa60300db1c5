//! Request/response correlation.
//!
//! Every request that expects a reply is stamped with a [`JobId`]. The
//! [`JobRegistry`] remembers which ids are still in flight so the dispatcher
//! can tell replies to this process apart from stale or foreign ones.

mod id;
mod registry;

pub use id::{JobId, JobIdGenerator};
pub use registry::{JobRegistry, OutstandingJob};
