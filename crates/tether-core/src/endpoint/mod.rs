//! Candidate server endpoints.
//!
//! - [`Endpoint`]: an address/port value
//! - [`EndpointStore`]: the shared, internally synchronized endpoint list
//! - [`records`]: the little-endian record layout used by `servers.bin`

mod persist;
pub mod records;
mod store;
mod types;

pub use persist::{atomic_write, read_optional};
pub use store::EndpointStore;
pub use types::Endpoint;
