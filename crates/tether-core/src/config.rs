//! Centralized configuration for Tether.
//!
//! Compile-time defaults for the dispatch loop, transport, directory lookup
//! and persisted state. Runtime overrides go through
//! [`TetherClientBuilder`](crate::TetherClientBuilder).

use std::time::Duration;

/// Client-level configuration.
pub struct ClientConfig;

impl ClientConfig {
    pub const APP_NAME: &'static str = "Tether";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Connect attempts made by the default reconnect policy.
    pub const RECONNECT_ATTEMPTS: u32 = 5;
    pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
    pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = concat!("Tether/", env!("CARGO_PKG_VERSION"));
}

/// Event dispatch loop configuration.
pub struct DispatchConfig;

impl DispatchConfig {
    /// Idle wait used by the reference loop between drains.
    pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);
}

/// Directory lookup configuration.
pub struct DirectoryConfig;

impl DirectoryConfig {
    pub const DEFAULT_URL: &'static str = "https://api.example.net/IDirectory/GetServerList/v1/";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// Result code reported by a healthy directory.
    pub const RESULT_OK: i32 = 1;
}

/// Wire transport configuration.
pub struct TransportConfig;

impl TransportConfig {
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
    /// Outbound messages buffered per in-memory link.
    pub const MEMORY_LINK_CAPACITY: usize = 256;
}

/// Persisted state file names, relative to the data directory.
pub struct PersistenceConfig;

impl PersistenceConfig {
    pub const SERVER_LIST_FILE: &'static str = "servers.bin";
    pub const CELL_ID_FILE: &'static str = "cellid.txt";
    pub const DATA_DIR_NAME: &'static str = "tether";
}
