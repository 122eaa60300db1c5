//! Region hint persisted between runs.

use crate::endpoint::{atomic_write, read_optional};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Region identifier handed out by the server on log-on and passed back to
/// the directory so it can suggest nearby servers. `0` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(u32);

impl CellId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Load a cell id stored as decimal text.
    ///
    /// A missing file yields `0`. Unparsable contents are logged and also
    /// yield `0`; only I/O errors are returned.
    pub fn load(path: &Path) -> Result<Self> {
        let Some(bytes) = read_optional(path)? else {
            return Ok(Self::default());
        };
        let text = String::from_utf8_lossy(&bytes);
        match text.trim().parse::<u32>() {
            Ok(id) => {
                info!("Using persisted cell ID {}", id);
                Ok(Self(id))
            }
            Err(_) => {
                warn!(
                    "Error parsing cell ID from {}. Continuing with cell ID 0.",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(self, path: &Path) -> Result<()> {
        atomic_write(path, self.0.to_string().as_bytes())
    }
}

impl From<u32> for CellId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
