//! In-memory endpoint list with snapshot reads and binary persistence.

use super::persist::{atomic_write, read_optional};
use super::records::{put_record, read_records, record_len};
use super::Endpoint;
use crate::{Result, TetherError};
use bytes::{Bytes, BytesMut};
use std::io::Write;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Entry {
    endpoint: Endpoint,
    last_failure: Option<Instant>,
}

/// Ordered, duplicate-free set of candidate server endpoints.
///
/// Internally synchronized: share it with `Arc` and call any method from any
/// thread. Readers always get a copy, so iteration never races with
/// `add`. Endpoints that fail a connection attempt are deprioritized by
/// [`mark_failed`](Self::mark_failed) rather than removed.
#[derive(Debug, Default)]
pub struct EndpointStore {
    entries: RwLock<Vec<Entry>>,
}

impl EndpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `endpoints`, dropping duplicates.
    pub fn with_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let store = Self::new();
        store.extend(endpoints);
        store
    }

    // The list is only ever mutated by whole-entry pushes/removals, so a
    // poisoned lock still guards a consistent Vec.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `endpoint` if absent. Returns `true` if it was inserted.
    pub fn add(&self, endpoint: Endpoint) -> bool {
        let mut entries = self.write();
        if entries.iter().any(|e| e.endpoint == endpoint) {
            return false;
        }
        entries.push(Entry {
            endpoint,
            last_failure: None,
        });
        true
    }

    /// Add every endpoint, returning how many were new.
    pub fn extend(&self, endpoints: impl IntoIterator<Item = Endpoint>) -> usize {
        endpoints
            .into_iter()
            .filter(|ep| self.add(*ep))
            .count()
    }

    /// Point-in-time copy of all endpoints in insertion order.
    pub fn snapshot_all(&self) -> Vec<Endpoint> {
        self.read().iter().map(|e| e.endpoint).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.read().iter().any(|e| &e.endpoint == endpoint)
    }

    /// Pick the endpoint to try next.
    ///
    /// The first endpoint that has never failed wins; when every endpoint
    /// has failed, the one whose failure is oldest is retried first.
    pub fn next_candidate(&self) -> Option<Endpoint> {
        let entries = self.read();
        entries
            .iter()
            .find(|e| e.last_failure.is_none())
            .or_else(|| entries.iter().min_by_key(|e| e.last_failure))
            .map(|e| e.endpoint)
    }

    /// Record a failed connection attempt against `endpoint`.
    pub fn mark_failed(&self, endpoint: &Endpoint) {
        let mut entries = self.write();
        if let Some(entry) = entries.iter_mut().find(|e| &e.endpoint == endpoint) {
            entry.last_failure = Some(Instant::now());
            debug!("Deprioritized endpoint {}", endpoint);
        }
    }

    /// Clear any failure recorded against `endpoint`.
    pub fn mark_good(&self, endpoint: &Endpoint) {
        let mut entries = self.write();
        if let Some(entry) = entries.iter_mut().find(|e| &e.endpoint == endpoint) {
            entry.last_failure = None;
        }
    }

    /// Check whether `endpoint` currently carries a failure mark.
    pub fn is_failed(&self, endpoint: &Endpoint) -> bool {
        self.read()
            .iter()
            .any(|e| &e.endpoint == endpoint && e.last_failure.is_some())
    }

    /// Remove `endpoint`. Returns `true` if it was present.
    pub fn evict(&self, endpoint: &Endpoint) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| &e.endpoint != endpoint);
        entries.len() < before
    }

    /// Replace the whole list, e.g. with a fresh directory result.
    pub fn replace_all(&self, endpoints: impl IntoIterator<Item = Endpoint>) {
        let mut fresh: Vec<Entry> = Vec::new();
        for endpoint in endpoints {
            if !fresh.iter().any(|e| e.endpoint == endpoint) {
                fresh.push(Entry {
                    endpoint,
                    last_failure: None,
                });
            }
        }
        *self.write() = fresh;
    }

    /// Parse persisted records and add each endpoint.
    ///
    /// Returns the number of records read. A malformed record yields
    /// [`TetherError::CorruptPersistedState`]; endpoints read before it stay
    /// in the store.
    pub fn load_from(&self, bytes: &[u8]) -> Result<usize> {
        read_records(bytes, |endpoint| {
            self.add(endpoint);
        })
    }

    /// Encode the current snapshot as persisted records.
    pub fn encode(&self) -> Bytes {
        let snapshot = self.snapshot_all();
        let mut buf = BytesMut::with_capacity(snapshot.iter().map(record_len).sum());
        for endpoint in &snapshot {
            put_record(&mut buf, endpoint);
        }
        buf.freeze()
    }

    /// Write the current snapshot as persisted records to `sink`.
    ///
    /// Returns the number of endpoints written; an empty store writes nothing.
    pub fn save_to<W: Write>(&self, mut sink: W) -> Result<usize> {
        let snapshot = self.snapshot_all();
        let mut buf = BytesMut::with_capacity(snapshot.iter().map(record_len).sum());
        for endpoint in &snapshot {
            put_record(&mut buf, endpoint);
        }
        if !buf.is_empty() {
            sink.write_all(&buf)?;
            sink.flush()?;
        }
        Ok(snapshot.len())
    }

    /// Load endpoints from a server list file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load_file(&self, path: &Path) -> Result<Option<usize>> {
        let Some(bytes) = read_optional(path)? else {
            debug!("No server list at {}", path.display());
            return Ok(None);
        };

        match self.load_from(&bytes) {
            Ok(count) => {
                info!("Loaded {} servers from {}", count, path.display());
                Ok(Some(count))
            }
            Err(e @ TetherError::CorruptPersistedState { .. }) => {
                warn!(
                    "Server list {} is corrupt, kept {} servers: {}",
                    path.display(),
                    self.len(),
                    e
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the current snapshot to a server list file atomically.
    pub fn save_file(&self, path: &Path) -> Result<usize> {
        let bytes = self.encode();
        let count = self.len();
        atomic_write(path, &bytes)?;
        info!("Saved {} servers to {}", count, path.display());
        Ok(count)
    }
}
