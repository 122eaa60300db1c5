//! Producer-side handle to the dispatch queue.

use crate::event::Event;
use crate::{Result, TetherError};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DispatchState {
    /// Not delivering. Events enqueued now are kept for the next start.
    Idle = 0,
    /// Delivering on every `run_once`.
    Draining = 1,
}

impl DispatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchState::Idle => "idle",
            DispatchState::Draining => "draining",
        }
    }
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct AtomicDispatchState(AtomicU8);

impl AtomicDispatchState {
    fn new(state: DispatchState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> DispatchState {
        match self.0.load(Ordering::SeqCst) {
            1 => DispatchState::Draining,
            _ => DispatchState::Idle,
        }
    }

    fn transition(&self, from: DispatchState, to: DispatchState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// An event tagged with the stop generation it was enqueued in.
#[derive(Debug)]
pub(super) struct Queued {
    pub(super) epoch: u64,
    pub(super) event: Event,
}

#[derive(Debug)]
pub(super) struct Shared {
    state: AtomicDispatchState,
    /// Bumped by every stop; queued events from older epochs are dropped.
    epoch: AtomicU64,
}

impl Shared {
    pub(super) fn new() -> Self {
        Self {
            state: AtomicDispatchState::new(DispatchState::Idle),
            epoch: AtomicU64::new(0),
        }
    }

    pub(super) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(super) fn start(&self) -> bool {
        self.state
            .transition(DispatchState::Idle, DispatchState::Draining)
    }
}

/// Cloneable handle for feeding and stopping an
/// [`EventDispatcher`](super::EventDispatcher) from any thread or task.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Queued>,
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    pub(super) fn new(tx: mpsc::UnboundedSender<Queued>, shared: Arc<Shared>) -> Self {
        Self { tx, shared }
    }

    /// Append an event to the queue. Never blocks.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        let queued = Queued {
            epoch: self.shared.epoch(),
            event,
        };
        self.tx
            .send(queued)
            .map_err(|_| TetherError::DispatcherClosed)
    }

    /// Stop delivery and discard everything queued so far.
    ///
    /// Returns `false` if the dispatcher was already idle.
    pub fn stop(&self) -> bool {
        if !self
            .shared
            .state
            .transition(DispatchState::Draining, DispatchState::Idle)
        {
            return false;
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Dispatcher stopped (epoch {})", epoch);
        true
    }

    pub fn state(&self) -> DispatchState {
        self.shared.state.load()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
