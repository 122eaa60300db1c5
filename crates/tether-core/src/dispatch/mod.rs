//! Single-task event dispatch.
//!
//! Producers push events through a [`DispatcherHandle`]. The task owning the
//! [`EventDispatcher`] calls [`run_once`](EventDispatcher::run_once), which
//! drains the queue and runs every handler on that task, so handlers never
//! run concurrently with each other.
//!
//! A handler that fails, by returning an error or by panicking, is logged
//! and counted; delivery continues with the next handler and the next event.

mod handle;

pub use handle::{DispatchState, DispatcherHandle};

use crate::cancel::CancellationToken;
use crate::event::{Event, EventKind};
use crate::job::JobRegistry;
use handle::{Queued, Shared};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Callback invoked for each event of a subscribed kind.
pub type Handler = Box<dyn FnMut(&Event) -> anyhow::Result<()> + Send>;

/// Token returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

/// Counters accumulated over the dispatcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events routed (including those no handler was subscribed to).
    pub delivered: u64,
    /// Events dropped because a stop happened after they were queued.
    pub discarded: u64,
    /// Events that completed an outstanding job.
    pub jobs_claimed: u64,
    pub handler_errors: u64,
    pub handler_panics: u64,
}

/// Routes queued events to handlers, in order, on the calling task.
pub struct EventDispatcher {
    rx: mpsc::UnboundedReceiver<Queued>,
    handle: DispatcherHandle,
    shared: Arc<Shared>,
    subscriptions: HashMap<EventKind, Vec<Subscription>>,
    next_subscription: u64,
    jobs: Option<Arc<JobRegistry>>,
    stats: DispatchStats,
}

impl EventDispatcher {
    /// Create an idle dispatcher with an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        Self {
            rx,
            handle: DispatcherHandle::new(tx, shared.clone()),
            shared,
            subscriptions: HashMap::new(),
            next_subscription: 0,
            jobs: None,
            stats: DispatchStats::default(),
        }
    }

    /// Claim jobs from `registry` as matching events are dispatched.
    pub fn with_job_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.jobs = Some(registry);
        self
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> DispatchState {
        self.handle.state()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Register a handler for one event kind.
    ///
    /// Handlers for the same kind run in registration order.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) -> anyhow::Result<()> + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions
            .entry(kind)
            .or_default()
            .push(Subscription {
                id,
                handler: Box::new(handler),
            });
        debug!("Subscribed {:?} to {}", id, kind);
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for handlers in self.subscriptions.values_mut() {
            if let Some(pos) = handlers.iter().position(|s| s.id == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn subscription_count(&self, kind: EventKind) -> usize {
        self.subscriptions.get(&kind).map_or(0, Vec::len)
    }

    /// Idle to Draining. Returns `false` if already draining.
    pub fn start(&self) -> bool {
        let started = self.shared.start();
        if started {
            debug!("Dispatcher started");
        }
        started
    }

    /// Draining to Idle, discarding queued events. See [`DispatcherHandle::stop`].
    pub fn stop(&self) -> bool {
        self.handle.stop()
    }

    /// Deliver every queued event, waiting up to `max_wait` if none are queued.
    ///
    /// Returns the number of events delivered. Does nothing while idle. A stop
    /// requested by a handler takes effect once the current batch is done.
    pub async fn run_once(&mut self, max_wait: Duration) -> usize {
        if self.state() != DispatchState::Draining {
            return 0;
        }

        let mut batch = Vec::new();
        while let Ok(queued) = self.rx.try_recv() {
            batch.push(queued);
        }
        if batch.is_empty() {
            match tokio::time::timeout(max_wait, self.rx.recv()).await {
                Ok(Some(queued)) => batch.push(queued),
                Ok(None) | Err(_) => return 0,
            }
            while let Ok(queued) = self.rx.try_recv() {
                batch.push(queued);
            }
        }

        let epoch = self.shared.epoch();
        let mut delivered = 0;
        for queued in batch {
            if queued.epoch != epoch {
                self.stats.discarded += 1;
                trace!("Discarding {} queued before stop", queued.event.kind());
                continue;
            }
            self.dispatch(queued.event);
            delivered += 1;
        }
        delivered
    }

    /// Call [`run_once`](Self::run_once) until `token` is cancelled or the
    /// dispatcher is stopped. Returns the total number of events delivered.
    pub async fn run_until_cancelled(&mut self, token: &CancellationToken, wait: Duration) -> usize {
        info!("Dispatch loop running");
        let mut total = 0;
        while !token.is_cancelled() && self.state() == DispatchState::Draining {
            tokio::select! {
                _ = token.cancelled() => break,
                delivered = self.run_once(wait) => total += delivered,
            }
        }
        info!("Dispatch loop exited after {} events", total);
        total
    }

    fn dispatch(&mut self, mut event: Event) {
        self.stats.delivered += 1;

        if let Some(jobs) = &self.jobs {
            let claimed = jobs.claim(&event);
            if claimed.is_some() {
                self.stats.jobs_claimed += 1;
            }
            event.set_claimed(claimed);
        }

        let kind = event.kind();
        let Some(handlers) = self.subscriptions.get_mut(&kind) else {
            trace!("No handlers for {}", kind);
            return;
        };

        for subscription in handlers.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscription.handler)(&event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.stats.handler_errors += 1;
                    warn!(
                        "Handler {:?} for {} failed: {:#}",
                        subscription.id, kind, e
                    );
                }
                Err(panic) => {
                    self.stats.handler_panics += 1;
                    error!(
                        "Handler {:?} for {} panicked: {}",
                        subscription.id,
                        kind,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("state", &self.state())
            .field("kinds", &self.subscriptions.len())
            .field("stats", &self.stats)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use std::sync::Mutex;

    const NO_WAIT: Duration = Duration::from_millis(10);

    fn message(n: u64) -> Event {
        Event::new(EventKind::Message(1), serde_json::json!(n))
    }

    fn recorder(dispatcher: &mut EventDispatcher, kind: EventKind) -> Arc<Mutex<Vec<u64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.subscribe(kind, move |event| {
            sink.lock().unwrap().push(event.payload().as_u64().unwrap_or(u64::MAX));
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn test_delivers_in_enqueue_order() {
        for n in [0u64, 1, 2, 17, 250] {
            let mut dispatcher = EventDispatcher::new();
            let seen = recorder(&mut dispatcher, EventKind::Message(1));
            dispatcher.start();

            let handle = dispatcher.handle();
            for i in 0..n {
                handle.enqueue(message(i)).unwrap();
            }

            let delivered = dispatcher.run_once(NO_WAIT).await;
            assert_eq!(delivered as u64, n);
            assert_eq!(*seen.lock().unwrap(), (0..n).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_idle_dispatcher_keeps_events() {
        let mut dispatcher = EventDispatcher::new();
        let seen = recorder(&mut dispatcher, EventKind::Message(1));
        dispatcher.handle().enqueue(message(1)).unwrap();

        assert_eq!(dispatcher.run_once(NO_WAIT).await, 0);
        assert!(seen.lock().unwrap().is_empty());

        dispatcher.start();
        assert_eq!(dispatcher.run_once(NO_WAIT).await, 1);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(EventKind::Message(1), |event| {
            if event.payload() == &serde_json::json!(0) {
                anyhow::bail!("first event rejected");
            }
            Ok(())
        });
        let seen = recorder(&mut dispatcher, EventKind::Message(1));
        dispatcher.start();

        let handle = dispatcher.handle();
        handle.enqueue(message(0)).unwrap();
        handle.enqueue(message(1)).unwrap();

        assert_eq!(dispatcher.run_once(NO_WAIT).await, 2);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(dispatcher.stats().handler_errors, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(EventKind::Message(1), |_| panic!("handler bug"));
        let seen = recorder(&mut dispatcher, EventKind::Message(1));
        dispatcher.start();

        let handle = dispatcher.handle();
        handle.enqueue(message(5)).unwrap();
        handle.enqueue(message(6)).unwrap();

        assert_eq!(dispatcher.run_once(NO_WAIT).await, 2);
        assert_eq!(*seen.lock().unwrap(), vec![5, 6]);
        assert_eq!(dispatcher.stats().handler_panics, 2);
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let mut dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            dispatcher.subscribe(EventKind::Connected, move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }
        dispatcher.start();
        dispatcher
            .handle()
            .enqueue(Event::new(EventKind::Connected, serde_json::Value::Null))
            .unwrap();

        dispatcher.run_once(NO_WAIT).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_routes_only_to_matching_kind() {
        let mut dispatcher = EventDispatcher::new();
        let ones = recorder(&mut dispatcher, EventKind::Message(1));
        let twos = recorder(&mut dispatcher, EventKind::Message(2));
        dispatcher.start();

        let handle = dispatcher.handle();
        handle.enqueue(message(10)).unwrap();
        handle
            .enqueue(Event::new(EventKind::Message(2), serde_json::json!(20)))
            .unwrap();
        handle
            .enqueue(Event::new(EventKind::LoggedOff, serde_json::json!(30)))
            .unwrap();

        assert_eq!(dispatcher.run_once(NO_WAIT).await, 3);
        assert_eq!(*ones.lock().unwrap(), vec![10]);
        assert_eq!(*twos.lock().unwrap(), vec![20]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let id = dispatcher.subscribe(EventKind::Message(1), move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        dispatcher.start();

        dispatcher.handle().enqueue(message(1)).unwrap();
        dispatcher.run_once(NO_WAIT).await;
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert_eq!(dispatcher.subscription_count(EventKind::Message(1)), 0);

        dispatcher.handle().enqueue(message(2)).unwrap();
        dispatcher.run_once(NO_WAIT).await;
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_discards_queued_but_keeps_later_events() {
        let mut dispatcher = EventDispatcher::new();
        let seen = recorder(&mut dispatcher, EventKind::Message(1));
        dispatcher.start();

        let handle = dispatcher.handle();
        handle.enqueue(message(1)).unwrap();
        handle.enqueue(message(2)).unwrap();
        assert!(handle.stop());
        assert!(!handle.stop());
        assert_eq!(handle.state(), DispatchState::Idle);

        handle.enqueue(message(3)).unwrap();
        assert_eq!(dispatcher.run_once(NO_WAIT).await, 0);

        dispatcher.start();
        assert_eq!(dispatcher.run_once(NO_WAIT).await, 1);
        assert_eq!(*seen.lock().unwrap(), vec![3]);
        assert_eq!(dispatcher.stats().discarded, 2);
    }

    #[tokio::test]
    async fn test_stop_from_handler_finishes_batch() {
        let mut dispatcher = EventDispatcher::new();
        let handle = dispatcher.handle();
        dispatcher.subscribe(EventKind::Message(1), move |_| {
            handle.stop();
            Ok(())
        });
        let seen = recorder(&mut dispatcher, EventKind::Message(1));
        dispatcher.start();

        let handle = dispatcher.handle();
        handle.enqueue(message(1)).unwrap();
        handle.enqueue(message(2)).unwrap();

        assert_eq!(dispatcher.run_once(NO_WAIT).await, 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
    }

    #[tokio::test]
    async fn test_empty_queue_waits_then_returns_zero() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.start();
        let started = std::time::Instant::now();
        assert_eq!(dispatcher.run_once(Duration::from_millis(30)).await, 0);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_wakes_for_event_from_other_task() {
        let mut dispatcher = EventDispatcher::new();
        let seen = recorder(&mut dispatcher, EventKind::Message(1));
        dispatcher.start();

        let handle = dispatcher.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.enqueue(message(9)).unwrap();
        });

        assert_eq!(dispatcher.run_once(Duration::from_secs(5)).await, 1);
        assert_eq!(*seen.lock().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_claims_outstanding_job_once() {
        let registry = Arc::new(JobRegistry::new());
        let mut dispatcher = EventDispatcher::new().with_job_registry(registry.clone());
        let claims = Arc::new(Mutex::new(Vec::new()));
        let sink = claims.clone();
        dispatcher.subscribe(EventKind::ServiceResponse, move |event| {
            sink.lock()
                .unwrap()
                .push(event.claimed_job().map(|job| job.job_id()));
            Ok(())
        });
        dispatcher.start();

        let job = registry.new_job(EventKind::ServiceResponse);
        let reply = Event::new(EventKind::ServiceResponse, serde_json::Value::Null).with_job(job);
        let handle = dispatcher.handle();
        handle.enqueue(reply.clone()).unwrap();
        handle.enqueue(reply).unwrap();
        handle
            .enqueue(
                Event::new(EventKind::ServiceResponse, serde_json::Value::Null)
                    .with_job(JobId::INVALID),
            )
            .unwrap();

        dispatcher.run_once(NO_WAIT).await;
        assert_eq!(*claims.lock().unwrap(), vec![Some(job), None, None]);
        assert!(registry.is_empty());
        assert_eq!(dispatcher.stats().jobs_claimed, 1);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let mut dispatcher = EventDispatcher::new();
        let token = CancellationToken::new();
        let stopper = token.clone();
        dispatcher.subscribe(EventKind::Message(1), move |event| {
            if event.payload() == &serde_json::json!(3) {
                stopper.cancel();
            }
            Ok(())
        });
        dispatcher.start();

        let handle = dispatcher.handle();
        for i in 1..=3 {
            handle.enqueue(message(i)).unwrap();
        }

        let total = dispatcher
            .run_until_cancelled(&token, Duration::from_millis(50))
            .await;
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let mut dispatcher = EventDispatcher::new();
        let handle = dispatcher.handle();
        dispatcher.subscribe(EventKind::Disconnected, move |_| {
            handle.stop();
            Ok(())
        });
        dispatcher.start();
        dispatcher
            .handle()
            .enqueue(Event::new(EventKind::Disconnected, serde_json::Value::Null))
            .unwrap();

        let total = dispatcher
            .run_until_cancelled(&CancellationToken::new(), Duration::from_millis(50))
            .await;
        assert_eq!(total, 1);
    }

    #[test]
    fn test_enqueue_after_drop_is_closed() {
        let dispatcher = EventDispatcher::new();
        let handle = dispatcher.handle();
        drop(dispatcher);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.enqueue(message(1)),
            Err(crate::TetherError::DispatcherClosed)
        ));
    }
}
