use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::data::{ChangeSet, Delivery, Invocation, Listener, ListenerRegistry, Subscription};

/// Counters describing what the dispatcher has done so far.
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    /// Change sets handed to the dispatcher
    pub events_dispatched: AtomicU64,
    /// Callback invocations that completed
    pub deliveries: AtomicU64,
    /// Invocations skipped because the subscription was removed first
    pub skipped: AtomicU64,
    /// Invocations whose callback panicked
    pub failures: AtomicU64,
}

impl DispatcherMetrics {
    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched.load(Ordering::Relaxed)
    }

    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn record(&self, invocation: &Invocation) {
        let counter = match invocation {
            Invocation::Delivered => &self.deliveries,
            Invocation::Skipped => &self.skipped,
            Invocation::Failed(_) => &self.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Routes committed change sets to the subscriptions that want them.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ListenerRegistry>,
    metrics: Arc<DispatcherMetrics>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Dispatcher {
            registry,
            metrics: Arc::new(DispatcherMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &DispatcherMetrics {
        &self.metrics
    }

    /// Resolve subscribers for `changes` and start delivery.
    ///
    /// Queued subscriptions are enqueued right away, so calling this while
    /// holding the commit lock keeps every queue in commit order. Synchronous
    /// subscriptions are returned as [`PendingDeliveries`] for the caller to
    /// run once its locks are released.
    pub fn dispatch(&self, changes: ChangeSet) -> PendingDeliveries {
        let subscriptions = self.registry.lookup(&changes.database);
        let changes = Arc::new(changes);
        self.metrics.events_dispatched.fetch_add(1, Ordering::Relaxed);

        let mut inline = Vec::new();
        for subscription in subscriptions {
            let queue = match subscription.delivery() {
                Delivery::Synchronous => None,
                Delivery::Queued(queue) => Some(queue.clone()),
            };

            match queue {
                None => inline.push(subscription),
                Some(queue) => {
                    let changes = Arc::clone(&changes);
                    let metrics = Arc::clone(&self.metrics);
                    let enqueued = queue.enqueue(move || {
                        deliver(&subscription, &changes, &metrics);
                    });
                    if !enqueued {
                        self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        PendingDeliveries {
            changes,
            subscriptions: inline,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Synchronous deliveries that have been resolved but not yet run.
#[must_use = "synchronous listeners only run when `run` is called"]
pub struct PendingDeliveries {
    changes: Arc<ChangeSet>,
    subscriptions: Vec<Arc<Subscription>>,
    metrics: Arc<DispatcherMetrics>,
}

impl PendingDeliveries {
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Invoke each callback in registration order on the current thread.
    pub fn run(self) {
        for subscription in &self.subscriptions {
            deliver(subscription, &self.changes, &self.metrics);
        }
    }
}

fn deliver(subscription: &Subscription, changes: &ChangeSet, metrics: &DispatcherMetrics) {
    let invocation = subscription.invoke(|listener| match listener {
        Listener::Database(callback) => callback(&changes.database),
        Listener::Document {
            document_id,
            callback,
        } => {
            if let Some(change) = changes.document(document_id) {
                callback(change);
            }
        }
    });
    metrics.record(&invocation);
}
