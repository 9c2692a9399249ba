//! Listener registry.
//!
//! Subscriptions live in an ordered map keyed by registration order, so a
//! lookup returns them in the order they were added. Lookups clone
//! `Arc<Subscription>` handles out from under a read lock and return the
//! snapshot. Callbacks never run while the registry lock is held, so a
//! listener is free to register or remove listeners itself.
//!
//! Removal is synchronous with respect to dispatch. Each subscription has a
//! gate that records which threads are currently invoking it. `unregister`
//! marks the subscription removed and then waits for invocations on other
//! threads to finish. Once it returns, the callback will not run again. Every
//! caller holding the token waits, not only the one that took the entry out
//! of the map, because the token keeps a weak handle to its subscription.
//!
//! A thread inside a write section (see [`ListenerRegistry::defer_waits`])
//! cannot wait there: the running callback may itself be blocked on the
//! writer. Its removals flip the state immediately and the wait happens when
//! the section ends.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, ThreadId};

use ahash::{AHashMap, AHashSet};
use uuid::Uuid;

use crate::data::utils::{lock, panic_message, read, write};
use crate::data::{DatabaseChange, DeliveryQueue, DocumentChange, ListenerToken};

/// Callback for database-wide changes
pub type DatabaseCallback = Arc<dyn Fn(&DatabaseChange) + Send + Sync + 'static>;

/// Callback for changes to a single document
pub type DocumentCallback = Arc<dyn Fn(&DocumentChange) + Send + Sync + 'static>;

/// What a subscription is registered against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    AllDocuments,
    Document(String),
}

/// A registered callback together with its scope
#[derive(Clone)]
pub enum Listener {
    Database(DatabaseCallback),
    Document {
        document_id: String,
        callback: DocumentCallback,
    },
}

impl Listener {
    pub fn database<F>(f: F) -> Self
    where
        F: Fn(&DatabaseChange) + Send + Sync + 'static,
    {
        Listener::Database(Arc::new(f))
    }

    pub fn document<F>(document_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        Listener::Document {
            document_id: document_id.into(),
            callback: Arc::new(f),
        }
    }

    pub fn scope(&self) -> ListenerScope {
        match self {
            Listener::Database(_) => ListenerScope::AllDocuments,
            Listener::Document { document_id, .. } => ListenerScope::Document(document_id.clone()),
        }
    }
}

/// Where a subscription's callback runs
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Inline on the committing thread, after the write lock is released
    Synchronous,
    /// On the given queue's worker thread
    Queued(DeliveryQueue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Removed,
}

/// Result of attempting one callback invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Delivered,
    /// The subscription was removed before the callback could start
    Skipped,
    /// The callback panicked; the panic was contained
    Failed(String),
}

struct Gate {
    state: SubscriptionState,
    running: Vec<ThreadId>,
}

/// One registration: token, callback and delivery.
pub struct Subscription {
    id: Uuid,
    order: u64,
    listener: Listener,
    delivery: Delivery,
    gate: Mutex<Gate>,
    idle: Condvar,
}

impl Subscription {
    pub fn scope(&self) -> ListenerScope {
        self.listener.scope()
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn state(&self) -> SubscriptionState {
        lock(&self.gate).state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// Registration order; lower registered earlier
    pub fn order(&self) -> u64 {
        self.order
    }

    /// Run `f` against the callback if the subscription is still active.
    ///
    /// A panic inside `f` is caught and reported as [`Invocation::Failed`].
    pub fn invoke<F>(&self, f: F) -> Invocation
    where
        F: FnOnce(&Listener),
    {
        let me = thread::current().id();
        {
            let mut gate = lock(&self.gate);
            if gate.state == SubscriptionState::Removed {
                return Invocation::Skipped;
            }
            gate.running.push(me);
        }

        let result = catch_unwind(AssertUnwindSafe(|| f(&self.listener)));

        {
            let mut gate = lock(&self.gate);
            if let Some(pos) = gate.running.iter().position(|t| *t == me) {
                gate.running.swap_remove(pos);
            }
        }
        self.idle.notify_all();

        match result {
            Ok(()) => Invocation::Delivered,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                log::error!("Change listener {} panicked: {}", self.id, msg);
                Invocation::Failed(msg)
            }
        }
    }

    /// Transition to `Removed`. No invocation starts after this returns.
    fn deactivate(&self) {
        lock(&self.gate).state = SubscriptionState::Removed;
    }

    /// Block until no other thread is inside the callback.
    pub(crate) fn wait_idle(&self) {
        let me = thread::current().id();
        let mut gate = lock(&self.gate);

        // An invocation on this thread is the caller itself (a listener
        // removing a token from inside its callback); waiting would deadlock.
        while gate.running.iter().any(|t| *t != me) {
            gate = self
                .idle
                .wait(gate)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("scope", &self.scope())
            .field("delivery", &self.delivery)
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    by_order: BTreeMap<u64, Arc<Subscription>>,
    by_token: AHashMap<Uuid, u64>,
    closed: bool,
}

/// Waits postponed by the thread that currently owns the write section
struct Deferral {
    thread: ThreadId,
    waits: Vec<Arc<Subscription>>,
}

/// Mapping from scope to registered callbacks, keyed by token.
pub struct ListenerRegistry {
    state: RwLock<RegistryState>,
    next_order: AtomicU64,
    deferral: Mutex<Option<Deferral>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(ListenerRegistry {
            state: RwLock::new(RegistryState::default()),
            next_order: AtomicU64::new(0),
            deferral: Mutex::new(None),
        })
    }

    /// Add a subscription and hand back its token. Never fails.
    ///
    /// On a closed registry nothing is stored and the token is inert.
    pub fn register(self: &Arc<Self>, listener: Listener, delivery: Delivery) -> ListenerToken {
        let id = Uuid::new_v4();
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);

        let subscription = Arc::new(Subscription {
            id,
            order,
            listener,
            delivery,
            gate: Mutex::new(Gate {
                state: SubscriptionState::Active,
                running: Vec::new(),
            }),
            idle: Condvar::new(),
        });
        let token = ListenerToken::new(id, Arc::downgrade(self), Arc::downgrade(&subscription));

        let mut state = write(&self.state);
        if state.closed {
            log::warn!("Ignoring listener {} registered after close", id);
            return token;
        }

        log::debug!("Registering listener {} for {:?}", id, subscription.scope());
        state.by_order.insert(order, subscription);
        state.by_token.insert(id, order);

        token
    }

    /// Remove the subscription behind `token`.
    ///
    /// Unknown or already removed tokens are a no-op and return false. When
    /// this returns the callback is guaranteed not to run again.
    pub fn unregister(&self, token: &ListenerToken) -> bool {
        if !token.belongs_to(self) {
            return false;
        }

        let removed = {
            let mut state = write(&self.state);
            state
                .by_token
                .remove(token.as_uuid())
                .and_then(|order| state.by_order.remove(&order))
                .is_some()
        };

        // A concurrent remover or `clear` may have taken the entry already;
        // the subscription is still reachable through the token while any
        // invocation holds it, so this caller waits too.
        if let Some(subscription) = token.subscription() {
            subscription.deactivate();
            self.wait_for(subscription);
        }

        if removed {
            log::debug!("Removed listener {}", token);
        }
        removed
    }

    /// Postpone removal waits made on this thread until [`take_deferred`]
    /// is called.
    ///
    /// Used while the database writer lock is held.
    ///
    /// [`take_deferred`]: ListenerRegistry::take_deferred
    pub(crate) fn defer_waits(&self) {
        *lock(&self.deferral) = Some(Deferral {
            thread: thread::current().id(),
            waits: Vec::new(),
        });
    }

    /// End deferral and return the subscriptions still to be waited on.
    pub(crate) fn take_deferred(&self) -> Vec<Arc<Subscription>> {
        lock(&self.deferral)
            .take()
            .map(|deferral| deferral.waits)
            .unwrap_or_default()
    }

    fn wait_for(&self, subscription: Arc<Subscription>) {
        {
            let mut deferral = lock(&self.deferral);
            if let Some(deferral) = deferral.as_mut() {
                if deferral.thread == thread::current().id() {
                    deferral.waits.push(subscription);
                    return;
                }
            }
        }
        subscription.wait_idle();
    }

    /// Snapshot of the subscriptions interested in `change`, in registration order.
    ///
    /// That is every database-wide subscription plus every document
    /// subscription whose id appears in the change.
    pub fn lookup(&self, change: &DatabaseChange) -> Vec<Arc<Subscription>> {
        let ids: AHashSet<&str> = change.document_ids.iter().map(String::as_str).collect();
        let state = read(&self.state);
        state
            .by_order
            .values()
            .filter(|sub| match &sub.listener {
                Listener::Database(_) => true,
                Listener::Document { document_id, .. } => ids.contains(document_id.as_str()),
            })
            .cloned()
            .collect()
    }

    /// Distinct queues used by the current subscriptions
    pub fn queues(&self) -> Vec<DeliveryQueue> {
        let state = read(&self.state);
        let mut queues: Vec<DeliveryQueue> = Vec::new();
        for sub in state.by_order.values() {
            if let Delivery::Queued(queue) = &sub.delivery {
                if !queues.iter().any(|q| q.same_queue(queue)) {
                    queues.push(queue.clone());
                }
            }
        }
        queues
    }

    pub fn contains(&self, token: &ListenerToken) -> bool {
        read(&self.state).by_token.contains_key(token.as_uuid())
    }

    pub fn len(&self) -> usize {
        read(&self.state).by_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every subscription. Returns how many were removed.
    pub fn clear(&self) -> usize {
        self.drain(false)
    }

    /// Remove every subscription and refuse new ones.
    pub fn close(&self) -> usize {
        self.drain(true)
    }

    pub fn is_closed(&self) -> bool {
        read(&self.state).closed
    }

    fn drain(&self, close: bool) -> usize {
        let removed = {
            let mut state = write(&self.state);
            state.closed |= close;
            state.by_token.clear();
            std::mem::take(&mut state.by_order)
        };

        let subscriptions: Vec<Arc<Subscription>> = removed.into_values().collect();
        for subscription in &subscriptions {
            subscription.deactivate();
        }
        let count = subscriptions.len();
        for subscription in subscriptions {
            self.wait_for(subscription);
        }
        count
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}
