use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::data::store::Store;
use crate::data::utils::{lock, read, write};
use crate::data::{
    change_channel_pair, Batch, ChangeAggregator, ChangeReceiver, ConcurrencyControl,
    DatabaseChange, DatabaseConfig, Delivery, DeliveryMode, DeliveryQueue, Dispatcher,
    DispatcherMetrics, Document, DocumentChange, Listener, ListenerRegistry, ListenerToken,
    MutationEntry, MutationLog, WriteError,
};
use crate::{Error, Result};

/// An in-memory document database that reports committed changes to listeners.
///
/// Writes are serialized: one transaction commits at a time. Every commit is
/// appended to the mutation log, grouped into a single change set, and handed
/// to the dispatcher. Listeners registered without a queue follow
/// [`DatabaseConfig::delivery`].
pub struct Database {
    name: String,
    config: DatabaseConfig,
    writer: Mutex<()>,
    store: RwLock<Store>,
    log: MutationLog,
    aggregator: ChangeAggregator,
    registry: Arc<ListenerRegistry>,
    dispatcher: Dispatcher,
    main_queue: DeliveryQueue,
}

impl Database {
    pub fn open(name: impl Into<String>, config: DatabaseConfig) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Config("database name must not be empty".to_string()));
        }
        config.validate()?;

        let registry = ListenerRegistry::new();
        let main_queue = DeliveryQueue::new(config.queue_name.clone())?;

        log::info!("Opened database '{}' ({:?} delivery)", name, config.delivery);

        Ok(Database {
            log: MutationLog::new(config.mutation_log_capacity),
            aggregator: ChangeAggregator::new(name.clone()),
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            main_queue,
            writer: Mutex::new(()),
            store: RwLock::new(Store::new()),
            name,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        read(&self.store).is_open()
    }

    /// Number of stored documents
    pub fn count(&self) -> usize {
        read(&self.store).len()
    }

    /// A copy of the stored document, if any
    pub fn document(&self, document_id: &str) -> Option<Document> {
        read(&self.store).get(document_id).cloned()
    }

    /// A new, unsaved document. Saving it creates it.
    pub fn create_document(&self, document_id: impl Into<String>) -> Document {
        Document::new(document_id)
    }

    pub fn save(&self, document: &mut Document) -> Result<()> {
        self.in_batch(|batch| batch.save(document))
    }

    pub fn save_with(&self, document: &mut Document, control: ConcurrencyControl) -> Result<()> {
        self.in_batch(|batch| batch.save_with(document, control))
    }

    pub fn delete(&self, document: &Document) -> Result<()> {
        self.in_batch(|batch| batch.delete(document))
    }

    pub fn delete_with(&self, document: &Document, control: ConcurrencyControl) -> Result<()> {
        self.in_batch(|batch| batch.delete_with(document, control))
    }

    pub fn purge(&self, document_id: &str) -> Result<()> {
        self.in_batch(|batch| batch.purge(document_id))
    }

    /// Run `body` as one transaction.
    ///
    /// All writes staged on the [`Batch`] commit together if `body` returns
    /// `Ok`, producing one database change. An `Err` (or a panic) discards
    /// them and nothing is reported to listeners.
    ///
    /// The database write lock is held while `body` runs. Write through the
    /// batch; calling `save` or `close` on the database from inside `body`
    /// deadlocks. Removing a listener from inside `body` is allowed, but an
    /// invocation of it already running on another thread is only waited for
    /// once the lock is released, just before this returns.
    pub fn in_batch<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut Batch<'_>) -> Result<T>,
    {
        let writer = WriteSection::enter(self);

        let (value, staged, mutations) = {
            let store = read(&self.store);
            if !store.is_open() {
                return Err(WriteError::NotOpen.into());
            }

            let mut batch = Batch::new(&store);
            let value = match body(&mut batch) {
                Ok(value) => value,
                Err(e) => {
                    log::debug!("Rolled back batch on '{}': {}", self.name, e);
                    return Err(e);
                }
            };
            let (staged, mutations) = batch.into_parts();
            (value, staged, mutations)
        };

        if mutations.is_empty() {
            return Ok(value);
        }

        let entries = {
            let mut store = write(&self.store);
            store.apply(staged);
            self.log.append(mutations)
        };

        let pending = match self.aggregator.aggregate(&entries) {
            Some(changes) => {
                log::debug!(
                    "Committed {} document(s) on '{}' at sequence {}",
                    changes.len(),
                    self.name,
                    changes.database.sequence
                );
                Some(self.dispatcher.dispatch(changes))
            }
            None => None,
        };

        drop(writer);

        if let Some(pending) = pending {
            pending.run();
        }

        Ok(value)
    }

    /// Listen for every committed change in this database
    pub fn add_change_listener<F>(&self, listener: F) -> ListenerToken
    where
        F: Fn(&DatabaseChange) + Send + Sync + 'static,
    {
        self.add_change_listener_with_queue(None, listener)
    }

    /// Like [`Database::add_change_listener`], delivering on `queue`
    /// (or the configured default when `None`)
    pub fn add_change_listener_with_queue<F>(&self, queue: Option<&DeliveryQueue>, listener: F) -> ListenerToken
    where
        F: Fn(&DatabaseChange) + Send + Sync + 'static,
    {
        self.register(Listener::database(listener), queue)
    }

    /// Listen for changes to a single document
    pub fn add_document_change_listener<F>(&self, document_id: impl Into<String>, listener: F) -> ListenerToken
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        self.add_document_change_listener_with_queue(document_id, None, listener)
    }

    pub fn add_document_change_listener_with_queue<F>(
        &self,
        document_id: impl Into<String>,
        queue: Option<&DeliveryQueue>,
        listener: F,
    ) -> ListenerToken
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        self.register(Listener::document(document_id, listener), queue)
    }

    /// Stream database changes to an async consumer.
    ///
    /// Delivery into the channel is synchronous; drop the receiver or remove
    /// the token to stop.
    pub fn change_channel(&self) -> (ListenerToken, ChangeReceiver) {
        let (sender, receiver) = change_channel_pair();
        let listener = Listener::database(move |change: &DatabaseChange| {
            if sender.send(change.clone()).is_err() {
                log::debug!("Change receiver dropped, discarding change {}", change.sequence);
            }
        });
        let token = self.registry.register(listener, Delivery::Synchronous);
        (token, receiver)
    }

    /// Remove a listener. Unknown or already removed tokens are ignored.
    ///
    /// Once this returns the listener will not be called again. Inside an
    /// [`Database::in_batch`] body the listener cannot start again either, but
    /// a call already in progress elsewhere may still be finishing until the
    /// batch ends.
    pub fn remove_change_listener(&self, token: &ListenerToken) {
        if !self.registry.unregister(token) {
            log::debug!("Ignoring removal of unknown listener {}", token);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Block until queued deliveries for everything committed so far have run
    pub fn flush_notifications(&self) {
        self.main_queue.flush();
        for queue in self.registry.queues() {
            if !queue.same_queue(&self.main_queue) {
                queue.flush();
            }
        }
    }

    /// Sequence of the last committed mutation (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.log.last_sequence()
    }

    /// Retained mutation log entries after `sequence`
    pub fn changes_since(&self, sequence: u64) -> Vec<MutationEntry> {
        self.log.changes_since(sequence)
    }

    pub fn dispatcher_metrics(&self) -> &DispatcherMetrics {
        self.dispatcher.metrics()
    }

    /// Close the database: drop every listener, drain the main queue and
    /// reject further writes with [`WriteError::NotOpen`].
    pub fn close(&self) {
        {
            let _writer = lock(&self.writer);
            if !write(&self.store).close() {
                return;
            }
        }

        // Cleared outside the write lock: removal waits for running listeners,
        // which may themselves be blocked trying to write.
        let removed = self.registry.close();
        self.main_queue.shutdown();
        log::info!("Closed database '{}' ({} listener(s) removed)", self.name, removed);
    }

    fn register(&self, listener: Listener, queue: Option<&DeliveryQueue>) -> ListenerToken {
        let delivery = match queue {
            Some(queue) => Delivery::Queued(queue.clone()),
            None => match self.config.delivery {
                DeliveryMode::Synchronous => Delivery::Synchronous,
                DeliveryMode::Queued => Delivery::Queued(self.main_queue.clone()),
            },
        };
        self.registry.register(listener, delivery)
    }
}

/// Holds the writer lock for one transaction.
///
/// Listener removals made on this thread meanwhile skip their wait for
/// in-flight callbacks; the waits run after the lock is released, since such
/// a callback may be blocked on the writer itself.
struct WriteSection<'a> {
    registry: &'a ListenerRegistry,
    guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> WriteSection<'a> {
    fn enter(database: &'a Database) -> Self {
        let guard = lock(&database.writer);
        database.registry.defer_waits();
        WriteSection {
            registry: &database.registry,
            guard: Some(guard),
        }
    }
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        let deferred = self.registry.take_deferred();
        drop(self.guard.take());
        for subscription in deferred {
            subscription.wait_idle();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("documents", &self.count())
            .field("listeners", &self.registry.len())
            .finish()
    }
}
