mod aggregator;
mod batch;
mod config;
mod database;
mod delivery_queue;
mod dispatcher;
mod document;
mod error;
mod listener_token;
mod mutation_log;
mod notifications;
mod registry;
mod store;
mod utils;

pub use aggregator::{ChangeAggregator, ChangeSet};
pub use batch::Batch;
pub use config::{DatabaseConfig, DeliveryMode, ENV_DELIVERY, ENV_LOG_CAPACITY};
pub use database::Database;
pub use delivery_queue::DeliveryQueue;
pub use dispatcher::{Dispatcher, DispatcherMetrics, PendingDeliveries};
pub use document::{ConcurrencyControl, Document};
pub use error::{Error, Result, WriteError};
pub use listener_token::ListenerToken;
pub use mutation_log::{MutationEntry, MutationLog};
pub use notifications::{change_channel_pair, ChangeKind, ChangeReceiver, ChangeSender, DatabaseChange, DocumentChange};
pub use registry::{
    DatabaseCallback, Delivery, DocumentCallback, Invocation, Listener, ListenerRegistry,
    ListenerScope, Subscription, SubscriptionState,
};

pub type Timestamp = time::OffsetDateTime;

pub fn now() -> Timestamp {
    time::OffsetDateTime::now_utc()
}
