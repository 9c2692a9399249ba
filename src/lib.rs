pub mod data;

#[doc(hidden)]
pub use serde_json;

#[cfg(test)]
mod test;

pub use data::{
    Batch, ChangeAggregator, ChangeKind, ChangeReceiver, ChangeSet, ConcurrencyControl, Database,
    DatabaseChange, DatabaseConfig, Delivery, DeliveryMode, DeliveryQueue, Dispatcher,
    DispatcherMetrics, Document, DocumentChange, Error, Invocation, Listener, ListenerRegistry,
    ListenerScope, ListenerToken, MutationEntry, MutationLog, Result, SubscriptionState,
    Timestamp, WriteError, now,
};

/// Open a database with the configuration from the environment
///
/// # Example
///
/// ```
/// let db = docnotify::open("app").unwrap();
/// let token = db.add_change_listener(|change| {
///     println!("{} document(s) changed", change.document_ids.len());
/// });
/// db.remove_change_listener(&token);
/// ```
pub fn open(name: &str) -> Result<Database> {
    Database::open(name, DatabaseConfig::from_env())
}

/// Build a `serde_json::Map` of document properties with minimal syntax
///
/// # Example
///
/// ```
/// let doc = docnotify::Document::with_properties(
///     "doc1",
///     docnotify::props!{ "name" => "Scott", "age" => 42 },
/// );
/// assert_eq!(doc.string("name"), Some("Scott"));
/// ```
#[macro_export]
macro_rules! props {
    {} => {
        $crate::serde_json::Map::<String, $crate::serde_json::Value>::new()
    };
    { $($key:expr => $value:expr),+ $(,)? } => {
        {
            let mut map = $crate::serde_json::Map::<String, $crate::serde_json::Value>::new();
            $(
                map.insert($key.to_string(), $crate::serde_json::Value::from($value));
            )+
            map
        }
    };
}
