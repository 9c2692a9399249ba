use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What a committed write did to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Purged,
}

impl ChangeKind {
    /// Folds a later mutation of the same document (within one transaction)
    /// into this one.
    ///
    /// A document created and then updated is still reported as created.
    /// A later removal always wins. Everything else reports the latest kind,
    /// so a save after a removal reports `Updated` when the batch recorded it
    /// as a rewrite of a document that existed before the transaction.
    pub fn coalesce(self, later: ChangeKind) -> ChangeKind {
        match (self, later) {
            (_, ChangeKind::Deleted) | (_, ChangeKind::Purged) => later,
            (ChangeKind::Created, ChangeKind::Updated) => ChangeKind::Created,
            (_, later) => later,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, ChangeKind::Deleted | ChangeKind::Purged)
    }
}

/// One transaction's worth of committed changes, as seen by a database listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChange {
    pub database: String,
    /// Affected documents, unique, in order of first mutation
    pub document_ids: Vec<String>,
    /// Mutation log sequence of the last entry in the transaction
    pub sequence: u64,
}

impl DatabaseChange {
    pub fn contains(&self, document_id: &str) -> bool {
        self.document_ids.iter().any(|id| id == document_id)
    }
}

/// The change to a single document within one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub database: String,
    pub document_id: String,
    pub kind: ChangeKind,
}

/// Sender half used to forward database changes to an async consumer
pub type ChangeSender = mpsc::UnboundedSender<DatabaseChange>;

/// Receiver half handed out by `Database::change_channel`
pub type ChangeReceiver = mpsc::UnboundedReceiver<DatabaseChange>;

/// Create a new change channel pair
pub fn change_channel_pair() -> (ChangeSender, ChangeReceiver) {
    mpsc::unbounded_channel()
}
