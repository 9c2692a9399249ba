use ahash::AHashMap;

use crate::data::{DatabaseChange, DocumentChange, MutationEntry};

/// Everything a single committed transaction emits: one database-level
/// change plus one change per affected document.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub database: DatabaseChange,
    pub documents: Vec<DocumentChange>,
    index: AHashMap<String, usize>,
}

impl ChangeSet {
    /// The change for `document_id`, if the transaction touched it
    pub fn document(&self, document_id: &str) -> Option<&DocumentChange> {
        self.index.get(document_id).map(|&i| &self.documents[i])
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Groups the log entries of one transaction into a [`ChangeSet`].
#[derive(Debug, Clone)]
pub struct ChangeAggregator {
    database: String,
}

impl ChangeAggregator {
    pub fn new(database: impl Into<String>) -> Self {
        ChangeAggregator {
            database: database.into(),
        }
    }

    /// Coalesce `entries` (one transaction, in commit order).
    ///
    /// Returns `None` when there is nothing to report.
    pub fn aggregate(&self, entries: &[MutationEntry]) -> Option<ChangeSet> {
        let last = entries.last()?;

        let mut documents: Vec<DocumentChange> = Vec::new();
        let mut index: AHashMap<String, usize> = AHashMap::with_capacity(entries.len());

        for entry in entries {
            match index.get(&entry.document_id) {
                Some(&i) => {
                    let change = &mut documents[i];
                    change.kind = change.kind.coalesce(entry.kind);
                }
                None => {
                    index.insert(entry.document_id.clone(), documents.len());
                    documents.push(DocumentChange {
                        database: self.database.clone(),
                        document_id: entry.document_id.clone(),
                        kind: entry.kind,
                    });
                }
            }
        }

        let database = DatabaseChange {
            database: self.database.clone(),
            document_ids: documents.iter().map(|c| c.document_id.clone()).collect(),
            sequence: last.sequence,
        };

        Some(ChangeSet {
            database,
            documents,
            index,
        })
    }
}
