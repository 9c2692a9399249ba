use ahash::AHashMap;

use crate::data::store::Store;
use crate::data::{ChangeKind, ConcurrencyControl, Document, WriteError};
use crate::Result;

/// Writes staged inside `Database::in_batch`.
///
/// Nothing touches the store until the batch body returns `Ok`; then all
/// staged writes commit together and produce a single change notification.
/// Reads through the batch see its own staged writes.
///
/// A successful `save` bumps the caller's `Document` revision right away,
/// even though the write only lands at commit.
pub struct Batch<'a> {
    store: &'a Store,
    staged: AHashMap<String, Option<Document>>,
    mutations: Vec<(String, ChangeKind)>,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Batch {
            store,
            staged: AHashMap::new(),
            mutations: Vec::new(),
        }
    }

    fn current(&self, document_id: &str) -> Option<&Document> {
        match self.staged.get(document_id) {
            Some(staged) => staged.as_ref(),
            None => self.store.get(document_id),
        }
    }

    /// The document as this batch currently sees it
    pub fn document(&self, document_id: &str) -> Option<Document> {
        self.current(document_id).cloned()
    }

    pub fn save(&mut self, document: &mut Document) -> Result<()> {
        self.save_with(document, ConcurrencyControl::LastWriteWins)
    }

    pub fn save_with(&mut self, document: &mut Document, control: ConcurrencyControl) -> Result<()> {
        if document.id().is_empty() {
            return Err(WriteError::InvalidDocumentId(document.id().to_string()).into());
        }

        let stored_revision = self.current(document.id()).map(Document::revision);
        if control == ConcurrencyControl::FailOnConflict
            && stored_revision.unwrap_or(0) != document.revision()
        {
            return Err(WriteError::Conflict(document.id().to_string()).into());
        }

        // A document removed earlier in this batch but committed before it is
        // being rewritten, not created.
        let kind = if stored_revision.is_some() || self.store.get(document.id()).is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        let revision = stored_revision.unwrap_or(0).max(document.revision()) + 1;
        document.set_revision(revision);

        let document_id = document.id().to_string();
        self.staged.insert(document_id.clone(), Some(document.clone()));
        self.mutations.push((document_id, kind));
        Ok(())
    }

    pub fn delete(&mut self, document: &Document) -> Result<()> {
        self.delete_with(document, ConcurrencyControl::LastWriteWins)
    }

    pub fn delete_with(&mut self, document: &Document, control: ConcurrencyControl) -> Result<()> {
        let stored = self
            .current(document.id())
            .ok_or_else(|| WriteError::NotFound(document.id().to_string()))?;

        if control == ConcurrencyControl::FailOnConflict && stored.revision() != document.revision() {
            return Err(WriteError::Conflict(document.id().to_string()).into());
        }

        self.remove(document.id(), ChangeKind::Deleted);
        Ok(())
    }

    /// Remove every trace of `document_id`
    pub fn purge(&mut self, document_id: &str) -> Result<()> {
        if self.current(document_id).is_none() {
            return Err(WriteError::NotFound(document_id.to_string()).into());
        }

        self.remove(document_id, ChangeKind::Purged);
        Ok(())
    }

    fn remove(&mut self, document_id: &str, kind: ChangeKind) {
        self.staged.insert(document_id.to_string(), None);
        self.mutations.push((document_id.to_string(), kind));
    }

    /// Error to return from the batch body to roll everything back
    pub fn abort<T>(&self, reason: impl Into<String>) -> Result<T> {
        Err(WriteError::Aborted(reason.into()).into())
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }

    pub(crate) fn into_parts(self) -> (AHashMap<String, Option<Document>>, Vec<(String, ChangeKind)>) {
        (self.staged, self.mutations)
    }
}
