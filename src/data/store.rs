use ahash::AHashMap;

use crate::data::Document;

/// Committed documents of one database.
#[derive(Debug)]
pub(crate) struct Store {
    documents: AHashMap<String, Document>,
    open: bool,
}

impl Store {
    pub(crate) fn new() -> Self {
        Store {
            documents: AHashMap::new(),
            open: true,
        }
    }

    pub(crate) fn get(&self, document_id: &str) -> Option<&Document> {
        self.documents.get(document_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    /// Returns false if the store was already closed
    pub(crate) fn close(&mut self) -> bool {
        std::mem::replace(&mut self.open, false)
    }

    /// Apply staged writes; `None` removes the document.
    pub(crate) fn apply(&mut self, staged: AHashMap<String, Option<Document>>) {
        for (document_id, document) in staged {
            match document {
                Some(document) => {
                    self.documents.insert(document_id, document);
                }
                None => {
                    self.documents.remove(&document_id);
                }
            }
        }
    }
}
