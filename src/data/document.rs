use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON document identified by a string id.
///
/// `revision` is 0 until the document is first saved and is bumped by every
/// successful save. It is what `ConcurrencyControl::FailOnConflict` compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: String,
    properties: Map<String, Value>,
    revision: u64,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Document {
            id: id.into(),
            properties: Map::new(),
            revision: 0,
        }
    }

    pub fn with_properties(id: impl Into<String>, properties: Map<String, Value>) -> Self {
        Document {
            id: id.into(),
            properties,
            revision: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(Value::as_str)
    }

    pub fn remove_value(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }
}

/// How a write treats a document changed by someone else since it was read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConcurrencyControl {
    /// Overwrite whatever is stored
    #[default]
    LastWriteWins,
    /// Fail with `WriteError::Conflict` if the stored revision differs
    FailOnConflict,
}
