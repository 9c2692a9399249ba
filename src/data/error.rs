use std::fmt;

/// Failures raised synchronously by the document write path.
///
/// These are returned to the caller of `save`, `delete`, `purge` or
/// `in_batch` and never travel through the notification path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The database has been closed
    NotOpen,
    /// Document ids must be non-empty
    InvalidDocumentId(String),
    /// The document is not stored in the database
    NotFound(String),
    /// The stored revision differs from the one being written
    Conflict(String),
    /// A batch body asked for its writes to be rolled back
    Aborted(String),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::NotOpen => write!(f, "Database is not open"),
            WriteError::InvalidDocumentId(id) => write!(f, "Invalid document id: '{}'", id),
            WriteError::NotFound(id) => write!(f, "Document not found: {}", id),
            WriteError::Conflict(id) => write!(f, "Document update conflict: {}", id),
            WriteError::Aborted(reason) => write!(f, "Batch aborted: {}", reason),
        }
    }
}

impl std::error::Error for WriteError {}

/// Crate-wide error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Write(WriteError),
    /// Invalid database configuration
    Config(String),
    /// A delivery queue could not be started
    Queue(String),
}

impl Error {
    /// Returns the write failure, if this is one
    pub fn write_error(&self) -> Option<&WriteError> {
        match self {
            Error::Write(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Write(err) => write!(f, "Write error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Queue(msg) => write!(f, "Delivery queue error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Write(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WriteError> for Error {
    fn from(err: WriteError) -> Self {
        Error::Write(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
