use thiserror::Error;

/// Errors from the persistent store.
///
/// Never papered over: callers either propagate these or, during matching,
/// log them and move on to the next candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backing store unreachable, transaction failed or commit failed
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored record has an unexpected layout
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An index entry refers to a record that does not exist
    #[error("corrupt store: {0}")]
    Corrupt(String),
}
