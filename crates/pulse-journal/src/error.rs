//! Error types for the Pulse journal.

use thiserror::Error;

/// Result type alias for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur during journal operations.
#[derive(Debug, Clone, Error)]
pub enum JournalError {
    #[error("failed to open journal: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// The store refused the write without attempting it.
    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("blocking task failed: {0}")]
    Task(String),
}

impl JournalError {
    /// Whether the store refused the operation rather than failing it.
    pub fn is_rejected(&self) -> bool {
        matches!(self, JournalError::Rejected(_))
    }
}
