use vigil_types::EntryId;

/// Errors from ledger storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The counter record moved since the caller read it.
    #[error("chain head conflict: expected {expected:?}, found {actual:?}")]
    HeadConflict {
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The counter record could not be read. Callers may fall back to a scan.
    #[error("counter record unavailable: {0}")]
    CounterUnavailable(String),

    /// The append does not extend the current head.
    #[error("append rejected: {reason}")]
    Rejected { reason: String },

    /// An entry with this id is already stored.
    #[error("duplicate entry id: {0}")]
    DuplicateId(EntryId),

    /// The call did not complete within its deadline.
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data is malformed.
    #[error("corrupt store data: {reason}")]
    Corrupt { reason: String },

    /// The backend refused the call outright.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns `true` for failures a retry may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::HeadConflict { .. }
                | StoreError::CounterUnavailable(_)
                | StoreError::Timeout { .. }
                | StoreError::Unavailable(_)
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
