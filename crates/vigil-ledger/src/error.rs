use vigil_store::StoreError;
use vigil_types::FailureStage;

use crate::validator::ValidationError;

/// Errors produced by ledger operations.
///
/// Secondary-store failures never appear here: they are recorded by the
/// [`HealthMonitor`](crate::HealthMonitor) and swallowed.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("sequence allocation still contended after {attempts} attempts")]
    TransientAllocation { attempts: u32 },

    #[error("sequence allocation failed: {0}")]
    Allocation(StoreError),

    #[error("hash computation failed: {0}")]
    Hashing(String),

    #[error("primary store write failed: {0}")]
    PrimaryPersistence(StoreError),

    #[error("store read failed: {0}")]
    Read(StoreError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("integrity verification cancelled after {checked} entries")]
    VerificationCancelled { checked: u64 },
}

impl LedgerError {
    /// The creation stage this error stopped, if it came from `create`.
    pub fn stage(&self) -> Option<FailureStage> {
        match self {
            LedgerError::Validation(_) => Some(FailureStage::Validation),
            LedgerError::TransientAllocation { .. } | LedgerError::Allocation(_) => {
                Some(FailureStage::Allocation)
            }
            LedgerError::Hashing(_) => Some(FailureStage::Hashing),
            LedgerError::PrimaryPersistence(_) => Some(FailureStage::PrimaryPersistence),
            LedgerError::Read(_)
            | LedgerError::InvalidQuery(_)
            | LedgerError::VerificationCancelled { .. } => None,
        }
    }

    /// Returns `true` if the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::TransientAllocation { .. } => true,
            LedgerError::Allocation(e) | LedgerError::Read(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if nothing was durably recorded for a `create` call
    /// that the caller expected to succeed.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            LedgerError::Allocation(_)
                | LedgerError::Hashing(_)
                | LedgerError::PrimaryPersistence(_)
        )
    }
}

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_follow_the_pipeline() {
        let validation = LedgerError::from(ValidationError::MissingField("actor_id"));
        assert_eq!(validation.stage(), Some(FailureStage::Validation));
        assert!(!validation.is_transient());

        let contended = LedgerError::TransientAllocation { attempts: 5 };
        assert_eq!(contended.stage(), Some(FailureStage::Allocation));
        assert!(contended.is_transient());

        let primary = LedgerError::PrimaryPersistence(StoreError::Unavailable("down".into()));
        assert_eq!(primary.stage(), Some(FailureStage::PrimaryPersistence));
        assert!(primary.is_critical());

        assert_eq!(LedgerError::VerificationCancelled { checked: 3 }.stage(), None);
    }
}
