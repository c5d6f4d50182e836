//! Core ledger logic for the Vigil audit ledger.
//!
//! A producer's candidate flows leaf to root through:
//!
//! 1. [`EntryValidator`]: enforces the entry contract
//! 2. [`SequenceAllocator`]: reads the durable counter record
//! 3. [`ChainSealer`](vigil_crypto::ChainSealer): links the entry to its predecessor
//! 4. [`DualStorePersister`]: conditional primary append, best-effort replica
//! 5. [`EmergencyFallback`]: last-resort record when any step above fails
//!
//! [`IntegrityVerifier`] and [`AuditQuery`] read persisted data on their own
//! and never take the write path. [`AuditLedger`] wires everything together.
//!
//! `sequence_number` is the ordering authority throughout. Timestamps are
//! carried and filtered on but never used to order or chain entries.

pub mod allocator;
pub mod config;
pub mod emergency;
pub mod error;
pub mod health;
pub mod integrity;
pub mod ledger;
pub mod persister;
pub mod query;
pub mod retry;
pub mod validator;

pub use allocator::{SequenceAllocator, Slot};
pub use config::LedgerConfig;
pub use emergency::EmergencyFallback;
pub use error::{LedgerError, LedgerResult};
pub use health::{HealthMonitor, HealthSnapshot, HealthStatus};
pub use integrity::{IntegrityReport, IntegrityVerifier, Violation, ViolationKind};
pub use ledger::AuditLedger;
pub use persister::DualStorePersister;
pub use query::{AuditQuery, FindRequest};
pub use retry::RetryPolicy;
pub use validator::{EntryValidator, ValidatedEntry, ValidationError};

// Re-exported so callers can cancel verification without a direct dependency.
pub use tokio_util::sync::CancellationToken;
