//! Storage backends for the Vigil audit ledger.
//!
//! Three roles, three traits:
//!
//! - [`LedgerStore`]: the authoritative, append-only primary. Its
//!   conditional append is what keeps sequence numbers gap-free.
//! - [`ReplicaStore`]: a best-effort mirror written after the primary.
//! - [`EmergencyChannel`]: the last-resort sink for entries the primary
//!   never accepted.
//!
//! # Backends
//!
//! - [`InMemoryLedgerStore`], [`InMemoryReplica`], [`InMemoryEmergencyChannel`]
//!   for tests and embedding
//! - [`FileLedgerStore`], [`FileReplica`], [`FileEmergencyChannel`], each a
//!   CRC-framed append-only log in its own directory
//!
//! # Design Rules
//!
//! 1. Entries are immutable once written; no trait offers update or delete.
//! 2. An append and its counter-record update are a single step.
//! 3. All I/O errors are propagated, never silently ignored.

mod counter;
pub mod error;
pub mod file;
mod index;
pub mod memory;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod traits;
pub mod wal;

pub use error::{StoreError, StoreResult};
pub use file::{FileEmergencyChannel, FileLedgerStore, FileReplica};
pub use memory::{InMemoryEmergencyChannel, InMemoryLedgerStore, InMemoryReplica};
pub use traits::{EmergencyChannel, LedgerStore, ReplicaStore};
pub use wal::{FramedLog, SyncMode};
