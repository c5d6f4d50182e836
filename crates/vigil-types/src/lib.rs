//! Foundation types for the Vigil audit ledger.
//!
//! Every other Vigil crate depends on `vigil-types`. The types here describe
//! what an audit entry *is*; they know nothing about storage or hashing
//! beyond the canonical byte encoding that the hash chain is computed over.
//!
//! # Key Types
//!
//! - [`AuditEntry`]: an immutable, sequenced, hash-linked ledger entry
//! - [`NewEntry`]: the raw candidate a producer submits
//! - [`EntryHash`]: 32-byte BLAKE3 digest used for `hash` / `prev_hash`
//! - [`ChainHead`]: the `(sequence, hash)` counter record
//! - [`EntryFilter`] / [`TimeRange`] / [`PageRequest`]: bounded read queries
//! - [`AuditStats`]: aggregate statistics over a window
//! - [`EmergencyRecord`]: last-resort record written when persistence fails
//!
//! `sequence_number` is the only ordering authority. `timestamp` is
//! descriptive: producers on different machines cannot agree on wall-clock
//! order, so nothing in Vigil sorts or chains by time.

pub mod emergency;
pub mod entry;
pub mod error;
pub mod hash;
pub mod query;

pub use emergency::{EmergencyRecord, FailureStage};
pub use entry::{
    canonical_timestamp, normalize_timestamp, ActorType, AuditAction, AuditEntry, AuditResource,
    ChainHead, EntryId, NewEntry,
};
pub use error::TypeError;
pub use hash::EntryHash;
pub use query::{AuditStats, EntryFilter, PageRequest, StatsAccumulator, TimeRange};
