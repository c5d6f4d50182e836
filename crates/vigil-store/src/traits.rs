use async_trait::async_trait;
use vigil_types::{
    AuditEntry, ChainHead, EmergencyRecord, EntryFilter, EntryId, PageRequest, TimeRange,
};

use crate::error::StoreResult;

/// The authoritative, append-only entry store.
///
/// All implementations must satisfy these invariants:
/// - Entries are never updated or deleted through this trait.
/// - [`LedgerStore::append`] is a conditional write: the entry and the new
///   counter record become visible together, or neither does.
/// - The counter record always names the newest appended entry.
/// - Reads never block appends for longer than a single index lookup.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &str;

    /// Read the counter record. `None` means the ledger is empty.
    async fn head(&self) -> StoreResult<Option<ChainHead>>;

    /// Derive the head by scanning for the highest stored sequence number.
    ///
    /// Slower than [`LedgerStore::head`]; used when the counter record
    /// cannot be read.
    async fn scan_head(&self) -> StoreResult<Option<ChainHead>>;

    /// Append `entry` if the head is still `expected`.
    ///
    /// Fails with [`StoreError::HeadConflict`](crate::StoreError::HeadConflict)
    /// if another writer appended first. The entry must carry
    /// `expected.sequence + 1` (or 1) and `expected.hash` (or genesis) as
    /// its `prev_hash`.
    async fn append(&self, expected: Option<ChainHead>, entry: &AuditEntry) -> StoreResult<()>;

    /// Look up one entry by id.
    async fn get(&self, id: &EntryId) -> StoreResult<Option<AuditEntry>>;

    /// Entries with `from <= sequence_number <= to`, ascending, at most `limit`.
    async fn by_sequence(&self, from: u64, to: u64, limit: usize) -> StoreResult<Vec<AuditEntry>>;

    /// Matching entries, newest-first by sequence number.
    async fn query(&self, filter: &EntryFilter, page: PageRequest) -> StoreResult<Vec<AuditEntry>>;

    /// Number of matching entries.
    async fn count(&self, filter: &EntryFilter) -> StoreResult<u64>;

    /// Lowest and highest sequence number among entries stamped inside `range`.
    async fn sequence_bounds(&self, range: &TimeRange) -> StoreResult<Option<(u64, u64)>>;
}

/// A best-effort mirror of the primary store.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    fn name(&self) -> &str;

    /// Copy one already-persisted entry.
    async fn replicate(&self, entry: &AuditEntry) -> StoreResult<()>;
}

/// Last-resort sink for entries that never reached the primary store.
///
/// Must not share a failure domain with the primary.
#[async_trait]
pub trait EmergencyChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn record(&self, record: &EmergencyRecord) -> StoreResult<()>;

    /// The newest `limit` records, newest first.
    async fn records(&self, limit: usize) -> StoreResult<Vec<EmergencyRecord>>;
}
