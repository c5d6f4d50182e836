use async_trait::async_trait;
use tokio::sync::RwLock;
use vigil_types::{
    AuditEntry, ChainHead, EmergencyRecord, EntryFilter, EntryId, PageRequest, TimeRange,
};

use crate::error::StoreResult;
use crate::index::EntryIndex;
use crate::traits::{EmergencyChannel, LedgerStore, ReplicaStore};

/// In-memory ledger store.
///
/// Intended for tests and embedding. The conditional append runs under the
/// index write lock, so check and insert are one step.
pub struct InMemoryLedgerStore {
    index: RwLock<EntryIndex>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(EntryIndex::new()),
        }
    }

    /// Number of entries currently stored.
    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Edit a stored entry in place, bypassing every check.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn tamper(&self, sequence: u64, edit: impl FnOnce(&mut AuditEntry)) -> bool {
        self.index.write().await.tamper(sequence, edit)
    }

    /// Drop a stored entry, leaving the counter record untouched.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn remove(&self, sequence: u64) -> Option<AuditEntry> {
        self.index.write().await.remove(sequence)
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedgerStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn head(&self) -> StoreResult<Option<ChainHead>> {
        Ok(self.index.read().await.head())
    }

    async fn scan_head(&self) -> StoreResult<Option<ChainHead>> {
        Ok(self.index.read().await.scan_head())
    }

    async fn append(&self, expected: Option<ChainHead>, entry: &AuditEntry) -> StoreResult<()> {
        let mut index = self.index.write().await;
        index.check_append(expected, entry)?;
        index.insert(entry.clone());
        Ok(())
    }

    async fn get(&self, id: &EntryId) -> StoreResult<Option<AuditEntry>> {
        Ok(self.index.read().await.get(id))
    }

    async fn by_sequence(&self, from: u64, to: u64, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.index.read().await.by_sequence(from, to, limit))
    }

    async fn query(&self, filter: &EntryFilter, page: PageRequest) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.index.read().await.query(filter, page))
    }

    async fn count(&self, filter: &EntryFilter) -> StoreResult<u64> {
        Ok(self.index.read().await.count(filter))
    }

    async fn sequence_bounds(&self, range: &TimeRange) -> StoreResult<Option<(u64, u64)>> {
        Ok(self.index.read().await.sequence_bounds(range))
    }
}

/// In-memory replica that keeps every copied entry.
#[derive(Default)]
pub struct InMemoryReplica {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copied entries in arrival order.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl ReplicaStore for InMemoryReplica {
    fn name(&self) -> &str {
        "memory-replica"
    }

    async fn replicate(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}

/// In-memory emergency channel.
#[derive(Default)]
pub struct InMemoryEmergencyChannel {
    records: RwLock<Vec<EmergencyRecord>>,
}

impl InMemoryEmergencyChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmergencyChannel for InMemoryEmergencyChannel {
    fn name(&self) -> &str {
        "memory-emergency"
    }

    async fn record(&self, record: &EmergencyRecord) -> StoreResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn records(&self, limit: usize) -> StoreResult<Vec<EmergencyRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}
