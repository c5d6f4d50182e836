//! Fault-injecting store wrappers for exercising failure paths.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vigil_types::{
    AuditEntry, ChainHead, EmergencyRecord, EntryFilter, EntryId, PageRequest, TimeRange,
};

use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryLedgerStore;
use crate::traits::{EmergencyChannel, LedgerStore, ReplicaStore};

/// Wraps an [`InMemoryLedgerStore`] with switchable failures.
#[derive(Default)]
pub struct FaultyLedgerStore {
    inner: Arc<InMemoryLedgerStore>,
    fail_appends: AtomicBool,
    counter_down: AtomicBool,
    /// Number of upcoming appends answered with a head conflict.
    forced_conflicts: AtomicUsize,
    append_delay_ms: AtomicU64,
    append_calls: AtomicUsize,
}

impl FaultyLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for out-of-band edits.
    pub fn inner(&self) -> &Arc<InMemoryLedgerStore> {
        &self.inner
    }

    /// Make every append fail as if the backend were down.
    pub fn fail_appends(&self, on: bool) {
        self.fail_appends.store(on, Ordering::SeqCst);
    }

    /// Make the counter record unreadable.
    pub fn counter_down(&self, on: bool) {
        self.counter_down.store(on, Ordering::SeqCst);
    }

    /// Answer the next `n` appends with a head conflict.
    pub fn force_conflicts(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Sleep before every append.
    pub fn delay_appends(&self, delay: Duration) {
        self.append_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total append attempts seen, including failed ones.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for FaultyLedgerStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn head(&self) -> StoreResult<Option<ChainHead>> {
        if self.counter_down.load(Ordering::SeqCst) {
            return Err(StoreError::CounterUnavailable("counter record offline".into()));
        }
        self.inner.head().await
    }

    async fn scan_head(&self) -> StoreResult<Option<ChainHead>> {
        self.inner.scan_head().await
    }

    async fn append(&self, expected: Option<ChainHead>, entry: &AuditEntry) -> StoreResult<()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.append_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("primary store offline".into()));
        }
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if forced.is_ok() {
            return Err(StoreError::HeadConflict {
                expected: expected.map(|h| h.sequence),
                actual: None,
            });
        }
        self.inner.append(expected, entry).await
    }

    async fn get(&self, id: &EntryId) -> StoreResult<Option<AuditEntry>> {
        self.inner.get(id).await
    }

    async fn by_sequence(&self, from: u64, to: u64, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        self.inner.by_sequence(from, to, limit).await
    }

    async fn query(&self, filter: &EntryFilter, page: PageRequest) -> StoreResult<Vec<AuditEntry>> {
        self.inner.query(filter, page).await
    }

    async fn count(&self, filter: &EntryFilter) -> StoreResult<u64> {
        self.inner.count(filter).await
    }

    async fn sequence_bounds(&self, range: &TimeRange) -> StoreResult<Option<(u64, u64)>> {
        self.inner.sequence_bounds(range).await
    }
}

/// Replica that rejects every copy.
#[derive(Default)]
pub struct FailingReplica {
    attempts: AtomicUsize,
}

impl FailingReplica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicaStore for FailingReplica {
    fn name(&self) -> &str {
        "failing-replica"
    }

    async fn replicate(&self, _entry: &AuditEntry) -> StoreResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("replica offline".into()))
    }
}

/// Emergency channel that rejects every record.
#[derive(Default)]
pub struct FailingEmergencyChannel;

#[async_trait]
impl EmergencyChannel for FailingEmergencyChannel {
    fn name(&self) -> &str {
        "failing-emergency"
    }

    async fn record(&self, _record: &EmergencyRecord) -> StoreResult<()> {
        Err(StoreError::Unavailable("emergency channel offline".into()))
    }

    async fn records(&self, _limit: usize) -> StoreResult<Vec<EmergencyRecord>> {
        Err(StoreError::Unavailable("emergency channel offline".into()))
    }
}
