use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use vigil_crypto::ChainSealer;
use vigil_store::{EmergencyChannel, LedgerStore, ReplicaStore, StoreError};
use vigil_types::{
    AuditEntry, AuditStats, ChainHead, EmergencyRecord, EntryFilter, EntryId, FailureStage,
    NewEntry, TimeRange,
};

use crate::allocator::SequenceAllocator;
use crate::config::LedgerConfig;
use crate::emergency::EmergencyFallback;
use crate::error::{LedgerError, LedgerResult};
use crate::health::{HealthMonitor, HealthSnapshot};
use crate::integrity::{IntegrityReport, IntegrityVerifier};
use crate::persister::DualStorePersister;
use crate::query::{AuditQuery, FindRequest};
use crate::retry::bounded;
use crate::validator::EntryValidator;

/// The audit ledger: the single entry point for producers and auditors.
///
/// Store handles are injected at construction. Within one process, creates
/// pass through a writer gate so local producers queue instead of racing;
/// across processes the primary store's conditional append arbitrates and
/// losers retry with backoff.
pub struct AuditLedger {
    primary: Arc<dyn LedgerStore>,
    validator: EntryValidator,
    allocator: SequenceAllocator,
    persister: DualStorePersister,
    fallback: EmergencyFallback,
    verifier: IntegrityVerifier,
    query: AuditQuery,
    health: Arc<HealthMonitor>,
    config: LedgerConfig,
    writer_gate: Mutex<()>,
}

impl AuditLedger {
    /// Build a ledger without a replica.
    pub fn new(
        primary: Arc<dyn LedgerStore>,
        emergency: Arc<dyn EmergencyChannel>,
        config: LedgerConfig,
    ) -> Self {
        Self::build(primary, None, emergency, config)
    }

    /// Build a ledger that mirrors every committed entry to `replica`.
    pub fn with_replica(
        primary: Arc<dyn LedgerStore>,
        replica: Arc<dyn ReplicaStore>,
        emergency: Arc<dyn EmergencyChannel>,
        config: LedgerConfig,
    ) -> Self {
        Self::build(primary, Some(replica), emergency, config)
    }

    fn build(
        primary: Arc<dyn LedgerStore>,
        replica: Option<Arc<dyn ReplicaStore>>,
        emergency: Arc<dyn EmergencyChannel>,
        config: LedgerConfig,
    ) -> Self {
        let timeout = config.store_timeout();
        let health = Arc::new(HealthMonitor::new(replica.as_ref().map(|r| r.name().to_string())));
        Self {
            validator: EntryValidator,
            allocator: SequenceAllocator::new(primary.clone(), timeout),
            persister: DualStorePersister::new(primary.clone(), replica, health.clone(), timeout),
            fallback: EmergencyFallback::new(emergency.clone(), health.clone(), timeout),
            verifier: IntegrityVerifier::new(primary.clone(), config.batch_size(), timeout),
            query: AuditQuery::new(primary.clone(), emergency, config.clone()),
            primary,
            health,
            config,
            writer_gate: Mutex::new(()),
        }
    }

    /// Record one audit event.
    ///
    /// Returns the persisted entry only once the primary store holds it.
    /// On any failure an emergency record is attempted and the error is
    /// still returned.
    pub async fn create(&self, candidate: NewEntry) -> LedgerResult<AuditEntry> {
        match self.try_create(&candidate).await {
            Ok(entry) => Ok(entry),
            Err(e) => {
                let stage = e.stage().unwrap_or(FailureStage::PrimaryPersistence);
                if e.is_critical() {
                    error!(%stage, error = %e, "audit entry was not recorded");
                }
                self.fallback.capture(stage, &candidate, &e).await;
                Err(e)
            }
        }
    }

    async fn try_create(&self, candidate: &NewEntry) -> LedgerResult<AuditEntry> {
        let validated = self.validator.validate(candidate)?;
        let policy = &self.config.retry;
        let _gate = self.writer_gate.lock().await;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let slot = self.allocator.reserve().await?;
            let entry = ChainSealer::seal(validated.clone().into_unsealed(slot.sequence, slot.prev_hash))
                .map_err(|e| LedgerError::Hashing(e.to_string()))?;

            match self.persister.persist(slot.expected, &entry).await {
                Ok(()) => return Ok(entry),
                Err(StoreError::HeadConflict { expected, actual }) => {
                    if !policy.allows_retry(attempt) {
                        return Err(LedgerError::TransientAllocation { attempts: attempt });
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt,
                        ?expected,
                        ?actual,
                        delay_ms = delay.as_millis() as u64,
                        "chain head moved; retrying allocation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(LedgerError::PrimaryPersistence(e)),
            }
        }
    }

    /// Filtered entries, newest-first, one page.
    pub async fn find_many(&self, request: &FindRequest) -> LedgerResult<Vec<AuditEntry>> {
        self.query.find_many(request).await
    }

    pub async fn count(&self, filter: &EntryFilter) -> LedgerResult<u64> {
        self.query.count(filter).await
    }

    pub async fn find_by_id(&self, id: &EntryId) -> LedgerResult<Option<AuditEntry>> {
        self.query.find_by_id(id).await
    }

    /// Full history for one subject, newest-first.
    pub async fn export_subject_history(&self, patient_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        let entries = self.query.export_subject_history(patient_id).await?;
        debug!(patient_id, entries = entries.len(), "subject history exported");
        Ok(entries)
    }

    pub async fn get_stats(&self, range: TimeRange) -> LedgerResult<AuditStats> {
        self.query.get_stats(range).await
    }

    /// Verify the sequence window spanned by `range`.
    pub async fn verify_integrity(&self, range: TimeRange, cancel: &CancellationToken) -> LedgerResult<IntegrityReport> {
        self.verifier.verify_range(range, cancel).await
    }

    /// Verify the whole ledger, including the counter record.
    pub async fn verify_all(&self, cancel: &CancellationToken) -> LedgerResult<IntegrityReport> {
        self.verifier.verify_all(cancel).await
    }

    pub async fn emergency_records(&self, limit: Option<usize>) -> LedgerResult<Vec<EmergencyRecord>> {
        self.query.emergency_records(limit).await
    }

    /// The current counter record, if the ledger is not empty.
    pub async fn head(&self) -> LedgerResult<Option<ChainHead>> {
        bounded("head", self.config.store_timeout(), self.primary.head())
            .await
            .map_err(LedgerError::Read)
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Backend names: primary, then the emergency channel.
    pub fn store_names(&self) -> (String, String) {
        (
            self.primary.name().to_string(),
            self.fallback.channel().name().to_string(),
        )
    }
}
