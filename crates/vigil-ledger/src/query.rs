use std::sync::Arc;
use std::time::Duration;

use vigil_store::{EmergencyChannel, LedgerStore};
use vigil_types::{
    AuditEntry, AuditStats, EmergencyRecord, EntryFilter, EntryId, PageRequest, StatsAccumulator,
    TimeRange,
};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::retry::bounded;

/// A bounded read request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FindRequest {
    pub filter: EntryFilter,
    pub offset: usize,
    /// Clamped to the configured maximum; defaults when absent.
    pub limit: Option<usize>,
}

impl FindRequest {
    pub fn new(filter: EntryFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Read-only compliance queries. Nothing here writes to any store.
pub struct AuditQuery {
    store: Arc<dyn LedgerStore>,
    emergency: Arc<dyn EmergencyChannel>,
    config: LedgerConfig,
}

impl AuditQuery {
    pub fn new(store: Arc<dyn LedgerStore>, emergency: Arc<dyn EmergencyChannel>, config: LedgerConfig) -> Self {
        Self {
            store,
            emergency,
            config,
        }
    }

    fn timeout(&self) -> Duration {
        self.config.store_timeout()
    }

    /// Filtered entries, newest-first by sequence number, one page.
    pub async fn find_many(&self, request: &FindRequest) -> LedgerResult<Vec<AuditEntry>> {
        let page = PageRequest::new(request.offset, self.config.page_size(request.limit));
        bounded("query", self.timeout(), self.store.query(&request.filter, page))
            .await
            .map_err(LedgerError::Read)
    }

    pub async fn count(&self, filter: &EntryFilter) -> LedgerResult<u64> {
        bounded("count", self.timeout(), self.store.count(filter))
            .await
            .map_err(LedgerError::Read)
    }

    pub async fn find_by_id(&self, id: &EntryId) -> LedgerResult<Option<AuditEntry>> {
        bounded("get", self.timeout(), self.store.get(id))
            .await
            .map_err(LedgerError::Read)
    }

    /// Every entry naming `patient_id`, newest-first by sequence number.
    pub async fn export_subject_history(&self, patient_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        if patient_id.trim().is_empty() {
            return Err(LedgerError::InvalidQuery("patient_id must not be blank".into()));
        }
        self.collect(&EntryFilter::for_patient(patient_id)).await
    }

    /// Aggregate statistics over entries stamped inside `range`, folded
    /// page by page.
    pub async fn get_stats(&self, range: TimeRange) -> LedgerResult<AuditStats> {
        let mut acc = StatsAccumulator::new(range);
        self.for_each_page(&EntryFilter::within(range), |page| acc.accumulate(&page))
            .await?;
        Ok(acc.finish())
    }

    /// The newest emergency records, for reconciliation.
    pub async fn emergency_records(&self, limit: Option<usize>) -> LedgerResult<Vec<EmergencyRecord>> {
        let limit = self.config.page_size(limit);
        bounded("emergency_records", self.timeout(), self.emergency.records(limit))
            .await
            .map_err(LedgerError::Read)
    }

    async fn collect(&self, filter: &EntryFilter) -> LedgerResult<Vec<AuditEntry>> {
        let mut out: Vec<AuditEntry> = Vec::new();
        self.for_each_page(filter, |page| out.extend(page)).await?;
        Ok(out)
    }

    /// Page through every match, newest-first. Each page is a separate
    /// bounded store call and is handed to `visit` before the next is read.
    ///
    /// Appends landing mid-walk shift offsets; anything not strictly older
    /// than the last visited entry is dropped so no entry is seen twice.
    async fn for_each_page(
        &self,
        filter: &EntryFilter,
        mut visit: impl FnMut(Vec<AuditEntry>),
    ) -> LedgerResult<()> {
        let mut page = PageRequest::first(self.config.batch_size());
        let mut floor: Option<u64> = None;
        loop {
            let batch = bounded("query", self.timeout(), self.store.query(filter, page))
                .await
                .map_err(LedgerError::Read)?;
            let done = batch.len() < page.limit;
            let fresh: Vec<AuditEntry> = batch
                .into_iter()
                .filter(|e| floor.map_or(true, |f| e.sequence_number < f))
                .collect();
            if let Some(last) = fresh.last() {
                floor = Some(last.sequence_number);
            }
            visit(fresh);
            if done {
                return Ok(());
            }
            page = page.next();
        }
    }
}
