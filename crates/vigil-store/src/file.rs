use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use vigil_types::{
    AuditEntry, ChainHead, EmergencyRecord, EntryFilter, EntryId, PageRequest, TimeRange,
};

use crate::counter::CounterFile;
use crate::error::{StoreError, StoreResult};
use crate::index::EntryIndex;
use crate::traits::{EmergencyChannel, LedgerStore, ReplicaStore};
use crate::wal::{FramedLog, SyncMode};

/// File name of the primary entry log inside a data directory.
pub const LEDGER_LOG: &str = "ledger.log";
/// File name of the counter record inside a data directory.
pub const COUNTER_FILE: &str = "ledger.head";
/// File name of the replica log inside a replica directory.
pub const REPLICA_LOG: &str = "replica.log";
/// File name of the emergency log inside an emergency directory.
pub const EMERGENCY_LOG: &str = "emergency.log";

/// Run blocking file I/O on the blocking thread pool.
async fn blocking<R, F>(op: F) -> StoreResult<R>
where
    F: FnOnce() -> StoreResult<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StoreError::Unavailable(format!("file I/O task failed: {e}")))?
}

/// Durable ledger store backed by a framed append-only log and a separate
/// counter record.
///
/// Every append writes the entry frame, then replaces the counter record.
/// On open the index is rebuilt by replay and the head comes from the
/// counter record, so entries cut from the end of the log leave the head
/// pointing past the stored tail. One process owns a data directory at a
/// time.
pub struct FileLedgerStore {
    shared: Arc<Shared>,
}

struct Shared {
    log: FramedLog<AuditEntry>,
    counter: CounterFile,
    state: RwLock<State>,
    append_lock: Mutex<()>,
}

struct State {
    index: EntryIndex,
    /// Why the counter record cannot be trusted, until the next append
    /// rewrites it.
    counter_fault: Option<String>,
}

impl FileLedgerStore {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        let (log, entries) = FramedLog::open(&dir.join(LEDGER_LOG), sync_mode)?;
        let mut index = EntryIndex::replay(entries)?;
        let counter = CounterFile::new(dir.join(COUNTER_FILE), sync_mode);
        let scanned = index.scan_head();

        let mut counter_fault = None;
        match (counter.load(), scanned) {
            (Ok(Some(head)), Some(last)) if last.sequence > head.sequence => {
                warn!(
                    counter = head.sequence,
                    log = last.sequence,
                    "log holds entries past the counter record; rolling counter forward"
                );
                counter.store(&last)?;
            }
            (Ok(Some(head)), _) => index.set_head(Some(head)),
            (Ok(None), None) => {}
            (Ok(None), Some(_)) => {
                counter_fault = Some(format!("{} is missing", counter.path().display()));
            }
            (Err(e), _) => counter_fault = Some(format!("{}: {e}", counter.path().display())),
        }
        if let Some(reason) = &counter_fault {
            warn!(%reason, "counter record unreadable; head falls back to a scan");
        }

        info!(
            path = %log.path().display(),
            entries = index.len(),
            head = ?index.head().map(|h| h.sequence),
            "ledger store opened"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                log,
                counter,
                state: RwLock::new(State {
                    index,
                    counter_fault,
                }),
                append_lock: Mutex::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        self.shared.log.path()
    }
}

impl Shared {
    async fn commit(self: Arc<Self>, expected: Option<ChainHead>, entry: AuditEntry) -> StoreResult<()> {
        let _guard = self.append_lock.lock().await;
        self.state.read().await.index.check_append(expected, &entry)?;

        let shared = self.clone();
        let written = entry.clone();
        let counter_fault = blocking(move || shared.write_through(&written)).await?;

        let mut state = self.state.write().await;
        state.index.insert(entry);
        state.counter_fault = counter_fault;
        Ok(())
    }

    /// Append the frame, then replace the counter record. Once the frame
    /// is durable the entry is committed, so a counter write failure comes
    /// back as a fault instead of an error.
    fn write_through(&self, entry: &AuditEntry) -> StoreResult<Option<String>> {
        self.log.append(entry)?;
        match self.counter.store(&entry.head()) {
            Ok(()) => Ok(None),
            Err(e) => {
                warn!(sequence = entry.sequence_number, error = %e, "counter record write failed");
                Ok(Some(format!("{}: {e}", self.counter.path().display())))
            }
        }
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn head(&self) -> StoreResult<Option<ChainHead>> {
        let state = self.shared.state.read().await;
        match &state.counter_fault {
            Some(reason) => Err(StoreError::CounterUnavailable(reason.clone())),
            None => Ok(state.index.head()),
        }
    }

    async fn scan_head(&self) -> StoreResult<Option<ChainHead>> {
        Ok(self.shared.state.read().await.index.scan_head())
    }

    async fn append(&self, expected: Option<ChainHead>, entry: &AuditEntry) -> StoreResult<()> {
        // Detached so a dropped caller cannot stop a commit between the
        // log write and the index update.
        tokio::spawn(self.shared.clone().commit(expected, entry.clone()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("append task failed: {e}")))?
    }

    async fn get(&self, id: &EntryId) -> StoreResult<Option<AuditEntry>> {
        Ok(self.shared.state.read().await.index.get(id))
    }

    async fn by_sequence(&self, from: u64, to: u64, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.shared.state.read().await.index.by_sequence(from, to, limit))
    }

    async fn query(&self, filter: &EntryFilter, page: PageRequest) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.shared.state.read().await.index.query(filter, page))
    }

    async fn count(&self, filter: &EntryFilter) -> StoreResult<u64> {
        Ok(self.shared.state.read().await.index.count(filter))
    }

    async fn sequence_bounds(&self, range: &TimeRange) -> StoreResult<Option<(u64, u64)>> {
        Ok(self.shared.state.read().await.index.sequence_bounds(range))
    }
}

/// Replica that mirrors entries into its own framed log.
pub struct FileReplica {
    log: Arc<FramedLog<AuditEntry>>,
    name: String,
}

impl FileReplica {
    pub fn open(dir: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        let path: PathBuf = dir.join(REPLICA_LOG);
        let (log, existing) = FramedLog::open(&path, sync_mode)?;
        info!(path = %path.display(), entries = existing.len(), "replica opened");
        Ok(Self {
            log: Arc::new(log),
            name: format!("file-replica:{}", dir.display()),
        })
    }

    /// Every mirrored entry in arrival order.
    pub fn entries(&self) -> StoreResult<Vec<AuditEntry>> {
        self.log.replay()
    }
}

#[async_trait]
impl ReplicaStore for FileReplica {
    fn name(&self) -> &str {
        &self.name
    }

    async fn replicate(&self, entry: &AuditEntry) -> StoreResult<()> {
        let log = self.log.clone();
        let entry = entry.clone();
        blocking(move || log.append(&entry)).await?;
        Ok(())
    }
}

/// Emergency channel backed by its own framed log, always fsynced.
///
/// Place it on a different device from the primary's data directory; a
/// shared disk fails both at once.
pub struct FileEmergencyChannel {
    log: Arc<FramedLog<EmergencyRecord>>,
}

impl FileEmergencyChannel {
    pub fn open(dir: &Path) -> StoreResult<Self> {
        let (log, existing) = FramedLog::open(&dir.join(EMERGENCY_LOG), SyncMode::EveryWrite)?;
        if !existing.is_empty() {
            info!(
                path = %log.path().display(),
                records = existing.len(),
                "emergency log holds unreconciled records"
            );
        }
        Ok(Self { log: Arc::new(log) })
    }
}

#[async_trait]
impl EmergencyChannel for FileEmergencyChannel {
    fn name(&self) -> &str {
        "file-emergency"
    }

    async fn record(&self, record: &EmergencyRecord) -> StoreResult<()> {
        let log = self.log.clone();
        let record = record.clone();
        blocking(move || log.append(&record)).await?;
        Ok(())
    }

    async fn records(&self, limit: usize) -> StoreResult<Vec<EmergencyRecord>> {
        let log = self.log.clone();
        let mut records = blocking(move || log.replay()).await?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}
