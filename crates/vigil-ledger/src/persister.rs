use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use vigil_store::{LedgerStore, ReplicaStore, StoreResult};
use vigil_types::{AuditEntry, ChainHead};

use crate::health::HealthMonitor;
use crate::retry::bounded;

/// Writes to the primary store and mirrors to an optional replica.
///
/// Only the primary write decides the outcome. Replica failures go to the
/// [`HealthMonitor`] and stop there.
pub struct DualStorePersister {
    primary: Arc<dyn LedgerStore>,
    replica: Option<Arc<dyn ReplicaStore>>,
    health: Arc<HealthMonitor>,
    timeout: Duration,
}

impl DualStorePersister {
    pub fn new(
        primary: Arc<dyn LedgerStore>,
        replica: Option<Arc<dyn ReplicaStore>>,
        health: Arc<HealthMonitor>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            replica,
            health,
            timeout,
        }
    }

    /// Conditionally append to the primary, then attempt the replica.
    ///
    /// The returned error is always the primary's.
    pub async fn persist(&self, expected: Option<ChainHead>, entry: &AuditEntry) -> StoreResult<()> {
        bounded("append", self.timeout, self.primary.append(expected, entry)).await?;
        debug!(
            sequence = entry.sequence_number,
            entry_id = %entry.id,
            hash = %entry.hash.short_hex(),
            "entry appended"
        );
        self.mirror(entry).await;
        Ok(())
    }

    async fn mirror(&self, entry: &AuditEntry) {
        let Some(replica) = &self.replica else {
            return;
        };
        match bounded("replicate", self.timeout, replica.replicate(entry)).await {
            Ok(()) => self.health.record_secondary_success(),
            Err(e) => {
                warn!(
                    replica = replica.name(),
                    sequence = entry.sequence_number,
                    entry_id = %entry.id,
                    error = %e,
                    "secondary store write failed"
                );
                self.health.record_secondary_failure(&e.to_string());
            }
        }
    }
}
