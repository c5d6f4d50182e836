use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use vigil_store::{LedgerStore, StoreError};
use vigil_types::{ChainHead, EntryHash};

use crate::error::{LedgerError, LedgerResult};
use crate::retry::bounded;

/// A chain position read from the counter record.
///
/// `expected` is the head the append must still find for the slot to be valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub expected: Option<ChainHead>,
    pub sequence: u64,
    pub prev_hash: EntryHash,
}

impl Slot {
    pub fn after(head: Option<ChainHead>) -> Self {
        Self {
            expected: head,
            sequence: ChainHead::next_sequence(head.as_ref()),
            prev_hash: ChainHead::next_prev_hash(head.as_ref()),
        }
    }
}

/// Hands out the next sequence number from the durable counter record.
///
/// Reservation is optimistic: the slot is claimed only when the primary
/// store's conditional append accepts it. Nothing here is an in-process
/// counter.
pub struct SequenceAllocator {
    store: Arc<dyn LedgerStore>,
    timeout: Duration,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn LedgerStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Read the head and derive the next slot.
    ///
    /// If the counter record is unreadable, the head is recomputed by
    /// scanning stored entries. That path is slow and logged.
    pub async fn reserve(&self) -> LedgerResult<Slot> {
        match bounded("head", self.timeout, self.store.head()).await {
            Ok(head) => Ok(Slot::after(head)),
            Err(StoreError::CounterUnavailable(reason)) => {
                warn!(store = self.store.name(), %reason, "counter record unavailable; scanning for head");
                let head = bounded("scan_head", self.timeout, self.store.scan_head())
                    .await
                    .map_err(LedgerError::Allocation)?;
                Ok(Slot::after(head))
            }
            Err(e) => Err(LedgerError::Allocation(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use vigil_store::testing::FaultyLedgerStore;
    use vigil_store::InMemoryLedgerStore;

    use super::*;

    #[tokio::test]
    async fn empty_store_yields_first_slot() {
        let allocator = SequenceAllocator::new(Arc::new(InMemoryLedgerStore::new()), Duration::from_secs(1));
        let slot = allocator.reserve().await.unwrap();
        assert_eq!(slot, Slot::after(None));
        assert_eq!(slot.sequence, 1);
        assert!(slot.prev_hash.is_genesis());
    }

    #[tokio::test]
    async fn counter_outage_falls_back_to_scan() {
        let store = Arc::new(FaultyLedgerStore::new());
        store.counter_down(true);
        let allocator = SequenceAllocator::new(store.clone(), Duration::from_secs(1));
        let slot = allocator.reserve().await.unwrap();
        assert_eq!(slot.sequence, 1);
    }
}
