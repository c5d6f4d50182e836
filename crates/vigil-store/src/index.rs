use std::collections::{BTreeMap, HashMap};

use vigil_types::{AuditEntry, ChainHead, EntryFilter, EntryId, PageRequest, TimeRange};

use crate::error::{StoreError, StoreResult};

/// Sequence-ordered entry index shared by the in-memory and file backends.
///
/// `head` is the counter record. It is kept apart from `by_seq` so that an
/// entry removed out-of-band leaves the counter pointing past the tail.
#[derive(Debug, Default)]
pub(crate) struct EntryIndex {
    by_seq: BTreeMap<u64, AuditEntry>,
    by_id: HashMap<EntryId, u64>,
    head: Option<ChainHead>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<ChainHead> {
        self.head
    }

    pub fn scan_head(&self) -> Option<ChainHead> {
        self.by_seq.values().next_back().map(AuditEntry::head)
    }

    pub fn len(&self) -> usize {
        self.by_seq.len()
    }

    /// Reject anything that does not extend `expected`, which must still be the head.
    pub fn check_append(&self, expected: Option<ChainHead>, entry: &AuditEntry) -> StoreResult<()> {
        if self.head != expected {
            return Err(StoreError::HeadConflict {
                expected: expected.map(|h| h.sequence),
                actual: self.head.map(|h| h.sequence),
            });
        }
        let want_seq = ChainHead::next_sequence(expected.as_ref());
        if entry.sequence_number != want_seq {
            return Err(StoreError::Rejected {
                reason: format!(
                    "sequence {} does not follow head (want {want_seq})",
                    entry.sequence_number
                ),
            });
        }
        if entry.prev_hash != ChainHead::next_prev_hash(expected.as_ref()) {
            return Err(StoreError::Rejected {
                reason: format!("prev_hash of #{} does not name the head", entry.sequence_number),
            });
        }
        if self.by_id.contains_key(&entry.id) {
            return Err(StoreError::DuplicateId(entry.id.clone()));
        }
        Ok(())
    }

    /// Rebuild from entries read back in log order.
    ///
    /// A sequence number that repeats or goes backwards, or a repeated id,
    /// means the log itself is damaged. Gaps are kept for the verifier to
    /// report.
    pub fn replay(entries: impl IntoIterator<Item = AuditEntry>) -> StoreResult<Self> {
        let mut index = Self::new();
        for entry in entries {
            if let Some(&last) = index.by_seq.keys().next_back() {
                if entry.sequence_number <= last {
                    return Err(StoreError::Corrupt {
                        reason: format!("entry #{} follows #{last} in the log", entry.sequence_number),
                    });
                }
            }
            if index.by_id.contains_key(&entry.id) {
                return Err(StoreError::Corrupt {
                    reason: format!("entry id {} appears twice in the log", entry.id),
                });
            }
            index.insert(entry);
        }
        Ok(index)
    }

    /// Install a counter record loaded from elsewhere.
    pub fn set_head(&mut self, head: Option<ChainHead>) {
        self.head = head;
    }

    /// Insert without checks. Callers run [`EntryIndex::check_append`] or
    /// go through [`EntryIndex::replay`].
    pub fn insert(&mut self, entry: AuditEntry) {
        let head = entry.head();
        self.by_id.insert(entry.id.clone(), entry.sequence_number);
        self.by_seq.insert(entry.sequence_number, entry);
        if self.head.map_or(true, |h| head.sequence > h.sequence) {
            self.head = Some(head);
        }
    }

    pub fn get(&self, id: &EntryId) -> Option<AuditEntry> {
        self.by_id
            .get(id)
            .and_then(|seq| self.by_seq.get(seq))
            .cloned()
    }

    pub fn by_sequence(&self, from: u64, to: u64, limit: usize) -> Vec<AuditEntry> {
        if from > to {
            return Vec::new();
        }
        self.by_seq
            .range(from..=to)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn query(&self, filter: &EntryFilter, page: PageRequest) -> Vec<AuditEntry> {
        self.by_seq
            .values()
            .rev()
            .filter(|e| filter.matches(e))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect()
    }

    pub fn count(&self, filter: &EntryFilter) -> u64 {
        self.by_seq.values().filter(|e| filter.matches(e)).count() as u64
    }

    pub fn sequence_bounds(&self, range: &TimeRange) -> Option<(u64, u64)> {
        let mut seqs = self
            .by_seq
            .values()
            .filter(|e| range.contains(&e.timestamp))
            .map(|e| e.sequence_number);
        let first = seqs.next()?;
        let last = seqs.last().unwrap_or(first);
        Some((first, last))
    }

    /// Edit a stored entry in place, bypassing every check.
    #[cfg(any(test, feature = "test-util"))]
    pub fn tamper(&mut self, sequence: u64, edit: impl FnOnce(&mut AuditEntry)) -> bool {
        match self.by_seq.get_mut(&sequence) {
            Some(entry) => {
                edit(entry);
                true
            }
            None => false,
        }
    }

    /// Drop a stored entry, leaving the counter record untouched.
    #[cfg(any(test, feature = "test-util"))]
    pub fn remove(&mut self, sequence: u64) -> Option<AuditEntry> {
        let entry = self.by_seq.remove(&sequence)?;
        self.by_id.remove(&entry.id);
        Some(entry)
    }
}
