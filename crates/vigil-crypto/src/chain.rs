use vigil_types::{AuditEntry, EntryHash};

use crate::hasher::EntryHasher;

/// Trait for records that participate in a hash chain.
pub trait ChainLinked {
    /// Position in the chain. The first record is 1.
    fn sequence(&self) -> u64;
    /// The digest the record carries.
    fn stored_hash(&self) -> EntryHash;
    /// The predecessor digest the record carries.
    fn prev_hash(&self) -> EntryHash;
    /// The digest the record should carry, recomputed from its contents.
    fn compute_hash(&self) -> Result<EntryHash, ChainError>;
}

impl ChainLinked for AuditEntry {
    fn sequence(&self) -> u64 {
        self.sequence_number
    }

    fn stored_hash(&self) -> EntryHash {
        self.hash
    }

    fn prev_hash(&self) -> EntryHash {
        self.prev_hash
    }

    fn compute_hash(&self) -> Result<EntryHash, ChainError> {
        EntryHasher::ENTRY
            .hash_entry(self)
            .map_err(|e| ChainError::Serialization(e.to_string()))
    }
}

/// Fills in the `hash` field of an entry whose `sequence_number` and
/// `prev_hash` are already final.
pub struct ChainSealer;

impl ChainSealer {
    pub fn seal(mut entry: AuditEntry) -> Result<AuditEntry, ChainError> {
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }
}

/// A single defect found on one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkFault {
    /// The stored digest disagrees with a recomputation over the contents.
    HashMismatch { computed: EntryHash, stored: EntryHash },
    /// `prev_hash` does not name the predecessor's stored digest.
    ChainBreak { expected: EntryHash, found: EntryHash },
}

/// Hash chain integrity checks.
pub struct HashChainVerifier;

impl HashChainVerifier {
    /// Inspect one record against the digest its predecessor carries.
    ///
    /// `expected_prev` is `None` when the predecessor is unknown, in which
    /// case only the record's own digest is checked. The link is compared
    /// against the predecessor's *stored* digest, so a single edited record
    /// yields one fault on itself and none on its successor.
    pub fn check_link<T: ChainLinked>(
        expected_prev: Option<EntryHash>,
        record: &T,
    ) -> Result<Vec<LinkFault>, ChainError> {
        Self::check_link_against(expected_prev.as_slice(), record)
    }

    /// Like [`HashChainVerifier::check_link`], but the link may name any of
    /// `accepted`. The first digest is the one reported on a break.
    ///
    /// A predecessor whose stored digest was overwritten is accepted under
    /// both its stored and its recomputed digest, so the overwrite is
    /// reported once, on the predecessor.
    pub fn check_link_against<T: ChainLinked>(
        accepted: &[EntryHash],
        record: &T,
    ) -> Result<Vec<LinkFault>, ChainError> {
        let mut faults = Vec::new();
        if let Some(&expected) = accepted.first() {
            let found = record.prev_hash();
            if !accepted.contains(&found) {
                faults.push(LinkFault::ChainBreak { expected, found });
            }
        }
        let computed = record.compute_hash()?;
        let stored = record.stored_hash();
        if computed != stored {
            faults.push(LinkFault::HashMismatch { computed, stored });
        }
        Ok(faults)
    }

    /// Verify a contiguous run of records, stopping at the first defect.
    ///
    /// A run starting at sequence 1 must link to the genesis digest.
    pub fn verify_chain<T: ChainLinked>(records: &[T]) -> Result<(), ChainError> {
        let mut prev: Option<(u64, EntryHash)> = None;
        for record in records {
            let expected_prev = match prev {
                Some((seq, hash)) => {
                    if record.sequence() != seq + 1 {
                        return Err(ChainError::SequenceGap {
                            expected: seq + 1,
                            found: record.sequence(),
                        });
                    }
                    Some(hash)
                }
                None if record.sequence() == 1 => Some(EntryHash::GENESIS),
                None => None,
            };
            if let Some(fault) = Self::check_link(expected_prev, record)?.into_iter().next() {
                return Err(match fault {
                    LinkFault::ChainBreak { .. } => ChainError::BrokenLink {
                        sequence: record.sequence(),
                    },
                    LinkFault::HashMismatch { .. } => ChainError::HashMismatch {
                        sequence: record.sequence(),
                    },
                });
            }
            prev = Some((record.sequence(), record.stored_hash()));
        }
        Ok(())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("broken link at sequence {sequence}: prev_hash does not match")]
    BrokenLink { sequence: u64 },

    #[error("hash mismatch at sequence {sequence}: computed hash differs from stored")]
    HashMismatch { sequence: u64 },

    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),
}
