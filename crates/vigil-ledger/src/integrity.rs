use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_crypto::{ChainLinked, HashChainVerifier, LinkFault};
use vigil_store::{LedgerStore, StoreError};
use vigil_types::{canonical_timestamp, normalize_timestamp, AuditEntry, ChainHead, EntryHash, EntryId, TimeRange};

use crate::error::{LedgerError, LedgerResult};
use crate::retry::bounded;

/// Kinds of integrity violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// One or more sequence numbers are missing.
    SequenceGap,
    /// A sequence number repeats or goes backwards.
    SequenceRegression,
    /// A required field is blank.
    MissingField,
    /// A medical-category entry has no patient.
    MissingPatientId,
    /// The timestamp carries precision the hash does not cover.
    MalformedTimestamp,
    /// The stored hash disagrees with a recomputation.
    HashMismatch,
    /// `prev_hash` does not name the predecessor's stored hash.
    ChainBreak,
    /// The counter record points past the last stored entry.
    TruncatedTail,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::SequenceGap => "sequence_gap",
            ViolationKind::SequenceRegression => "sequence_regression",
            ViolationKind::MissingField => "missing_field",
            ViolationKind::MissingPatientId => "missing_patient_id",
            ViolationKind::MalformedTimestamp => "malformed_timestamp",
            ViolationKind::HashMismatch => "hash_mismatch",
            ViolationKind::ChainBreak => "chain_break",
            ViolationKind::TruncatedTail => "truncated_tail",
        };
        f.write_str(s)
    }
}

/// A specific integrity violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub sequence: u64,
    pub entry_id: Option<EntryId>,
    pub expected: String,
    pub actual: String,
}

impl Violation {
    fn on(entry: &AuditEntry, kind: ViolationKind, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            kind,
            sequence: entry.sequence_number,
            entry_id: Some(entry.id.clone()),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result of an integrity check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// The time range asked for, if any.
    pub range: Option<TimeRange>,
    /// Inclusive sequence window actually checked.
    pub window: Option<(u64, u64)>,
    pub entries_checked: u64,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    /// Returns `true` if no violation was found.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Distinct ids of entries with at least one violation, in report order.
    pub fn offending_entries(&self) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = Vec::new();
        for id in self.violations.iter().filter_map(|v| v.entry_id.as_ref()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

/// Offline, paged, cancellable integrity checker.
///
/// Reads go through the store's query path only and never touch the
/// append path, so verification never blocks writers.
pub struct IntegrityVerifier {
    store: Arc<dyn LedgerStore>,
    page_size: usize,
    timeout: Duration,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn LedgerStore>, page_size: usize, timeout: Duration) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            timeout,
        }
    }

    /// Verify every entry in the sequence window spanned by `range`.
    pub async fn verify_range(&self, range: TimeRange, cancel: &CancellationToken) -> LedgerResult<IntegrityReport> {
        let window = bounded("sequence_bounds", self.timeout, self.store.sequence_bounds(&range))
            .await
            .map_err(LedgerError::Read)?;
        let mut report = IntegrityReport {
            range: Some(range),
            window,
            entries_checked: 0,
            violations: Vec::new(),
        };
        if let Some((first, last)) = window {
            self.walk(first, last, cancel, &mut report).await?;
        }
        info!(
            window = ?report.window,
            checked = report.entries_checked,
            violations = report.violations.len(),
            "integrity check finished"
        );
        Ok(report)
    }

    /// Verify the whole ledger and compare its tail to the counter record.
    pub async fn verify_all(&self, cancel: &CancellationToken) -> LedgerResult<IntegrityReport> {
        let head = match bounded("head", self.timeout, self.store.head()).await {
            Ok(head) => head,
            Err(StoreError::CounterUnavailable(reason)) => {
                warn!(%reason, "counter record unavailable; verifying up to scanned head");
                None
            }
            Err(e) => return Err(LedgerError::Read(e)),
        };
        let scanned = bounded("scan_head", self.timeout, self.store.scan_head())
            .await
            .map_err(LedgerError::Read)?;

        let last = match (head, scanned) {
            (Some(h), Some(s)) => h.sequence.max(s.sequence),
            (Some(h), None) => h.sequence,
            (None, Some(s)) => s.sequence,
            (None, None) => 0,
        };
        let window = (last > 0).then_some((1, last));
        let mut report = IntegrityReport {
            range: None,
            window,
            entries_checked: 0,
            violations: Vec::new(),
        };
        if last > 0 {
            self.walk(1, last, cancel, &mut report).await?;
        }
        if let Some(head) = head {
            check_tail(&head, scanned, &mut report);
        }
        info!(
            window = ?report.window,
            checked = report.entries_checked,
            violations = report.violations.len(),
            "full ledger integrity check finished"
        );
        Ok(report)
    }

    async fn walk(
        &self,
        first: u64,
        last: u64,
        cancel: &CancellationToken,
        report: &mut IntegrityReport,
    ) -> LedgerResult<()> {
        let mut prev = self.predecessor(first).await?;
        let mut cursor = first;

        while cursor <= last {
            if cancel.is_cancelled() {
                return Err(LedgerError::VerificationCancelled {
                    checked: report.entries_checked,
                });
            }
            let page = bounded(
                "by_sequence",
                self.timeout,
                self.store.by_sequence(cursor, last, self.page_size),
            )
            .await
            .map_err(LedgerError::Read)?;
            let Some(tail) = page.last() else {
                break;
            };
            let next_cursor = tail.sequence_number.max(cursor) + 1;
            debug!(from = cursor, entries = page.len(), "verifying page");

            for entry in &page {
                prev = Some(check_entry(prev.as_ref(), first, entry, report)?);
                report.entries_checked += 1;
            }
            cursor = next_cursor;
        }
        Ok(())
    }

    /// The link the first entry of a window must carry.
    async fn predecessor(&self, first: u64) -> LedgerResult<Option<Anchor>> {
        if first <= 1 {
            return Ok(Some(Anchor::genesis()));
        }
        let found = bounded("by_sequence", self.timeout, self.store.by_sequence(first - 1, first - 1, 1))
            .await
            .map_err(LedgerError::Read)?;
        let Some(entry) = found.first() else {
            return Ok(None);
        };
        let computed = entry
            .compute_hash()
            .map_err(|e| LedgerError::Hashing(e.to_string()))?;
        Ok(Some(Anchor::of(entry, computed)))
    }
}

/// Sequence and hash of the entry preceding the one being checked.
#[derive(Clone, Copy, Debug)]
struct Anchor {
    sequence: u64,
    hash: EntryHash,
    /// Set when the stored hash fails recomputation.
    recomputed: Option<EntryHash>,
}

impl Anchor {
    fn genesis() -> Self {
        Self {
            sequence: 0,
            hash: EntryHash::GENESIS,
            recomputed: None,
        }
    }

    fn of(entry: &AuditEntry, computed: EntryHash) -> Self {
        Self {
            sequence: entry.sequence_number,
            hash: entry.hash,
            recomputed: (computed != entry.hash).then_some(computed),
        }
    }

    /// Digests a successor may legitimately name, stored hash first.
    fn accepted(&self) -> Vec<EntryHash> {
        std::iter::once(self.hash).chain(self.recomputed).collect()
    }
}

/// `prev` is `None` only for the first entry of a window whose predecessor
/// is not stored. Returns the anchor for the next entry.
fn check_entry(
    prev: Option<&Anchor>,
    window_start: u64,
    entry: &AuditEntry,
    report: &mut IntegrityReport,
) -> LedgerResult<Anchor> {
    let expected_seq = match prev {
        Some(anchor) => anchor.sequence + 1,
        None => window_start,
    };
    if entry.sequence_number > expected_seq {
        report.violations.push(Violation::on(
            entry,
            ViolationKind::SequenceGap,
            expected_seq.to_string(),
            entry.sequence_number.to_string(),
        ));
    } else if entry.sequence_number < expected_seq {
        report.violations.push(Violation::on(
            entry,
            ViolationKind::SequenceRegression,
            expected_seq.to_string(),
            entry.sequence_number.to_string(),
        ));
    }

    if entry.id.as_str().trim().is_empty() {
        report
            .violations
            .push(Violation::on(entry, ViolationKind::MissingField, "id", "blank"));
    }
    if normalize_timestamp(entry.timestamp) != entry.timestamp {
        report.violations.push(Violation::on(
            entry,
            ViolationKind::MalformedTimestamp,
            canonical_timestamp(&entry.timestamp),
            entry.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        ));
    }
    if entry.actor_id.trim().is_empty() {
        report
            .violations
            .push(Violation::on(entry, ViolationKind::MissingField, "actor_id", "blank"));
    }
    let has_patient = entry
        .patient_id
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty());
    if entry.is_medical() && !has_patient {
        report.violations.push(Violation::on(
            entry,
            ViolationKind::MissingPatientId,
            format!("patient_id on {}", entry.resource),
            "none",
        ));
    }

    if prev.is_none() {
        report.violations.push(Violation::on(
            entry,
            ViolationKind::ChainBreak,
            format!("stored entry #{}", entry.sequence_number.saturating_sub(1)),
            "predecessor missing",
        ));
    }

    let accepted = prev.map(Anchor::accepted).unwrap_or_default();
    let faults = HashChainVerifier::check_link_against(&accepted, entry)
        .map_err(|e| LedgerError::Hashing(e.to_string()))?;
    let mut computed = entry.hash;
    for fault in faults {
        let violation = match fault {
            LinkFault::ChainBreak { expected, found } => {
                Violation::on(entry, ViolationKind::ChainBreak, expected.to_hex(), found.to_hex())
            }
            LinkFault::HashMismatch { computed: recomputed, stored } => {
                computed = recomputed;
                Violation::on(entry, ViolationKind::HashMismatch, recomputed.to_hex(), stored.to_hex())
            }
        };
        report.violations.push(violation);
    }
    Ok(Anchor::of(entry, computed))
}

fn check_tail(head: &ChainHead, scanned: Option<ChainHead>, report: &mut IntegrityReport) {
    match scanned {
        Some(last) if last == *head => {}
        Some(last) if last.sequence == head.sequence => report.violations.push(Violation {
            kind: ViolationKind::ChainBreak,
            sequence: head.sequence,
            entry_id: None,
            expected: format!("counter hash {}", head.hash.to_hex()),
            actual: last.hash.to_hex(),
        }),
        Some(last) if last.sequence > head.sequence => report.violations.push(Violation {
            kind: ViolationKind::SequenceRegression,
            sequence: last.sequence,
            entry_id: None,
            expected: format!("counter at #{}", head.sequence),
            actual: format!("entry #{} stored past the counter", last.sequence),
        }),
        other => report.violations.push(Violation {
            kind: ViolationKind::TruncatedTail,
            sequence: head.sequence,
            entry_id: None,
            expected: format!("last entry #{}", head.sequence),
            actual: match other {
                Some(last) => format!("last entry #{}", last.sequence),
                None => "no entries".to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use vigil_crypto::ChainSealer;
    use vigil_store::InMemoryLedgerStore;
    use vigil_types::{ActorType, AuditAction, AuditResource, NewEntry};

    use super::*;
    use crate::validator::EntryValidator;

    async fn seeded(count: u64) -> Arc<InMemoryLedgerStore> {
        let store = Arc::new(InMemoryLedgerStore::new());
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        for i in 0..count {
            let head = store.head().await.unwrap();
            let candidate = NewEntry::new("D1", ActorType::Doctor, AuditAction::Read, AuditResource::MedicalRecord)
                .with_patient("P1")
                .at(start + ChronoDuration::hours(i as i64));
            let unsealed = EntryValidator.validate(&candidate).unwrap().into_unsealed(
                ChainHead::next_sequence(head.as_ref()),
                ChainHead::next_prev_hash(head.as_ref()),
            );
            store.append(head, &ChainSealer::seal(unsealed).unwrap()).await.unwrap();
        }
        store
    }

    fn verifier(store: Arc<InMemoryLedgerStore>, page_size: usize) -> IntegrityVerifier {
        IntegrityVerifier::new(store, page_size, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn clean_ledger_is_valid_across_pages() {
        let store = seeded(7).await;
        let report = verifier(store, 3).verify_all(&CancellationToken::new()).await.unwrap();
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.entries_checked, 7);
        assert_eq!(report.window, Some((1, 7)));
    }

    #[tokio::test]
    async fn empty_ledger_is_valid() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let report = verifier(store, 10).verify_all(&CancellationToken::new()).await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.window, None);
    }

    #[tokio::test]
    async fn one_edited_field_is_one_violation() {
        let store = seeded(5).await;
        store.tamper(3, |e| e.action = AuditAction::Delete).await;

        let report = verifier(store, 2).verify_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
        assert_eq!(report.violations[0].kind, ViolationKind::HashMismatch);
        assert_eq!(report.violations[0].sequence, 3);
    }

    #[tokio::test]
    async fn overwritten_hash_is_one_violation() {
        let store = seeded(5).await;
        store.tamper(3, |e| e.hash = EntryHash::from_bytes([7; 32])).await;

        let report = verifier(store, 2).verify_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
        assert_eq!(report.violations[0].kind, ViolationKind::HashMismatch);
        assert_eq!(report.violations[0].sequence, 3);
    }

    #[tokio::test]
    async fn overwritten_hash_outside_a_window_does_not_break_it() {
        let store = seeded(6).await;
        store.tamper(2, |e| e.hash = EntryHash::from_bytes([7; 32])).await;
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap();
        let range = TimeRange::new(start, start + ChronoDuration::hours(2)).unwrap();

        let report = verifier(store, 10)
            .verify_range(range, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_valid(), "{:?}", report.violations);
    }

    #[tokio::test]
    async fn sub_microsecond_timestamp_edit_is_caught() {
        let store = seeded(3).await;
        store
            .tamper(2, |e| e.timestamp += ChronoDuration::nanoseconds(250))
            .await;

        let report = verifier(store, 10).verify_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
        assert_eq!(report.violations[0].kind, ViolationKind::MalformedTimestamp);
        assert_eq!(report.violations[0].sequence, 2);
    }

    #[tokio::test]
    async fn removed_patient_names_only_that_entry() {
        let store = seeded(4).await;
        store.tamper(2, |e| e.patient_id = None).await;

        let report = verifier(store, 10).verify_all(&CancellationToken::new()).await.unwrap();
        let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::MissingPatientId));
        assert!(kinds.contains(&ViolationKind::HashMismatch));
        assert_eq!(report.offending_entries().len(), 1);
    }

    #[tokio::test]
    async fn deletion_is_a_gap_and_a_chain_break() {
        let store = seeded(5).await;
        store.remove(3).await;

        let report = verifier(store, 10).verify_all(&CancellationToken::new()).await.unwrap();
        let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::SequenceGap, ViolationKind::ChainBreak]);
        assert_eq!(report.violations[0].sequence, 4);
    }

    #[tokio::test]
    async fn truncated_tail_is_caught_against_counter() {
        let store = seeded(3).await;
        store.remove(3).await;

        let report = verifier(store, 10).verify_all(&CancellationToken::new()).await.unwrap();
        let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::TruncatedTail]);
    }

    #[tokio::test]
    async fn range_window_links_to_stored_predecessor() {
        let store = seeded(6).await;
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap();
        let range = TimeRange::new(start, start + ChronoDuration::hours(2)).unwrap();

        let report = verifier(store.clone(), 10)
            .verify_range(range, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_valid());
        assert_eq!(report.window, Some((3, 5)));
        assert_eq!(report.entries_checked, 3);

        store.remove(2).await;
        let report = verifier(store, 10)
            .verify_range(range, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::ChainBreak);
        assert_eq!(report.violations[0].sequence, 3);
    }

    #[tokio::test]
    async fn cancellation_stops_between_pages() {
        let store = seeded(4).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = verifier(store, 2).verify_all(&cancel).await.unwrap_err();
        assert!(matches!(err, LedgerError::VerificationCancelled { checked: 0 }));
    }
}
