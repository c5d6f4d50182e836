use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use vigil_crypto::{ChainLinked, HashChainVerifier};
use vigil_ledger::{
    AuditLedger, CancellationToken, FindRequest, HealthStatus, LedgerConfig, LedgerError,
    RetryPolicy, ValidationError, ViolationKind,
};
use vigil_store::testing::{FailingEmergencyChannel, FailingReplica, FaultyLedgerStore};
use vigil_store::{
    EmergencyChannel, FileEmergencyChannel, FileLedgerStore, InMemoryEmergencyChannel,
    InMemoryLedgerStore, InMemoryReplica, LedgerStore, SyncMode,
};
use vigil_types::{
    ActorType, AuditAction, AuditEntry, AuditResource, EntryFilter, EntryHash, FailureStage,
    NewEntry, TimeRange,
};

fn memory_ledger() -> (AuditLedger, Arc<InMemoryLedgerStore>, Arc<InMemoryEmergencyChannel>) {
    let store = Arc::new(InMemoryLedgerStore::new());
    let emergency = Arc::new(InMemoryEmergencyChannel::new());
    let ledger = AuditLedger::new(store.clone(), emergency.clone(), LedgerConfig::default());
    (ledger, store, emergency)
}

fn record_read(actor: &str, patient: &str) -> NewEntry {
    NewEntry::new(actor, ActorType::Doctor, AuditAction::Read, AuditResource::MedicalRecord)
        .with_patient(patient)
}

#[tokio::test]
async fn sequential_creates_are_gap_free() {
    let (ledger, store, _) = memory_ledger();
    for i in 1..=25u64 {
        let entry = ledger.create(record_read("D1", "P1")).await.unwrap();
        assert_eq!(entry.sequence_number, i);
    }

    let all = store.by_sequence(1, 25, 100).await.unwrap();
    let seqs: Vec<u64> = all.iter().map(|e| e.sequence_number).collect();
    assert_eq!(seqs, (1..=25).collect::<Vec<_>>());
    HashChainVerifier::verify_chain(&all).unwrap();
}

#[tokio::test]
async fn medical_entry_without_patient_is_rejected() {
    let (ledger, store, emergency) = memory_ledger();
    let candidate = NewEntry::new("D1", ActorType::Doctor, AuditAction::Read, AuditResource::Prescription);

    let err = ledger.create(candidate).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Validation(ValidationError::MissingPatientId {
            resource: AuditResource::Prescription
        })
    ));
    assert!(store.is_empty().await);

    let records = emergency.records(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].failing_stage, FailureStage::Validation);
}

#[tokio::test]
async fn stored_hashes_recompute_exactly() {
    let (ledger, _, _) = memory_ledger();
    let entry = ledger
        .create(record_read("D1", "P1").with_metadata("module", "doctors_app"))
        .await
        .unwrap();
    assert_eq!(entry.compute_hash().unwrap(), entry.hash);

    let mut edited = entry.clone();
    edited.success = false;
    assert_ne!(edited.compute_hash().unwrap(), entry.hash);
}

#[tokio::test]
async fn one_out_of_band_edit_is_reported_once() {
    let edits: [(ViolationKind, fn(&mut AuditEntry)); 3] = [
        (ViolationKind::HashMismatch, |e| e.actor_id = "intruder".into()),
        (ViolationKind::HashMismatch, |e| e.hash = EntryHash::from_bytes([7; 32])),
        (ViolationKind::MalformedTimestamp, |e| e.timestamp += Duration::nanoseconds(1)),
    ];
    for (kind, edit) in edits {
        let (ledger, store, _) = memory_ledger();
        for _ in 0..10 {
            ledger.create(record_read("D1", "P1")).await.unwrap();
        }
        let cancel = CancellationToken::new();
        assert!(ledger.verify_all(&cancel).await.unwrap().is_valid());

        store.tamper(6, edit).await;
        let victim = store.by_sequence(6, 6, 1).await.unwrap().remove(0);

        let report = ledger.verify_all(&cancel).await.unwrap();
        assert_eq!(report.violations.len(), 1, "{kind}: {:?}", report.violations);
        assert_eq!(report.violations[0].kind, kind);
        assert_eq!(report.violations[0].entry_id.as_ref(), Some(&victim.id));

        let window = ledger
            .verify_integrity(TimeRange::last_days(1), &cancel)
            .await
            .unwrap();
        assert_eq!(window.offending_entries(), vec![victim.id]);
    }
}

#[tokio::test]
async fn primary_failure_writes_emergency_record_and_errors() {
    let store = Arc::new(FaultyLedgerStore::new());
    let emergency = Arc::new(InMemoryEmergencyChannel::new());
    let ledger = AuditLedger::new(store.clone(), emergency.clone(), LedgerConfig::default());
    store.fail_appends(true);

    let candidate = record_read("D1", "P7");
    let err = ledger.create(candidate.clone()).await.unwrap_err();
    assert!(matches!(err, LedgerError::PrimaryPersistence(_)));
    assert!(err.is_critical());

    let records = emergency.records(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].failing_stage, FailureStage::PrimaryPersistence);
    assert_eq!(records[0].candidate(), Some(candidate));
    assert_eq!(ledger.health().emergency_records, 1);
}

#[tokio::test]
async fn emergency_failure_still_surfaces_original_error() {
    let store = Arc::new(FaultyLedgerStore::new());
    store.fail_appends(true);
    let ledger = AuditLedger::new(store, Arc::new(FailingEmergencyChannel), LedgerConfig::default());

    let err = ledger.create(record_read("D1", "P1")).await.unwrap_err();
    assert!(matches!(err, LedgerError::PrimaryPersistence(_)));
    assert_eq!(ledger.health().emergency_failures, 1);
}

#[tokio::test]
async fn failed_primary_write_burns_no_sequence_number() {
    let store = Arc::new(FaultyLedgerStore::new());
    let ledger = AuditLedger::new(store.clone(), Arc::new(InMemoryEmergencyChannel::new()), LedgerConfig::default());

    assert_eq!(ledger.create(record_read("D1", "P1")).await.unwrap().sequence_number, 1);
    store.fail_appends(true);
    assert!(ledger.create(record_read("D1", "P1")).await.is_err());
    store.fail_appends(false);
    assert_eq!(ledger.create(record_read("D1", "P1")).await.unwrap().sequence_number, 2);
}

#[tokio::test]
async fn head_conflicts_are_retried() {
    let store = Arc::new(FaultyLedgerStore::new());
    let ledger = AuditLedger::new(store.clone(), Arc::new(InMemoryEmergencyChannel::new()), LedgerConfig::default());
    store.force_conflicts(2);

    let entry = ledger.create(record_read("D1", "P1")).await.unwrap();
    assert_eq!(entry.sequence_number, 1);
    assert_eq!(store.append_calls(), 3);
}

#[tokio::test]
async fn exhausted_retries_are_transient_allocation_errors() {
    let store = Arc::new(FaultyLedgerStore::new());
    let emergency = Arc::new(InMemoryEmergencyChannel::new());
    let config = LedgerConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
        ..LedgerConfig::default()
    };
    let ledger = AuditLedger::new(store.clone(), emergency.clone(), config);
    store.force_conflicts(100);

    let err = ledger.create(record_read("D1", "P1")).await.unwrap_err();
    assert!(matches!(err, LedgerError::TransientAllocation { attempts: 3 }));
    assert!(err.is_transient());
    assert_eq!(store.append_calls(), 3);
    assert!(store.inner().is_empty().await);
    assert_eq!(emergency.records(1).await.unwrap()[0].failing_stage, FailureStage::Allocation);
}

#[tokio::test]
async fn counter_outage_uses_scan_fallback() {
    let store = Arc::new(FaultyLedgerStore::new());
    let ledger = AuditLedger::new(store.clone(), Arc::new(InMemoryEmergencyChannel::new()), LedgerConfig::default());
    ledger.create(record_read("D1", "P1")).await.unwrap();
    ledger.create(record_read("D1", "P1")).await.unwrap();

    store.counter_down(true);
    let entry = ledger.create(record_read("D1", "P1")).await.unwrap();
    assert_eq!(entry.sequence_number, 3);

    store.counter_down(false);
    assert!(ledger.verify_all(&CancellationToken::new()).await.unwrap().is_valid());
}

#[tokio::test]
async fn replica_failure_never_reaches_the_caller() {
    let replica = Arc::new(FailingReplica::new());
    let ledger = AuditLedger::with_replica(
        Arc::new(InMemoryLedgerStore::new()),
        replica.clone(),
        Arc::new(InMemoryEmergencyChannel::new()),
        LedgerConfig::default(),
    );

    let entry = ledger.create(record_read("D1", "P1")).await.unwrap();
    assert_eq!(entry.sequence_number, 1);
    assert_eq!(replica.attempts(), 1);

    let health = ledger.health();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.replica.as_deref(), Some("failing-replica"));
}

#[tokio::test]
async fn healthy_replica_mirrors_every_entry() {
    let replica = Arc::new(InMemoryReplica::new());
    let ledger = AuditLedger::with_replica(
        Arc::new(InMemoryLedgerStore::new()),
        replica.clone(),
        Arc::new(InMemoryEmergencyChannel::new()),
        LedgerConfig::default(),
    );
    for _ in 0..3 {
        ledger.create(record_read("D1", "P1")).await.unwrap();
    }
    assert_eq!(replica.entries().await.len(), 3);
    assert_eq!(ledger.health().status, HealthStatus::Nominal);
}

#[tokio::test]
async fn subject_export_is_filtered_and_newest_first() {
    let (ledger, _, _) = memory_ledger();
    for i in 0..6 {
        let patient = if i % 2 == 0 { "P1" } else { "P2" };
        ledger.create(record_read("D1", patient)).await.unwrap();
    }
    ledger
        .create(NewEntry::new("A1", ActorType::Admin, AuditAction::Login, AuditResource::System))
        .await
        .unwrap();

    let history = ledger.export_subject_history("P1").await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|e| e.patient_id.as_deref() == Some("P1")));
    let seqs: Vec<u64> = history.iter().map(|e| e.sequence_number).collect();
    assert_eq!(seqs, vec![5, 3, 1]);
}

#[tokio::test]
async fn stats_scenario_counts_one_actor_three_actions() {
    let (ledger, _, _) = memory_ledger();
    let start = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
    for (i, action) in [AuditAction::Read, AuditAction::Update, AuditAction::Export]
        .into_iter()
        .enumerate()
    {
        let candidate = NewEntry::new("D1", ActorType::Doctor, action, AuditResource::MedicalRecord)
            .with_patient("P1")
            .at(start + Duration::minutes(i as i64));
        ledger.create(candidate).await.unwrap();
    }

    let range = TimeRange::new(start, start + Duration::hours(1)).unwrap();
    let stats = ledger.get_stats(range).await.unwrap();
    assert_eq!(stats.total_entries, 3);
    assert_eq!(stats.by_action.len(), 3);
    for action in [AuditAction::Read, AuditAction::Update, AuditAction::Export] {
        assert_eq!(stats.by_action.get(&action), Some(&1));
    }
    assert_eq!(stats.unique_actors, 1);
    assert_eq!(stats.failed_count, 0);
}

#[tokio::test]
async fn find_many_filters_and_pages() {
    let (ledger, _, _) = memory_ledger();
    for i in 0..8 {
        let mut candidate = record_read(if i < 5 { "D1" } else { "D2" }, "P1");
        if i == 7 {
            candidate = candidate.failed("record locked");
        }
        ledger.create(candidate).await.unwrap();
    }

    let by_actor = EntryFilter {
        actor_id: Some("D1".into()),
        ..EntryFilter::default()
    };
    let page = ledger
        .find_many(&FindRequest::new(by_actor.clone()).page(1, 2))
        .await
        .unwrap();
    let seqs: Vec<u64> = page.iter().map(|e| e.sequence_number).collect();
    assert_eq!(seqs, vec![4, 3]);
    assert_eq!(ledger.count(&by_actor).await.unwrap(), 5);

    let failures = EntryFilter {
        success: Some(false),
        ..EntryFilter::default()
    };
    let failed = ledger.find_many(&FindRequest::new(failures)).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_message.as_deref(), Some("record locked"));

    let found = ledger.find_by_id(&failed[0].id).await.unwrap();
    assert_eq!(found.as_ref(), Some(&failed[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_producers_get_distinct_contiguous_sequences() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let ledger = Arc::new(AuditLedger::new(
        store.clone(),
        Arc::new(InMemoryEmergencyChannel::new()),
        LedgerConfig::default(),
    ));

    let mut handles = Vec::new();
    for producer in 0..50 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .create(record_read(&format!("producer-{producer}"), "P1"))
                .await
        }));
    }

    let mut seqs = BTreeSet::new();
    for handle in handles {
        let entry = handle.await.unwrap().unwrap();
        assert!(seqs.insert(entry.sequence_number), "duplicate sequence");
    }
    assert_eq!(seqs, (1..=50).collect::<BTreeSet<u64>>());

    let all = store.by_sequence(1, 50, 100).await.unwrap();
    HashChainVerifier::verify_chain(&all).unwrap();
    assert!(ledger.verify_all(&CancellationToken::new()).await.unwrap().is_valid());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_ledgers_on_one_store_arbitrate_through_the_counter() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let config = LedgerConfig {
        retry: RetryPolicy {
            max_attempts: 50,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        ..LedgerConfig::default()
    };
    let a = Arc::new(AuditLedger::new(store.clone(), Arc::new(InMemoryEmergencyChannel::new()), config.clone()));
    let b = Arc::new(AuditLedger::new(store.clone(), Arc::new(InMemoryEmergencyChannel::new()), config));

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = if i % 2 == 0 { a.clone() } else { b.clone() };
        handles.push(tokio::spawn(async move { ledger.create(record_read("D1", "P1")).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let all = store.by_sequence(1, 100, 100).await.unwrap();
    assert_eq!(all.len(), 20);
    HashChainVerifier::verify_chain(&all).unwrap();
}

#[tokio::test]
async fn file_backed_ledger_survives_restart() {
    let data = tempfile::tempdir().unwrap();
    let emergency_dir = tempfile::tempdir().unwrap();

    let first_id = {
        let store = Arc::new(FileLedgerStore::open(data.path(), SyncMode::EveryWrite).unwrap());
        let emergency = Arc::new(FileEmergencyChannel::open(emergency_dir.path()).unwrap());
        let ledger = AuditLedger::new(store, emergency, LedgerConfig::default());
        let first = ledger.create(record_read("D1", "P1")).await.unwrap();
        ledger.create(record_read("D2", "P1")).await.unwrap();
        first.id
    };

    let store = Arc::new(FileLedgerStore::open(data.path(), SyncMode::EveryWrite).unwrap());
    let emergency = Arc::new(FileEmergencyChannel::open(emergency_dir.path()).unwrap());
    let ledger = AuditLedger::new(store, emergency, LedgerConfig::default());

    let third = ledger.create(record_read("D3", "P1")).await.unwrap();
    assert_eq!(third.sequence_number, 3);
    assert!(ledger.find_by_id(&first_id).await.unwrap().is_some());
    assert!(ledger.verify_all(&CancellationToken::new()).await.unwrap().is_valid());
}

/// Byte offset just past the first `frames` frames of a framed log.
fn frame_boundary(bytes: &[u8], frames: usize) -> u64 {
    let mut offset = 0usize;
    for _ in 0..frames {
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 8 + len;
    }
    offset as u64
}

#[tokio::test]
async fn entries_cut_from_the_log_tail_are_detected_and_never_reused() {
    let data = tempfile::tempdir().unwrap();
    let emergency_dir = tempfile::tempdir().unwrap();
    let open = || {
        let store = Arc::new(FileLedgerStore::open(data.path(), SyncMode::EveryWrite).unwrap());
        let emergency = Arc::new(FileEmergencyChannel::open(emergency_dir.path()).unwrap());
        AuditLedger::new(store, emergency, LedgerConfig::default())
    };

    {
        let ledger = open();
        for _ in 0..5 {
            ledger.create(record_read("D1", "P1")).await.unwrap();
        }
    }
    let log_path = data.path().join(vigil_store::file::LEDGER_LOG);
    let cut = frame_boundary(&std::fs::read(&log_path).unwrap(), 3);
    std::fs::OpenOptions::new()
        .write(true)
        .open(&log_path)
        .unwrap()
        .set_len(cut)
        .unwrap();

    let ledger = open();
    let report = ledger.verify_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.entries_checked, 3);
    let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
    assert_eq!(kinds, vec![ViolationKind::TruncatedTail], "{:?}", report.violations);

    let next = ledger.create(record_read("D1", "P1")).await.unwrap();
    assert_eq!(next.sequence_number, 6);
}
