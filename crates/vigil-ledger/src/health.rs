use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Binary health signal for operational alerting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Primary and secondary stores are both accepting writes.
    Nominal,
    /// The secondary store is failing; the primary is still authoritative.
    Degraded,
}

/// Point-in-time view of [`HealthMonitor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub replica: Option<String>,
    pub secondary_successes: u64,
    pub secondary_failures: u64,
    pub last_secondary_error: Option<String>,
    pub last_secondary_failure_at: Option<DateTime<Utc>>,
    pub emergency_records: u64,
    pub emergency_failures: u64,
}

#[derive(Default)]
struct LastFailure {
    message: Option<String>,
    at: Option<DateTime<Utc>>,
}

/// Tracks secondary-store and emergency-channel outcomes.
pub struct HealthMonitor {
    replica: Option<String>,
    degraded: AtomicBool,
    secondary_successes: AtomicU64,
    secondary_failures: AtomicU64,
    emergency_records: AtomicU64,
    emergency_failures: AtomicU64,
    last_failure: Mutex<LastFailure>,
}

impl HealthMonitor {
    pub fn new(replica: Option<String>) -> Self {
        Self {
            replica,
            degraded: AtomicBool::new(false),
            secondary_successes: AtomicU64::new(0),
            secondary_failures: AtomicU64::new(0),
            emergency_records: AtomicU64::new(0),
            emergency_failures: AtomicU64::new(0),
            last_failure: Mutex::new(LastFailure::default()),
        }
    }

    pub fn record_secondary_success(&self) {
        self.secondary_successes.fetch_add(1, Ordering::Relaxed);
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!(replica = ?self.replica, "secondary store recovered; health nominal");
        }
    }

    pub fn record_secondary_failure(&self, error: &str) {
        self.secondary_failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_failure.lock() {
            last.message = Some(error.to_string());
            last.at = Some(Utc::now());
        }
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(replica = ?self.replica, error, "secondary store failing; health degraded");
        }
    }

    pub fn record_emergency_written(&self) {
        self.emergency_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emergency_failed(&self) {
        self.emergency_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        if self.degraded.load(Ordering::SeqCst) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Nominal
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let (last_secondary_error, last_secondary_failure_at) = match self.last_failure.lock() {
            Ok(last) => (last.message.clone(), last.at),
            Err(_) => (None, None),
        };
        HealthSnapshot {
            status: self.status(),
            replica: self.replica.clone(),
            secondary_successes: self.secondary_successes.load(Ordering::Relaxed),
            secondary_failures: self.secondary_failures.load(Ordering::Relaxed),
            last_secondary_error,
            last_secondary_failure_at,
            emergency_records: self.emergency_records.load(Ordering::Relaxed),
            emergency_failures: self.emergency_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_nominal_without_replica() {
        let health = HealthMonitor::new(None);
        let snap = health.snapshot();
        assert_eq!(snap.status, HealthStatus::Nominal);
        assert!(snap.replica.is_none());
    }

    #[test]
    fn failure_degrades_and_success_recovers() {
        let health = HealthMonitor::new(Some("replica".into()));
        health.record_secondary_failure("connection refused");
        let snap = health.snapshot();
        assert_eq!(snap.status, HealthStatus::Degraded);
        assert_eq!(snap.secondary_failures, 1);
        assert_eq!(snap.last_secondary_error.as_deref(), Some("connection refused"));
        assert!(snap.last_secondary_failure_at.is_some());

        health.record_secondary_success();
        assert_eq!(health.status(), HealthStatus::Nominal);
        assert_eq!(health.snapshot().last_secondary_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn emergency_counters_accumulate() {
        let health = HealthMonitor::new(None);
        health.record_emergency_written();
        health.record_emergency_failed();
        health.record_emergency_failed();
        let snap = health.snapshot();
        assert_eq!(snap.emergency_records, 1);
        assert_eq!(snap.emergency_failures, 2);
    }

    #[test]
    fn snapshot_serializes_snake_case_status() {
        let health = HealthMonitor::new(None);
        health.record_secondary_failure("x");
        let json = serde_json::to_value(health.snapshot()).unwrap();
        assert_eq!(json["status"], "degraded");
    }
}
