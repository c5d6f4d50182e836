use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{EntryId, NewEntry};

/// The creation stage that failed before an entry reached the primary store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Validation,
    Allocation,
    Hashing,
    PrimaryPersistence,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Validation => "validation",
            FailureStage::Allocation => "allocation",
            FailureStage::Hashing => "hashing",
            FailureStage::PrimaryPersistence => "primary_persistence",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-resort record of a failed entry creation.
///
/// Written to the emergency channel, never to the ledger, so it has no
/// sequence number and does not take part in the hash chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyRecord {
    pub id: EntryId,
    pub timestamp: DateTime<Utc>,
    pub failing_stage: FailureStage,
    /// JSON rendering of the candidate as submitted.
    pub payload_snapshot: String,
    pub error_message: String,
}

impl EmergencyRecord {
    /// Snapshot a candidate together with the failure that stopped it.
    pub fn capture(stage: FailureStage, candidate: &NewEntry, error_message: impl Into<String>) -> Self {
        let payload_snapshot =
            serde_json::to_string(candidate).unwrap_or_else(|_| format!("{candidate:?}"));
        Self {
            id: EntryId::generate(),
            timestamp: Utc::now(),
            failing_stage: stage,
            payload_snapshot,
            error_message: error_message.into(),
        }
    }

    /// Parse the snapshot back into the submitted candidate, if it was JSON.
    pub fn candidate(&self) -> Option<NewEntry> {
        serde_json::from_str(&self.payload_snapshot).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ActorType, AuditAction, AuditResource};

    #[test]
    fn capture_keeps_the_full_candidate() {
        let candidate = NewEntry::new("D1", ActorType::Doctor, AuditAction::Update, AuditResource::Prescription)
            .with_patient("P9")
            .with_metadata("reason", "dose change");
        let record = EmergencyRecord::capture(FailureStage::PrimaryPersistence, &candidate, "store down");

        assert_eq!(record.failing_stage, FailureStage::PrimaryPersistence);
        assert_eq!(record.error_message, "store down");
        assert_eq!(record.candidate(), Some(candidate));
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&FailureStage::PrimaryPersistence).unwrap();
        assert_eq!(json, "\"primary_persistence\"");
        assert_eq!(FailureStage::Allocation.to_string(), "allocation");
    }
}
