use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::EntryHash;

/// Generates `as_str`, `Display`, and `FromStr` for a snake_case wire enum.
macro_rules! wire_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The snake_case wire name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(TypeError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Opaque unique identifier of an audit entry (UUID v4 text).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of principal performing the audited action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Doctor,
    Patient,
    Admin,
    Company,
    System,
}

wire_enum!(ActorType, "actor type", {
    Doctor => "doctor",
    Patient => "patient",
    Admin => "admin",
    Company => "company",
    System => "system",
});

/// The audited action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Read,
    Create,
    Update,
    Delete,
    Export,
    AccessDenied,
    AccessGranted,
    Login,
    Logout,
    LoginFailed,
    EmergencyAccess,
    SecurityViolation,
}

wire_enum!(AuditAction, "action", {
    Read => "read",
    Create => "create",
    Update => "update",
    Delete => "delete",
    Export => "export",
    AccessDenied => "access_denied",
    AccessGranted => "access_granted",
    Login => "login",
    Logout => "logout",
    LoginFailed => "login_failed",
    EmergencyAccess => "emergency_access",
    SecurityViolation => "security_violation",
});

/// The kind of record the action touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResource {
    Patient,
    MedicalRecord,
    Appointment,
    Prescription,
    LabResult,
    TelemedicineSession,
    Doctor,
    Company,
    User,
    System,
    AuditLog,
}

wire_enum!(AuditResource, "resource", {
    Patient => "patient",
    MedicalRecord => "medical_record",
    Appointment => "appointment",
    Prescription => "prescription",
    LabResult => "lab_result",
    TelemedicineSession => "telemedicine_session",
    Doctor => "doctor",
    Company => "company",
    User => "user",
    System => "system",
    AuditLog => "audit_log",
});

impl AuditResource {
    /// Medical-category resources. Entries touching these must name a patient.
    pub fn is_medical(&self) -> bool {
        matches!(
            self,
            AuditResource::Patient
                | AuditResource::MedicalRecord
                | AuditResource::Appointment
                | AuditResource::Prescription
                | AuditResource::LabResult
                | AuditResource::TelemedicineSession
        )
    }
}

/// Truncate a timestamp to the precision the canonical form carries.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Canonical timestamp text: RFC 3339, six fractional digits, `Z` suffix.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Raw candidate submitted by a producer.
///
/// Every field a producer may forget is optional here; the ledger's entry
/// validator decides what is actually required.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub actor_type: Option<ActorType>,
    #[serde(default)]
    pub action: Option<AuditAction>,
    #[serde(default)]
    pub resource: Option<AuditResource>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_success() -> bool {
    true
}

impl NewEntry {
    /// A successful action stamped with the current time.
    pub fn new(
        actor_id: impl Into<String>,
        actor_type: ActorType,
        action: AuditAction,
        resource: AuditResource,
    ) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            actor_id: Some(actor_id.into()),
            actor_type: Some(actor_type),
            action: Some(action),
            resource: Some(resource),
            resource_id: None,
            patient_id: None,
            ip: None,
            user_agent: None,
            session_id: None,
            success: true,
            error_message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Attach request context (all optional).
    pub fn with_context(
        mut self,
        ip: Option<String>,
        user_agent: Option<String>,
        session_id: Option<String>,
    ) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self.session_id = session_id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Mark the audited action as failed.
    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }
}

/// The `(sequence, hash)` pair of the newest entry: the ledger's counter record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainHead {
    pub sequence: u64,
    pub hash: EntryHash,
}

impl ChainHead {
    pub fn new(sequence: u64, hash: EntryHash) -> Self {
        Self { sequence, hash }
    }

    /// Sequence number the next entry must carry.
    pub fn next_sequence(head: Option<&ChainHead>) -> u64 {
        head.map(|h| h.sequence + 1).unwrap_or(1)
    }

    /// `prev_hash` the next entry must carry.
    pub fn next_prev_hash(head: Option<&ChainHead>) -> EntryHash {
        head.map(|h| h.hash).unwrap_or(EntryHash::GENESIS)
    }
}

/// One immutable ledger entry.
///
/// Once persisted an entry is never updated. `hash` covers every other
/// field, `prev_hash` included, so editing any of them is detectable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: EntryId,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub action: AuditAction,
    pub resource: AuditResource,
    pub resource_id: Option<String>,
    pub patient_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub hash: EntryHash,
    pub prev_hash: EntryHash,
    pub sequence_number: u64,
}

/// Borrowed view of an entry in canonical field order, `hash` excluded.
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    id: &'a str,
    timestamp: String,
    actor_id: &'a str,
    actor_type: ActorType,
    action: AuditAction,
    resource: AuditResource,
    resource_id: Option<&'a str>,
    patient_id: Option<&'a str>,
    ip: Option<&'a str>,
    user_agent: Option<&'a str>,
    session_id: Option<&'a str>,
    success: bool,
    error_message: Option<&'a str>,
    metadata: &'a BTreeMap<String, String>,
    prev_hash: String,
    sequence_number: u64,
}

impl AuditEntry {
    /// Deterministic bytes the chain digest is computed over.
    ///
    /// Field order is fixed by declaration, metadata is sorted, and the
    /// timestamp is rendered in canonical form.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TypeError> {
        let view = CanonicalEntry {
            id: self.id.as_str(),
            timestamp: canonical_timestamp(&self.timestamp),
            actor_id: &self.actor_id,
            actor_type: self.actor_type,
            action: self.action,
            resource: self.resource,
            resource_id: self.resource_id.as_deref(),
            patient_id: self.patient_id.as_deref(),
            ip: self.ip.as_deref(),
            user_agent: self.user_agent.as_deref(),
            session_id: self.session_id.as_deref(),
            success: self.success,
            error_message: self.error_message.as_deref(),
            metadata: &self.metadata,
            prev_hash: self.prev_hash.to_hex(),
            sequence_number: self.sequence_number,
        };
        serde_json::to_vec(&view).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// This entry as a counter record.
    pub fn head(&self) -> ChainHead {
        ChainHead::new(self.sequence_number, self.hash)
    }

    /// Returns `true` if this entry touches a medical-category resource.
    pub fn is_medical(&self) -> bool {
        self.resource.is_medical()
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "#{} {} {}:{} {} {}",
            self.sequence_number,
            canonical_timestamp(&self.timestamp),
            self.actor_type,
            self.actor_id,
            self.action,
            self.resource
        )
    }
}
