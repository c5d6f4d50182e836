use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use vigil_types::{
    normalize_timestamp, ActorType, AuditAction, AuditEntry, AuditResource, EntryHash, EntryId,
    NewEntry,
};

pub const MAX_ACTOR_ID_LEN: usize = 128;
pub const MAX_ID_FIELD_LEN: usize = 128;
pub const MAX_CONTEXT_LEN: usize = 512;
pub const MAX_ERROR_MESSAGE_LEN: usize = 2_048;
pub const MAX_METADATA_ENTRIES: usize = 32;
pub const MAX_METADATA_KEY_LEN: usize = 64;
pub const MAX_METADATA_VALUE_LEN: usize = 1_024;

/// Contract violations found in a candidate entry. Never retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` must not be blank")]
    BlankField(&'static str),

    #[error("{resource} entries must carry a patient_id")]
    MissingPatientId { resource: AuditResource },

    #[error("field `{field}` exceeds {max} characters")]
    FieldTooLong { field: String, max: usize },

    #[error("metadata has {count} entries; at most {max} allowed")]
    TooManyMetadataEntries { count: usize, max: usize },
}

/// A candidate that passed validation, with its id and normalized
/// timestamp fixed. Only sequencing and hashing remain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedEntry {
    id: EntryId,
    timestamp: DateTime<Utc>,
    actor_id: String,
    actor_type: ActorType,
    action: AuditAction,
    resource: AuditResource,
    resource_id: Option<String>,
    patient_id: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    session_id: Option<String>,
    success: bool,
    error_message: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl ValidatedEntry {
    pub fn id(&self) -> &EntryId {
        &self.id
    }

    /// Place the entry at a chain position. `hash` is left at genesis until sealed.
    pub fn into_unsealed(self, sequence_number: u64, prev_hash: EntryHash) -> AuditEntry {
        AuditEntry {
            id: self.id,
            timestamp: self.timestamp,
            actor_id: self.actor_id,
            actor_type: self.actor_type,
            action: self.action,
            resource: self.resource,
            resource_id: self.resource_id,
            patient_id: self.patient_id,
            ip: self.ip,
            user_agent: self.user_agent,
            session_id: self.session_id,
            success: self.success,
            error_message: self.error_message,
            metadata: self.metadata,
            hash: EntryHash::GENESIS,
            prev_hash,
            sequence_number,
        }
    }
}

/// Enforces the audit-entry contract. Pure; no side effects.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntryValidator;

impl EntryValidator {
    pub fn validate(&self, candidate: &NewEntry) -> Result<ValidatedEntry, ValidationError> {
        let timestamp = candidate
            .timestamp
            .ok_or(ValidationError::MissingField("timestamp"))?;
        let actor_id = required_text("actor_id", candidate.actor_id.as_deref(), MAX_ACTOR_ID_LEN)?;
        let actor_type = candidate
            .actor_type
            .ok_or(ValidationError::MissingField("actor_type"))?;
        let action = candidate
            .action
            .ok_or(ValidationError::MissingField("action"))?;
        let resource = candidate
            .resource
            .ok_or(ValidationError::MissingField("resource"))?;

        let patient_id = optional_text("patient_id", candidate.patient_id.as_deref(), MAX_ID_FIELD_LEN)?;
        if resource.is_medical() && patient_id.is_none() {
            return Err(ValidationError::MissingPatientId { resource });
        }

        let resource_id =
            optional_text("resource_id", candidate.resource_id.as_deref(), MAX_ID_FIELD_LEN)?;
        let ip = optional_text("ip", candidate.ip.as_deref(), MAX_CONTEXT_LEN)?;
        let user_agent = optional_text("user_agent", candidate.user_agent.as_deref(), MAX_CONTEXT_LEN)?;
        let session_id = optional_text("session_id", candidate.session_id.as_deref(), MAX_ID_FIELD_LEN)?;
        let error_message = optional_text(
            "error_message",
            candidate.error_message.as_deref(),
            MAX_ERROR_MESSAGE_LEN,
        )?;
        check_metadata(&candidate.metadata)?;

        Ok(ValidatedEntry {
            id: EntryId::generate(),
            timestamp: normalize_timestamp(timestamp),
            actor_id,
            actor_type,
            action,
            resource,
            resource_id,
            patient_id,
            ip,
            user_agent,
            session_id,
            success: candidate.success,
            error_message,
            metadata: candidate.metadata.clone(),
        })
    }
}

fn required_text(field: &'static str, value: Option<&str>, max: usize) -> Result<String, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField(field))?;
    if value.trim().is_empty() {
        return Err(ValidationError::BlankField(field));
    }
    check_len(field, value, max)?;
    Ok(value.to_string())
}

/// Blank optional text is treated as absent.
fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => {
            check_len(field, v, max)?;
            Ok(Some(v.to_string()))
        }
        _ => Ok(None),
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

fn check_metadata(metadata: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(ValidationError::TooManyMetadataEntries {
            count: metadata.len(),
            max: MAX_METADATA_ENTRIES,
        });
    }
    for (key, value) in metadata {
        if key.trim().is_empty() {
            return Err(ValidationError::BlankField("metadata key"));
        }
        check_len("metadata key", key, MAX_METADATA_KEY_LEN)?;
        check_len(&format!("metadata.{key}"), value, MAX_METADATA_VALUE_LEN)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_record() -> NewEntry {
        NewEntry::new("D1", ActorType::Doctor, AuditAction::Read, AuditResource::MedicalRecord)
            .with_patient("P1")
    }

    #[test]
    fn accepts_complete_candidate() {
        let validated = EntryValidator.validate(&read_record()).unwrap();
        let entry = validated.into_unsealed(4, EntryHash::GENESIS);
        assert_eq!(entry.sequence_number, 4);
        assert_eq!(entry.patient_id.as_deref(), Some("P1"));
        assert_eq!(entry.timestamp.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn every_medical_resource_requires_patient() {
        for resource in AuditResource::ALL.iter().filter(|r| r.is_medical()) {
            let candidate = NewEntry::new("D1", ActorType::Doctor, AuditAction::Read, *resource);
            assert_eq!(
                EntryValidator.validate(&candidate),
                Err(ValidationError::MissingPatientId { resource: *resource })
            );
        }
    }

    #[test]
    fn blank_patient_counts_as_missing() {
        let candidate = NewEntry::new("D1", ActorType::Doctor, AuditAction::Read, AuditResource::LabResult)
            .with_patient("   ");
        assert!(matches!(
            EntryValidator.validate(&candidate),
            Err(ValidationError::MissingPatientId { .. })
        ));
    }

    #[test]
    fn non_medical_resource_needs_no_patient() {
        let candidate = NewEntry::new("A1", ActorType::Admin, AuditAction::Login, AuditResource::System);
        assert!(EntryValidator.validate(&candidate).is_ok());
    }

    #[test]
    fn required_fields_are_enforced() {
        let mut candidate = read_record();
        candidate.actor_id = None;
        assert_eq!(
            EntryValidator.validate(&candidate),
            Err(ValidationError::MissingField("actor_id"))
        );

        let mut candidate = read_record();
        candidate.actor_id = Some(" ".into());
        assert_eq!(
            EntryValidator.validate(&candidate),
            Err(ValidationError::BlankField("actor_id"))
        );

        let mut candidate = read_record();
        candidate.action = None;
        assert_eq!(
            EntryValidator.validate(&candidate),
            Err(ValidationError::MissingField("action"))
        );

        let mut candidate = read_record();
        candidate.timestamp = None;
        assert_eq!(
            EntryValidator.validate(&candidate),
            Err(ValidationError::MissingField("timestamp"))
        );
    }

    #[test]
    fn metadata_is_bounded() {
        let mut candidate = read_record();
        for i in 0..=MAX_METADATA_ENTRIES {
            candidate.metadata.insert(format!("k{i}"), "v".into());
        }
        assert!(matches!(
            EntryValidator.validate(&candidate),
            Err(ValidationError::TooManyMetadataEntries { .. })
        ));

        let candidate = read_record().with_metadata("note", "x".repeat(MAX_METADATA_VALUE_LEN + 1));
        assert_eq!(
            EntryValidator.validate(&candidate),
            Err(ValidationError::FieldTooLong {
                field: "metadata.note".into(),
                max: MAX_METADATA_VALUE_LEN
            })
        );
    }

    #[test]
    fn each_validation_gets_a_fresh_id() {
        let a = EntryValidator.validate(&read_record()).unwrap();
        let b = EntryValidator.validate(&read_record()).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
