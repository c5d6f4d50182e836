use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use vigil_ledger::{
    AuditLedger, CancellationToken, FindRequest, HealthSnapshot, IntegrityReport, LedgerError,
};
use vigil_types::{
    AuditAction, AuditEntry, AuditResource, AuditStats, EmergencyRecord, EntryFilter, EntryId,
    NewEntry, TimeRange,
};

use crate::error::{ServerError, ServerResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<AuditLedger>,
    /// Cancelled on shutdown so long verifications stop between pages.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(ledger: Arc<AuditLedger>) -> Self {
        Self {
            ledger,
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RangeParams {
    fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    fn range(&self) -> ServerResult<TimeRange> {
        TimeRange::from_bounds(self.from, self.to).map_err(|e| ServerError::BadRequest(e.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EntryParams {
    pub actor_id: Option<String>,
    pub patient_id: Option<String>,
    pub resource: Option<AuditResource>,
    pub action: Option<AuditAction>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl EntryParams {
    fn into_request(self) -> ServerResult<FindRequest> {
        let bounds = RangeParams {
            from: self.from,
            to: self.to,
        };
        let range = if bounds.is_open() {
            None
        } else {
            Some(bounds.range()?)
        };
        Ok(FindRequest {
            filter: EntryFilter {
                actor_id: self.actor_id,
                patient_id: self.patient_id,
                resource: self.resource,
                action: self.action,
                success: self.success,
                range,
            },
            offset: self.offset,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct EntryPage {
    pub entries: Vec<AuditEntry>,
    pub total: u64,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct IntegrityResponse {
    pub valid: bool,
    pub offending_entries: Vec<EntryId>,
    #[serde(flatten)]
    pub report: IntegrityReport,
}

#[derive(Debug, Deserialize)]
pub struct EmergencyParams {
    pub limit: Option<usize>,
}

/// `POST /v1/entries`
pub async fn create_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut candidate): Json<NewEntry>,
) -> ServerResult<(StatusCode, Json<AuditEntry>)> {
    if candidate.timestamp.is_none() {
        candidate.timestamp = Some(Utc::now());
    }
    if candidate.user_agent.is_none() {
        candidate.user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
    let entry = state.ledger.create(candidate).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `GET /v1/entries`
pub async fn list_entries(
    State(state): State<AppState>,
    Query(params): Query<EntryParams>,
) -> ServerResult<Json<EntryPage>> {
    let request = params.into_request()?;
    let total = state.ledger.count(&request.filter).await?;
    let entries = state.ledger.find_many(&request).await?;
    Ok(Json(EntryPage {
        entries,
        total,
        offset: request.offset,
    }))
}

/// `GET /v1/entries/:id`
pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<AuditEntry>> {
    let id = EntryId::new(id);
    match state.ledger.find_by_id(&id).await? {
        Some(entry) => Ok(Json(entry)),
        None => Err(ServerError::NotFound(format!("entry {id}"))),
    }
}

/// `GET /v1/subjects/:patient_id/history`
pub async fn subject_history(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> ServerResult<Json<Vec<AuditEntry>>> {
    Ok(Json(state.ledger.export_subject_history(&patient_id).await?))
}

/// `GET /v1/stats`
pub async fn stats(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ServerResult<Json<AuditStats>> {
    Ok(Json(state.ledger.get_stats(params.range()?).await?))
}

/// `GET /v1/integrity`: the whole ledger when no bounds are given.
pub async fn integrity(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ServerResult<Json<IntegrityResponse>> {
    let cancel = state.shutdown.child_token();
    let report = if params.is_open() {
        state.ledger.verify_all(&cancel).await?
    } else {
        state.ledger.verify_integrity(params.range()?, &cancel).await?
    };
    Ok(Json(IntegrityResponse {
        valid: report.is_valid(),
        offending_entries: report.offending_entries(),
        report,
    }))
}

/// `GET /v1/emergency`
pub async fn emergency_records(
    State(state): State<AppState>,
    Query(params): Query<EmergencyParams>,
) -> ServerResult<Json<Vec<EmergencyRecord>>> {
    Ok(Json(state.ledger.emergency_records(params.limit).await?))
}

/// `GET /v1/health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.ledger.health())
}

/// `GET /v1/info`
pub async fn info_handler(State(state): State<AppState>) -> ServerResult<Json<serde_json::Value>> {
    let (primary, emergency) = state.ledger.store_names();
    let head = match state.ledger.head().await {
        Ok(head) => head,
        Err(LedgerError::Read(e)) if e.is_transient() => None,
        Err(e) => return Err(e.into()),
    };
    Ok(Json(json!({
        "name": "vigil-server",
        "version": env!("CARGO_PKG_VERSION"),
        "primary_store": primary,
        "emergency_channel": emergency,
        "head": head,
    })))
}
