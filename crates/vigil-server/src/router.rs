use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

/// Build the axum router with all Vigil endpoints.
///
/// Entries are append-only: there are no update or delete routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route(
            "/v1/entries",
            get(handler::list_entries).post(handler::create_entry),
        )
        .route("/v1/entries/:id", get(handler::get_entry))
        .route("/v1/subjects/:patient_id/history", get(handler::subject_history))
        .route("/v1/stats", get(handler::stats))
        .route("/v1/integrity", get(handler::integrity))
        .route("/v1/emergency", get(handler::emergency_records))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
