// Local crates
use crate::adapter::adapter::decode_record;
use crate::store::store::RecordStore;

// External crates
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use sortie_records::{CodecRegistry, RecordStatus, SyncRequest, SyncResponse};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared service state: the codec registry for decoding and the store for
/// accepted records.
pub struct AppState {
    pub codecs: CodecRegistry,
    pub store: Arc<dyn RecordStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("codecs", &self.codecs)
            .finish()
    }
}

/// Build the service router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/sync", post(sync_records))
        .with_state(state)
}

/// `POST /v1/sync`: decode, validate and store each record independently.
///
/// The response carries one status per request record, in request order. A
/// record that fails to decode, validate or store is rejected alone; the
/// rest of the batch is unaffected.
async fn sync_records(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SyncRequest>,
) -> Json<SyncResponse> {
    info!(
        client_version = %request.client_version,
        records = request.records.len(),
        "Sync batch received"
    );

    let statuses = request
        .records
        .iter()
        .map(|envelope| match decode_record(&state.codecs, envelope) {
            Ok(record) => match state.store.insert_player_data(&record) {
                Ok(()) => RecordStatus::accepted(),
                Err(e) => {
                    error!(
                        error = %e,
                        mission = %record.mission,
                        "Failed to store an accepted record"
                    );
                    RecordStatus::rejected(format!("storage failure: {e}"))
                }
            },
            Err(e) => {
                warn!(
                    record_type = %envelope.record_type,
                    reason = %e,
                    "Rejecting record"
                );
                RecordStatus::rejected(e.to_string())
            }
        })
        .collect();

    Json(SyncResponse { statuses })
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stored = state.store.player_data_count().unwrap_or(-1);
    Json(serde_json::json!({ "status": "ok", "player_records": stored }))
}
