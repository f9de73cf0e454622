//! Intake route: accepts CRs and spawns workers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

use hadron::config::ConfigSnapshot;
use hadron::cr::RawChangeRequest;
use hadron::store::{CrRunRecord, CrRunStore as _};

use crate::app::AppState;
use crate::spawner::JobSpawner as _;

fn new_cr_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("CR-{}", &id[..8])
}

/// Accepts a change request, persists a pending run, and spawns a worker.
/// Validation failures are 422; duplicate external ids are 409.
pub async fn trigger_pipeline(
    State(state): State<Arc<AppState>>,
    Json(mut cr): Json<RawChangeRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Err(e) = cr.validate() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": e.to_string()})),
        ));
    }

    if let Some(external_id) = cr.external_id.as_deref() {
        let existing = state
            .run_store
            .get_by_external_id(external_id)
            .await
            .map_err(internal)?;
        if existing.is_some() {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({
                    "detail": format!("CR with external_id '{external_id}' already exists")
                })),
            ));
        }
    }

    let cr_id = new_cr_id();
    let snapshot = ConfigSnapshot::default();
    let record = CrRunRecord::pending(
        &cr_id,
        &cr.source,
        cr.external_id.clone(),
        serde_json::to_value(&cr).map_err(|e| internal(e.to_string()))?,
        serde_json::to_value(&snapshot).map_err(|e| internal(e.to_string()))?,
    );
    state.run_store.insert(&record).await.map_err(internal)?;

    if let Err(e) = state.spawner.spawn(&cr_id).await {
        warn!(cr_id = %cr_id, error = %e, "failed to spawn worker");
    }

    Ok(Json(json!({"cr_id": cr_id, "status": "pending"})))
}

fn internal(e: impl ToString) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"detail": e.to_string()})),
    )
}
