//! Pipeline status, intervention, resume, nudge, conversation and log
//! routes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use hadron::event::{EventType, PipelineEvent};
use hadron::events::keys;
use hadron::kvs::Kvs as _;
use hadron::state::RunStatus;
use hadron::store::{CrRunRecord, CrRunStore as _};

use crate::app::AppState;
use crate::spawner::JobSpawner as _;

const RESUME_OVERRIDE_TTL: Duration = Duration::from_secs(3_600);

type ApiError = (StatusCode, Json<Value>);

fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({"detail": "CR not found"})))
}

fn internal(e: impl ToString) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"detail": e.to_string()})),
    )
}

fn run_summary(record: &CrRunRecord) -> Value {
    json!({
        "cr_id": record.cr_id,
        "title": record.title(),
        "status": record.status.as_str(),
        "source": record.source,
        "external_id": record.external_id,
        "cost_usd": record.cost_usd,
        "error": record.error,
        "created_at": record.created_at.to_rfc3339(),
        "updated_at": record.updated_at.to_rfc3339(),
    })
}

/// Newest-first run summaries, capped at 100.
pub async fn list_pipelines(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let runs = state.run_store.list(100).await.map_err(internal)?;
    Ok(Json(runs.iter().map(run_summary).collect()))
}

pub async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    Path(cr_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run = state
        .run_store
        .get(&cr_id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;
    Ok(Json(run_summary(&run)))
}

#[derive(Debug, Deserialize)]
pub struct InterventionRequest {
    pub instructions: String,
}

pub async fn set_intervention(
    State(state): State<Arc<AppState>>,
    Path(cr_id): Path<String>,
    Json(body): Json<InterventionRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .run_store
        .get(&cr_id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;

    state
        .interventions
        .set_intervention(&cr_id, &body.instructions)
        .await
        .map_err(internal)?;
    let event = PipelineEvent::new(&cr_id, EventType::InterventionSet, "controller")
        .with_data(json!({"instructions": body.instructions}));
    state.bus.emit(&event).await.map_err(internal)?;
    Ok(Json(json!({"status": "intervention_set", "cr_id": cr_id})))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResumeRequest {
    #[serde(default)]
    pub state_overrides: Map<String, Value>,
}

/// Resume a paused or failed run: store overrides (1 h TTL), flip the row
/// to running, spawn a fresh worker, emit pipeline_started.
pub async fn resume_pipeline(
    State(state): State<Arc<AppState>>,
    Path(cr_id): Path<String>,
    Json(body): Json<ResumeRequest>,
) -> Result<Json<Value>, ApiError> {
    let run = state
        .run_store
        .get(&cr_id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;
    if !matches!(run.status, RunStatus::Paused | RunStatus::Failed) {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({
                "detail": format!(
                    "CR is '{}', can only resume paused or failed runs",
                    run.status
                )
            })),
        ));
    }

    if !body.state_overrides.is_empty() {
        let payload =
            serde_json::to_string(&body.state_overrides).map_err(|e| internal(e.to_string()))?;
        state
            .kvs
            .set_ex(&keys::resume_overrides(&cr_id), &payload, RESUME_OVERRIDE_TTL)
            .await
            .map_err(internal)?;
    }

    state
        .run_store
        .set_status(&cr_id, RunStatus::Running, None)
        .await
        .map_err(internal)?;

    if let Err(e) = state.spawner.spawn(&cr_id).await {
        return Err(internal(format!("failed to spawn worker: {e}")));
    }

    let event = PipelineEvent::new(&cr_id, EventType::PipelineStarted, "controller")
        .with_data(json!({"resumed": true, "overrides": body.state_overrides}));
    state.bus.emit(&event).await.map_err(internal)?;

    Ok(Json(json!({
        "status": "resumed",
        "cr_id": cr_id,
        "overrides": body.state_overrides,
    })))
}

#[derive(Debug, Deserialize)]
pub struct NudgeRequest {
    pub role: String,
    pub message: String,
}

pub async fn send_nudge(
    State(state): State<Arc<AppState>>,
    Path(cr_id): Path<String>,
    Json(body): Json<NudgeRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .run_store
        .get(&cr_id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;

    state
        .interventions
        .set_nudge(&cr_id, &body.role, &body.message)
        .await
        .map_err(internal)?;
    Ok(Json(json!({"status": "nudge_set", "cr_id": cr_id, "role": body.role})))
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub key: String,
}

/// Serves a stored conversation. The key must belong to this CR's
/// conversation namespace.
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(cr_id): Path<String>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Value>, ApiError> {
    if !query.key.starts_with(&keys::conversation_prefix(&cr_id)) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Invalid conversation key"})),
        ));
    }
    let data = state
        .kvs
        .get(&query.key)
        .await
        .map_err(internal)?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Conversation not found or expired"})),
        ))?;
    let value: Value = serde_json::from_str(&data)
        .map_err(|_| internal("Failed to parse conversation data"))?;
    Ok(Json(value))
}

/// Worker log text, plain. Missing logs are a friendly 200.
pub async fn get_worker_logs(
    State(state): State<Arc<AppState>>,
    Path(cr_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let text = state
        .kvs
        .get(&keys::worker_log(&cr_id))
        .await
        .map_err(internal)?
        .unwrap_or_else(|| "No logs available for this CR.".to_string());
    Ok(text)
}
