//! Health and readiness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use hadron::kvs::Kvs as _;
use hadron::store::CrRunStore as _;

use crate::app::AppState;

pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Ready iff both backing stores answer a liveness probe.
pub async fn readyz(State(state): State<Arc<AppState>>) -> Json<Value> {
    let postgres = state.run_store.ping().await.is_ok();
    let redis = state.kvs.ping().await.is_ok();
    let ready = postgres && redis;
    Json(json!({
        "status": if ready { "ready" } else { "not_ready" },
        "checks": {"postgres": postgres, "redis": redis},
    }))
}
