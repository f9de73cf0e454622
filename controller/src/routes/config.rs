//! Model catalog endpoint.

use axum::Json;
use serde_json::Value;

use hadron::config::list_available_models;

pub async fn list_models() -> Json<Vec<Value>> {
    Json(list_available_models())
}
