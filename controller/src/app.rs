//! Axum application state and router.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use hadron::events::{EventBus, InterventionManager};
use hadron::kvs::Kvs;
use hadron::store::CrRunStore;

use crate::routes;
use crate::spawner::JobSpawner;

/// Shared services behind every route handler.
pub struct AppState {
    pub run_store: Arc<dyn CrRunStore>,
    pub kvs: Arc<dyn Kvs>,
    pub bus: EventBus,
    pub interventions: InterventionManager,
    pub spawner: Arc<dyn JobSpawner>,
}

impl AppState {
    pub fn new(
        run_store: Arc<dyn CrRunStore>,
        kvs: Arc<dyn Kvs>,
        spawner: Arc<dyn JobSpawner>,
    ) -> Self {
        Self {
            run_store,
            bus: EventBus::new(kvs.clone()),
            interventions: InterventionManager::new(kvs.clone()),
            kvs,
            spawner,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/api/pipeline/trigger", post(routes::intake::trigger_pipeline))
        .route("/api/pipeline/list", get(routes::pipeline::list_pipelines))
        .route("/api/pipeline/:cr_id", get(routes::pipeline::get_pipeline))
        .route(
            "/api/pipeline/:cr_id/intervene",
            post(routes::pipeline::set_intervention),
        )
        .route(
            "/api/pipeline/:cr_id/resume",
            post(routes::pipeline::resume_pipeline),
        )
        .route("/api/pipeline/:cr_id/nudge", post(routes::pipeline::send_nudge))
        .route(
            "/api/pipeline/:cr_id/conversation",
            get(routes::pipeline::get_conversation),
        )
        .route("/api/pipeline/:cr_id/logs", get(routes::pipeline::get_worker_logs))
        .route("/api/events/stream", get(routes::events::event_stream))
        .route("/api/config/models", get(routes::config::list_models))
        .with_state(state)
}
