//! Worker driver: executes the pipeline for a single CR.
//!
//! One worker per CR. The driver loads the run, assembles the initial
//! state (or the latest checkpoint plus any resume overrides), runs the
//! graph to a terminal, persists the outcome, and emits the matching
//! terminal event. `pipeline_completed` comes from the retrospective node;
//! the driver emits `pipeline_paused` and `pipeline_failed`.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use hadron::agent::AgentBackend;
use hadron::config::ConfigSnapshot;
use hadron::error::HadronError;
use hadron::event::{EventType, PipelineEvent};
use hadron::events::{keys, EventBus, InterventionManager};
use hadron::git::WorktreeManager;
use hadron::graph::{CompilationError, GraphRunConfig, ResumePoint};
use hadron::kvs::Kvs;
use hadron::memory::{CheckpointError, Checkpointer};
use hadron::pipeline::edges::resume_node_for_overrides;
use hadron::pipeline::{build_pipeline_graph, NodeContext};
use hadron::state::{PipelineState, RepoContext, RunStatus, StateUpdate};
use hadron::store::{CrRunStore, StoreError};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("CR not found: {0}")]
    MissingCr(String),
    #[error(transparent)]
    Execution(#[from] HadronError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("graph: {0}")]
    Graph(#[from] CompilationError),
}

/// Everything a worker needs, behind trait objects so tests can run the
/// whole pipeline against in-memory stores and a mock backend.
pub struct WorkerDeps {
    pub run_store: Arc<dyn CrRunStore>,
    pub kvs: Arc<dyn Kvs>,
    pub agents: Arc<dyn AgentBackend>,
    pub checkpointer: Arc<dyn Checkpointer<PipelineState>>,
    pub workspace_dir: PathBuf,
}

fn initial_state(cr_id: &str, source: &str, external_id: &str, raw: &Value, snapshot: ConfigSnapshot) -> PipelineState {
    let mut state = PipelineState::new(cr_id, source);
    state.external_id = external_id.to_string();
    state.raw_cr_title = raw
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    state.raw_cr_text = raw
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    state.external_url = raw
        .get("external_url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Single-repo intake: the submission names one target repository.
    if let Some(repo_url) = raw.get("repo_url").and_then(Value::as_str) {
        if !repo_url.is_empty() {
            let repo_name = repo_url
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or("")
                .trim_end_matches(".git")
                .to_string();
            state.affected_repos.push(RepoContext {
                repo_url: repo_url.to_string(),
                repo_name,
                default_branch: raw
                    .get("repo_default_branch")
                    .and_then(Value::as_str)
                    .unwrap_or(&snapshot.repo.default_branch)
                    .to_string(),
                test_command: raw
                    .get("test_command")
                    .and_then(Value::as_str)
                    .unwrap_or(&snapshot.repo.test_command)
                    .to_string(),
                language: raw
                    .get("language")
                    .and_then(Value::as_str)
                    .unwrap_or(&snapshot.repo.language)
                    .to_string(),
                ..Default::default()
            });
        }
    }
    state.config_snapshot = snapshot;
    state
}

/// Fetch-and-clear resume overrides stored by the resume endpoint.
async fn take_resume_overrides(
    kvs: &Arc<dyn Kvs>,
    cr_id: &str,
) -> Option<serde_json::Map<String, Value>> {
    let raw = kvs.get_del(&keys::resume_overrides(cr_id)).await.ok()??;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(map),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "resume overrides were not valid JSON, ignoring");
            None
        }
    }
}

/// Executes the pipeline for one CR to a terminal state.
pub async fn run_worker(cr_id: &str, deps: WorkerDeps) -> Result<(), WorkerError> {
    info!(cr_id, "worker starting");

    let run = deps
        .run_store
        .get(cr_id)
        .await?
        .ok_or_else(|| WorkerError::MissingCr(cr_id.to_string()))?;
    deps.run_store
        .set_status(cr_id, RunStatus::Running, None)
        .await?;

    let raw = run.raw_cr.unwrap_or_else(|| json!({}));
    let snapshot: ConfigSnapshot = run
        .config_snapshot
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();

    let bus = EventBus::new(deps.kvs.clone());
    let ctx = Arc::new(NodeContext {
        cr_id: cr_id.to_string(),
        bus: bus.clone(),
        kvs: deps.kvs.clone(),
        interventions: InterventionManager::new(deps.kvs.clone()),
        agents: deps.agents.clone(),
        worktrees: WorktreeManager::new(deps.workspace_dir.clone()),
        model: snapshot.pipeline.default_model.clone(),
        explore_model: snapshot.pipeline.explore_model.clone(),
        plan_model: snapshot.pipeline.plan_model.clone(),
    });
    let compiled = build_pipeline_graph(ctx, Some(deps.checkpointer.clone()))?;

    // Resume routing: overrides name the node they pretend to come from;
    // otherwise the latest checkpoint decides where to continue.
    let overrides = take_resume_overrides(&deps.kvs, cr_id).await;
    let checkpoint = deps.checkpointer.latest(cr_id).await?;

    let (mut state, resume, resumed) = match checkpoint {
        Some(checkpoint) => {
            let mut state = checkpoint.state;
            let resume_node = match &overrides {
                Some(map) => {
                    let update = StateUpdate::from_overrides(map);
                    let node = resume_node_for_overrides(map.keys().map(String::as_str))
                        .map(str::to_string)
                        .unwrap_or_else(|| checkpoint.node_id.clone());
                    hadron::graph::GraphState::apply(&mut state, update);
                    state.status = RunStatus::Running;
                    state.error = None;
                    node
                }
                None => checkpoint.node_id.clone(),
            };
            (state, Some(ResumePoint::AfterNode(resume_node)), true)
        }
        None => {
            let state = initial_state(cr_id, &run.source, run.external_id.as_deref().unwrap_or(""), &raw, snapshot);
            (state, None, false)
        }
    };
    if !resumed {
        state.status = RunStatus::Running;
    }

    bus.emit(
        &PipelineEvent::new(cr_id, EventType::PipelineStarted, "worker").with_data(json!({
            "resumed": resumed,
            "overrides": overrides.map(Value::Object).unwrap_or_else(|| json!({})),
        })),
    )
    .await
    .map_err(HadronError::from)?;

    let mut config = GraphRunConfig::for_thread(cr_id);
    if let Some(resume) = resume {
        config = config.resuming(resume);
    }

    match compiled.invoke(state, config).await {
        Ok(final_state) => {
            let final_status = match final_state.status {
                RunStatus::Running | RunStatus::Pending => RunStatus::Completed,
                status => status,
            };
            deps.run_store
                .finish(
                    cr_id,
                    final_status,
                    final_state.cost_usd,
                    final_state.error.as_deref(),
                )
                .await?;
            if final_status == RunStatus::Paused {
                bus.emit(
                    &PipelineEvent::new(cr_id, EventType::PipelinePaused, "worker").with_data(
                        json!({"error": final_state.error.clone().unwrap_or_default()}),
                    ),
                )
                .await
                .map_err(HadronError::from)?;
            }
            info!(
                cr_id,
                status = %final_status,
                cost_usd = final_state.cost_usd,
                "worker completed"
            );
            Ok(())
        }
        Err(e) => {
            error!(cr_id, error = %e, "worker failed");
            let message = e.to_string();
            if let Err(store_err) = deps
                .run_store
                .set_status(cr_id, RunStatus::Failed, Some(&message))
                .await
            {
                error!(cr_id, error = %store_err, "failed to persist failure status");
            }
            let _ = bus
                .emit(
                    &PipelineEvent::new(cr_id, EventType::PipelineFailed, "worker")
                        .with_data(json!({"error": message})),
                )
                .await;
            Err(WorkerError::Execution(e))
        }
    }
}
