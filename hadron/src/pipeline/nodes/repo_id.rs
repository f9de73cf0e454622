//! Repo identification node. This design trusts the repos provided at
//! intake; discovering additional affected repos is deliberately out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::error;

use crate::error::HadronError;
use crate::graph::Node;
use crate::state::{PipelineState, StageRecord, StateUpdate};

use super::NodeContext;

const STAGE: &str = "repo_id";

pub struct RepoIdNode {
    ctx: Arc<NodeContext>,
}

impl RepoIdNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<PipelineState> for RepoIdNode {
    fn id(&self) -> &str {
        STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        self.ctx.stage_entered(STAGE).await?;

        if state.affected_repos.is_empty() {
            error!(cr_id = %state.cr_id, "no affected repos specified");
            return Err(HadronError::Execution(
                "No affected repositories specified".to_string(),
            ));
        }

        let names: Vec<&str> = state
            .affected_repos
            .iter()
            .map(|r| {
                if r.repo_name.is_empty() {
                    r.repo_url.as_str()
                } else {
                    r.repo_name.as_str()
                }
            })
            .collect();
        self.ctx
            .stage_completed(STAGE, json!({"repos": names}))
            .await?;

        Ok(StateUpdate {
            current_stage: Some(STAGE.to_string()),
            stage_history: vec![StageRecord::completed(STAGE)],
            ..Default::default()
        })
    }
}
