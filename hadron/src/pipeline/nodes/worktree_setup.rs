//! Worktree setup node: clone repos bare and create per-CR worktrees.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::HadronError;
use crate::graph::Node;
use crate::state::{PipelineState, StageRecord, StateUpdate};

use super::NodeContext;

const STAGE: &str = "worktree_setup";
const TREE_DEPTH: usize = 3;

/// Instruction files read from the worktree for agent context, in priority
/// order.
const AGENT_INSTRUCTION_FILES: &[&str] = &["AGENTS.md", "CLAUDE.md"];

pub struct WorktreeSetupNode {
    ctx: Arc<NodeContext>,
}

impl WorktreeSetupNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<PipelineState> for WorktreeSetupNode {
    fn id(&self) -> &str {
        STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        let ctx = &self.ctx;
        ctx.stage_entered(STAGE).await?;

        let mut updated_repos = Vec::with_capacity(state.affected_repos.len());
        for repo in &state.affected_repos {
            let repo_name = if repo.repo_name.is_empty() {
                repo.repo_url
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or("")
                    .trim_end_matches(".git")
                    .to_string()
            } else {
                repo.repo_name.clone()
            };
            info!(repo = %repo_name, cr_id = %state.cr_id, "setting up worktree");

            ctx.worktrees.clone_bare(&repo.repo_url, &repo_name).await?;
            let worktree = ctx
                .worktrees
                .create_worktree(&repo_name, &state.cr_id, &repo.default_branch)
                .await?;

            let mut agents_md = String::new();
            for file in AGENT_INSTRUCTION_FILES {
                let path = worktree.join(file);
                if path.is_file() {
                    agents_md = tokio::fs::read_to_string(&path).await.unwrap_or_default();
                    break;
                }
            }

            let directory_tree = ctx.worktrees.directory_tree(&worktree, TREE_DEPTH);

            let mut updated = repo.clone();
            updated.repo_name = repo_name;
            updated.worktree_path = worktree.to_string_lossy().into_owned();
            updated.agents_md = agents_md;
            updated.directory_tree = directory_tree;
            updated_repos.push(updated);
        }

        let worktrees: Vec<&str> = updated_repos
            .iter()
            .map(|r| r.worktree_path.as_str())
            .collect();
        ctx.stage_completed(STAGE, json!({"worktrees": worktrees})).await?;

        Ok(StateUpdate {
            affected_repos: Some(updated_repos),
            current_stage: Some(STAGE.to_string()),
            stage_history: vec![StageRecord::completed(STAGE)],
            ..Default::default()
        })
    }
}
