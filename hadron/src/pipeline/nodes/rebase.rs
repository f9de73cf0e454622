//! Rebase node: rebase each feature branch onto the latest base, driving a
//! conflict_resolver agent through any conflicts.
//!
//! On conflict the worktree stays mid-rebase: the resolver rewrites the
//! conflicted files, the rebase continues, and later commits may conflict
//! again, up to a bounded number of continuation attempts. Exhausting them
//! aborts the rebase and pauses the run. A failed base fetch also pauses
//! with an explicit error rather than pretending the branch is current.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::agent::AgentBackend;
use crate::error::HadronError;
use crate::event::EventType;
use crate::git::RebaseOutcome;
use crate::graph::Node;
use crate::pipeline::testing::run_test_command;
use crate::pipeline::PromptComposer;
use crate::state::{PipelineState, RunStatus, StageRecord, StateUpdate};

use super::{
    base_task, cr_payload, emit_agent_completed, emit_agent_started, emit_cost_update,
    store_conversation, NodeContext,
};

const STAGE: &str = "rebase";
const ROLE: &str = "conflict_resolver";

/// Continuation attempts after the first conflict resolution.
const MAX_CONTINUE_ATTEMPTS: u32 = 3;

pub struct RebaseNode {
    ctx: Arc<NodeContext>,
}

impl RebaseNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Runs the conflict_resolver agent over the current conflicted files.
    async fn resolve_conflicts(
        &self,
        state: &PipelineState,
        repo_name: &str,
        worktree: &str,
        conflicts: &[String],
        prior_cost: f64,
    ) -> Result<(u64, u64, f64), HadronError> {
        let ctx = &self.ctx;
        let composer = PromptComposer::new();
        let file_list = conflicts
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n");
        let payload = format!(
            "{}\nThe rebase stopped on conflicts. Conflicted files:\n\n{file_list}\n\n\
             Rewrite each conflicted file to integrate both sides and remove every conflict \
             marker.",
            cr_payload(&state.structured_cr)
        );
        let task = base_task(
            ctx,
            STAGE,
            ROLE,
            repo_name,
            composer.compose_system_prompt(ROLE, ""),
            composer.compose_user_prompt(&payload, ""),
        )
        .with_working_directory(worktree);

        emit_agent_started(ctx, STAGE, ROLE, repo_name, &task.model, &task.allowed_tools).await?;
        let result = ctx.agents.execute(task).await?;
        emit_cost_update(ctx, STAGE, &result, prior_cost).await?;
        let key = store_conversation(ctx, ROLE, repo_name, &result.conversation).await;
        emit_agent_completed(ctx, STAGE, ROLE, repo_name, &result, &key, json!({})).await?;
        Ok((result.input_tokens, result.output_tokens, result.cost_usd))
    }
}

#[async_trait]
impl Node<PipelineState> for RebaseNode {
    fn id(&self) -> &str {
        STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        let ctx = &self.ctx;
        let test_timeout = Duration::from_secs(state.config_snapshot.pipeline.test_timeout);
        ctx.stage_entered(STAGE).await?;

        let mut all_clean = true;
        let mut unresolved = Vec::new();
        let mut fetch_error: Option<String> = None;
        let mut cost_usd = 0.0;
        let mut input_tokens = 0;
        let mut output_tokens = 0;

        for repo in &state.affected_repos {
            let worktree = Path::new(&repo.worktree_path);
            let mut outcome = match ctx.worktrees.rebase(worktree, &repo.default_branch).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(repo = %repo.repo_name, error = %e, "base fetch/rebase failed");
                    all_clean = false;
                    fetch_error = Some(format!(
                        "Rebase of {} onto {} failed: {e}",
                        repo.repo_name, repo.default_branch
                    ));
                    continue;
                }
            };

            let mut attempts = 0;
            loop {
                let conflicts = match &outcome {
                    RebaseOutcome::Conflicts(files)
                        if !files.is_empty() && attempts <= MAX_CONTINUE_ATTEMPTS =>
                    {
                        files.clone()
                    }
                    _ => break,
                };
                info!(
                    repo = %repo.repo_name,
                    attempt = attempts,
                    files = ?conflicts,
                    "resolving rebase conflicts"
                );
                let (tokens_in, tokens_out, cost) = self
                    .resolve_conflicts(
                        &state,
                        &repo.repo_name,
                        &repo.worktree_path,
                        &conflicts,
                        state.cost_usd + cost_usd,
                    )
                    .await?;
                input_tokens += tokens_in;
                output_tokens += tokens_out;
                cost_usd += cost;

                outcome = ctx.worktrees.continue_rebase(worktree).await?;
                attempts += 1;
            }

            match outcome {
                RebaseOutcome::Clean => {}
                RebaseOutcome::Conflicts(_) => {
                    warn!(repo = %repo.repo_name, "rebase conflicts unresolved, aborting");
                    ctx.worktrees.abort_rebase(worktree).await?;
                    all_clean = false;
                    unresolved.push(repo.repo_name.clone());
                    continue;
                }
            }

            // Rebasing may have pulled in commits that break the suite.
            let (passed, output) =
                run_test_command(worktree, &repo.test_command, &state.cr_id, test_timeout).await;
            ctx.emit(
                EventType::TestRun,
                STAGE,
                json!({
                    "repo": repo.repo_name,
                    "passed": passed,
                    "output_tail": super::tail(&output, 500),
                }),
            )
            .await?;
            if !passed {
                warn!(repo = %repo.repo_name, "post-rebase tests failed");
            }
        }

        ctx.stage_completed(
            STAGE,
            json!({"clean": all_clean, "conflicts": unresolved}),
        )
        .await?;

        let mut update = StateUpdate {
            rebase_clean: Some(all_clean),
            rebase_conflicts: Some(unresolved.clone()),
            current_stage: Some(STAGE.to_string()),
            cost_input_tokens: input_tokens,
            cost_output_tokens: output_tokens,
            cost_usd,
            stage_history: vec![StageRecord::completed(STAGE)],
            ..Default::default()
        };
        if !all_clean {
            update.status = Some(RunStatus::Paused);
            update.error = Some(match fetch_error {
                Some(error) => error,
                None => format!("Rebase conflicts in: {}", unresolved.join(", ")),
            });
        }
        Ok(update)
    }
}
