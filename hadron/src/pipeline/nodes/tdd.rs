//! TDD development node: test writer (red) then code writer (green) with a
//! bounded fix loop per repo.
//!
//! Work is committed and pushed after each repo regardless of pass/fail so
//! a paused or failed run still leaves an inspectable branch.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::agent::AgentBackend;
use crate::error::HadronError;
use crate::graph::Node;
use crate::pipeline::testing::run_test_command;
use crate::pipeline::PromptComposer;
use crate::state::{DevResult, PipelineState, StageRecord, StateUpdate};

use super::{
    base_task, cr_payload, emit_agent_completed, emit_agent_started, emit_cost_update,
    store_conversation, take_intervention, NodeContext,
};

use super::tail;

const STAGE: &str = "tdd";
const TEST_WRITER_STAGE: &str = "tdd:test_writer";
const CODE_WRITER_STAGE: &str = "tdd:code_writer";

pub struct TddNode {
    ctx: Arc<NodeContext>,
}

impl TddNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

/// Review findings formatted as loop feedback for a retry round.
fn review_feedback(state: &PipelineState, repo_name: &str) -> String {
    let Some(review) = state
        .review_results
        .iter()
        .find(|r| r.repo_name == repo_name && !r.findings.is_empty())
    else {
        return String::new();
    };
    let mut feedback = String::from("## Review Findings to Address\n\n");
    for finding in &review.findings {
        feedback.push_str(&format!(
            "- [{}] {} ({}:{})\n",
            finding.severity, finding.message, finding.file, finding.line
        ));
    }
    feedback
}

#[async_trait]
impl Node<PipelineState> for TddNode {
    fn id(&self) -> &str {
        STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        let ctx = &self.ctx;
        let max_iterations = state.config_snapshot.pipeline.max_tdd_iterations;
        let test_timeout = Duration::from_secs(state.config_snapshot.pipeline.test_timeout);
        ctx.stage_entered(STAGE).await?;

        let composer = PromptComposer::new();
        let cr_text = cr_payload(&state.structured_cr);
        let intervention = take_intervention(ctx, STAGE).await;
        let mut dev_results = Vec::new();
        let mut cost_usd = 0.0;
        let mut input_tokens = 0;
        let mut output_tokens = 0;

        for repo in &state.affected_repos {
            let worktree = Path::new(&repo.worktree_path);
            let repo_context = composer.build_repo_context(
                &repo.agents_md,
                &repo.directory_tree,
                &repo.language,
                &repo.test_command,
            );
            let mut feedback = review_feedback(&state, &repo.repo_name);
            if let Some(instructions) = &intervention {
                if !feedback.is_empty() {
                    feedback.push_str("\n\n");
                }
                feedback.push_str(&format!("## Operator Instructions\n\n{instructions}"));
            }

            // Red phase: failing tests first.
            ctx.stage_entered(TEST_WRITER_STAGE).await?;
            let test_task = base_task(
                ctx,
                TEST_WRITER_STAGE,
                "test_writer",
                &repo.repo_name,
                composer.compose_system_prompt("test_writer", &repo_context),
                composer.compose_user_prompt(&cr_text, &feedback),
            )
            .with_working_directory(worktree);
            emit_agent_started(
                ctx,
                TEST_WRITER_STAGE,
                "test_writer",
                &repo.repo_name,
                &test_task.model,
                &test_task.allowed_tools,
            )
            .await?;
            let test_result = ctx.agents.execute(test_task).await?;
            emit_cost_update(ctx, TEST_WRITER_STAGE, &test_result, state.cost_usd + cost_usd)
                .await?;
            cost_usd += test_result.cost_usd;
            input_tokens += test_result.input_tokens;
            output_tokens += test_result.output_tokens;
            let key =
                store_conversation(ctx, "test_writer", &repo.repo_name, &test_result.conversation)
                    .await;
            emit_agent_completed(
                ctx,
                TEST_WRITER_STAGE,
                "test_writer",
                &repo.repo_name,
                &test_result,
                &key,
                json!({}),
            )
            .await?;
            ctx.stage_completed(TEST_WRITER_STAGE, json!({})).await?;

            // Green phase: implement until tests pass or the budget runs out.
            ctx.stage_entered(CODE_WRITER_STAGE).await?;
            let mut tests_passing = false;
            let mut test_output = String::new();
            let mut iteration = 0;

            while iteration < max_iterations {
                emit_agent_started(
                    ctx,
                    CODE_WRITER_STAGE,
                    "code_writer",
                    &repo.repo_name,
                    &ctx.model,
                    &crate::tools::ALL_TOOLS
                        .iter()
                        .map(|s| s.to_string())
                        .collect::<Vec<_>>(),
                )
                .await?;

                let mut payload = cr_text.clone();
                if iteration > 0 && !test_output.is_empty() {
                    payload.push_str(&format!(
                        "\n\n## Test Failure Output (iteration {iteration})\n\n```\n{}\n```\n\n\
                         Fix the implementation to make the failing tests pass.",
                        tail(&test_output, 3_000)
                    ));
                }
                let code_task = base_task(
                    ctx,
                    CODE_WRITER_STAGE,
                    "code_writer",
                    &repo.repo_name,
                    composer.compose_system_prompt("code_writer", &repo_context),
                    composer.compose_user_prompt(&payload, &feedback),
                )
                .with_working_directory(worktree);
                let code_result = ctx.agents.execute(code_task).await?;
                emit_cost_update(ctx, CODE_WRITER_STAGE, &code_result, state.cost_usd + cost_usd)
                    .await?;
                cost_usd += code_result.cost_usd;
                input_tokens += code_result.input_tokens;
                output_tokens += code_result.output_tokens;
                let key = store_conversation(
                    ctx,
                    "code_writer",
                    &repo.repo_name,
                    &code_result.conversation,
                )
                .await;
                emit_agent_completed(
                    ctx,
                    CODE_WRITER_STAGE,
                    "code_writer",
                    &repo.repo_name,
                    &code_result,
                    &key,
                    json!({"iteration": iteration}),
                )
                .await?;

                let (passed, output) =
                    run_test_command(worktree, &repo.test_command, &state.cr_id, test_timeout)
                        .await;
                tests_passing = passed;
                test_output = output;

                ctx.emit(
                    crate::event::EventType::TestRun,
                    CODE_WRITER_STAGE,
                    json!({
                        "repo": repo.repo_name,
                        "passed": tests_passing,
                        "iteration": iteration,
                        "output_tail": tail(&test_output, 500),
                    }),
                )
                .await?;

                iteration += 1;
                if tests_passing {
                    info!(repo = %repo.repo_name, iteration, "tests passing");
                    break;
                }
                info!(repo = %repo.repo_name, iteration, "tests failing, retrying");
            }

            ctx.stage_completed(
                CODE_WRITER_STAGE,
                json!({"tests_passing": tests_passing, "iterations": iteration}),
            )
            .await?;

            ctx.worktrees
                .commit_and_push(
                    worktree,
                    &format!(
                        "feat: TDD implementation for {} ({})",
                        state.cr_id,
                        if tests_passing { "green" } else { "red" }
                    ),
                )
                .await?;

            dev_results.push(DevResult {
                repo_name: repo.repo_name.clone(),
                test_output: tail(&test_output, 2_000).to_string(),
                tests_passing,
                dev_iteration: iteration,
            });
        }

        let all_passing = dev_results.iter().all(|r| r.tests_passing);
        ctx.stage_completed(STAGE, json!({"all_passing": all_passing})).await?;

        Ok(StateUpdate {
            dev_results: Some(dev_results),
            dev_loop_count: Some(state.dev_loop_count + 1),
            current_stage: Some(STAGE.to_string()),
            cost_input_tokens: input_tokens,
            cost_output_tokens: output_tokens,
            cost_usd,
            stage_history: vec![StageRecord::completed(STAGE)],
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Finding, ReviewResult};

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 3), "llo");
        // Multi-byte: é is two bytes; a naive slice at len-1 would split it.
        let text = "aé";
        assert_eq!(tail(text, 1), "é");
    }

    #[test]
    fn review_feedback_formats_findings() {
        let mut state = PipelineState::new("CR-1", "api");
        state.review_results.push(ReviewResult {
            repo_name: "r".into(),
            findings: vec![Finding {
                severity: "major".into(),
                category: "quality".into(),
                file: "src/lib.rs".into(),
                line: 10,
                message: "missing error handling".into(),
            }],
            review_passed: false,
            review_iteration: 1,
        });
        let feedback = review_feedback(&state, "r");
        assert!(feedback.contains("[major] missing error handling (src/lib.rs:10)"));
        assert!(review_feedback(&state, "other").is_empty());
    }
}
