//! Behaviour translation and verification nodes.
//!
//! Translation runs a spec_writer agent per repo that writes `.feature`
//! files into the worktree; verification runs a spec_verifier agent whose
//! JSON verdict gates the loop. The pair alternates within the
//! verification circuit breaker.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::agent::AgentBackend;
use crate::error::HadronError;
use crate::graph::Node;
use crate::pipeline::json_extract::extract_json;
use crate::pipeline::PromptComposer;
use crate::state::{BehaviourSpec, PipelineState, StageRecord, StateUpdate};

use super::{
    base_task, cr_payload, emit_agent_completed, emit_agent_started, emit_cost_update,
    store_conversation, take_intervention, NodeContext,
};

const TRANSLATION_STAGE: &str = "behaviour_translation";
const VERIFICATION_STAGE: &str = "behaviour_verification";

pub struct BehaviourTranslationNode {
    ctx: Arc<NodeContext>,
}

impl BehaviourTranslationNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<PipelineState> for BehaviourTranslationNode {
    fn id(&self) -> &str {
        "translation"
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        let ctx = &self.ctx;
        ctx.stage_entered(TRANSLATION_STAGE).await?;

        let composer = PromptComposer::new();
        let payload = cr_payload(&state.structured_cr);
        let intervention = take_intervention(ctx, TRANSLATION_STAGE).await;
        let mut specs = Vec::new();
        let mut cost_usd = 0.0;
        let mut input_tokens = 0;
        let mut output_tokens = 0;

        for repo in &state.affected_repos {
            let repo_context = composer.build_repo_context(
                &repo.agents_md,
                &repo.directory_tree,
                &repo.language,
                &repo.test_command,
            );
            let system_prompt = composer.compose_system_prompt("spec_writer", &repo_context);

            // On a verification retry, carry the verifier's feedback forward.
            let mut feedback = state
                .behaviour_specs
                .iter()
                .find(|s| s.repo_name == repo.repo_name && !s.verification_feedback.is_empty())
                .map(|s| s.verification_feedback.clone())
                .unwrap_or_default();
            if let Some(instructions) = &intervention {
                if !feedback.is_empty() {
                    feedback.push_str("\n\n");
                }
                feedback.push_str(&format!("## Operator Instructions\n\n{instructions}"));
            }
            let user_prompt = composer.compose_user_prompt(&payload, &feedback);

            let task = base_task(
                ctx,
                TRANSLATION_STAGE,
                "spec_writer",
                &repo.repo_name,
                system_prompt,
                user_prompt,
            )
            .with_working_directory(&repo.worktree_path);

            emit_agent_started(
                ctx,
                TRANSLATION_STAGE,
                "spec_writer",
                &repo.repo_name,
                &task.model,
                &task.allowed_tools,
            )
            .await?;
            let result = ctx.agents.execute(task).await?;
            emit_cost_update(ctx, TRANSLATION_STAGE, &result, state.cost_usd + cost_usd).await?;
            cost_usd += result.cost_usd;
            input_tokens += result.input_tokens;
            output_tokens += result.output_tokens;

            let conversation_key =
                store_conversation(ctx, "spec_writer", &repo.repo_name, &result.conversation).await;
            emit_agent_completed(
                ctx,
                TRANSLATION_STAGE,
                "spec_writer",
                &repo.repo_name,
                &result,
                &conversation_key,
                json!({}),
            )
            .await?;

            // Feature files live on disk in the worktree; the state records
            // only the verification lifecycle.
            specs.push(BehaviourSpec {
                repo_name: repo.repo_name.clone(),
                verified: false,
                verification_feedback: String::new(),
                verification_iteration: state.verification_loop_count,
            });
        }

        ctx.stage_completed(TRANSLATION_STAGE, json!({})).await?;

        Ok(StateUpdate {
            behaviour_specs: Some(specs),
            current_stage: Some(TRANSLATION_STAGE.to_string()),
            cost_input_tokens: input_tokens,
            cost_output_tokens: output_tokens,
            cost_usd,
            stage_history: vec![StageRecord::completed(TRANSLATION_STAGE)],
            ..Default::default()
        })
    }
}

/// Verifier verdict, parsed from agent JSON.
#[derive(Debug, Deserialize)]
struct Verification {
    #[serde(default = "default_verified")]
    verified: bool,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    missing_scenarios: Vec<String>,
    #[serde(default)]
    issues: Vec<String>,
}

fn default_verified() -> bool {
    true
}

pub struct BehaviourVerificationNode {
    ctx: Arc<NodeContext>,
}

impl BehaviourVerificationNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<PipelineState> for BehaviourVerificationNode {
    fn id(&self) -> &str {
        "verification"
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        let ctx = &self.ctx;
        ctx.stage_entered(VERIFICATION_STAGE).await?;

        let composer = PromptComposer::new();
        let iteration = state.verification_loop_count + 1;
        let mut all_verified = true;
        let mut specs = Vec::new();
        let mut cost_usd = 0.0;
        let mut input_tokens = 0;
        let mut output_tokens = 0;

        for repo in &state.affected_repos {
            let system_prompt = composer.compose_system_prompt("spec_verifier", "");
            let payload = format!(
                "{}\nPlease read the .feature files in the repository and verify them against \
                 this CR.",
                cr_payload(&state.structured_cr)
            );
            let user_prompt = composer.compose_user_prompt(&payload, "");

            let task = base_task(
                ctx,
                VERIFICATION_STAGE,
                "spec_verifier",
                &repo.repo_name,
                system_prompt,
                user_prompt,
            )
            .with_working_directory(&repo.worktree_path);

            emit_agent_started(
                ctx,
                VERIFICATION_STAGE,
                "spec_verifier",
                &repo.repo_name,
                &task.model,
                &task.allowed_tools,
            )
            .await?;
            let result = ctx.agents.execute(task).await?;
            emit_cost_update(ctx, VERIFICATION_STAGE, &result, state.cost_usd + cost_usd).await?;
            cost_usd += result.cost_usd;
            input_tokens += result.input_tokens;
            output_tokens += result.output_tokens;

            let verification = match extract_json(&result.output)
                .and_then(|value| serde_json::from_value::<Verification>(value).ok())
            {
                Some(v) => v,
                None => {
                    error!(
                        repo = %repo.repo_name,
                        output = super::excerpt(&result.output, 500),
                        "could not parse verifier output"
                    );
                    Verification {
                        verified: false,
                        feedback: format!(
                            "Verifier output was not valid JSON: {}",
                            super::excerpt(&result.output, 200)
                        ),
                        missing_scenarios: Vec::new(),
                        issues: vec!["Output parsing failed".to_string()],
                    }
                }
            };

            let conversation_key =
                store_conversation(ctx, "spec_verifier", &repo.repo_name, &result.conversation)
                    .await;
            emit_agent_completed(
                ctx,
                VERIFICATION_STAGE,
                "spec_verifier",
                &repo.repo_name,
                &result,
                &conversation_key,
                json!({}),
            )
            .await?;

            if verification.verified {
                info!(repo = %repo.repo_name, "verification passed");
            } else {
                all_verified = false;
                warn!(
                    repo = %repo.repo_name,
                    iteration,
                    feedback = %verification.feedback,
                    missing = ?verification.missing_scenarios,
                    issues = ?verification.issues,
                    "verification failed"
                );
            }

            ctx.stage_completed(
                &format!("{VERIFICATION_STAGE}:{}", repo.repo_name),
                json!({
                    "repo": repo.repo_name,
                    "verified": verification.verified,
                    "feedback": verification.feedback,
                    "missing_scenarios": verification.missing_scenarios,
                    "issues": verification.issues,
                    "iteration": iteration,
                }),
            )
            .await?;

            specs.push(BehaviourSpec {
                repo_name: repo.repo_name.clone(),
                verified: verification.verified,
                verification_feedback: verification.feedback,
                verification_iteration: iteration,
            });
        }

        ctx.stage_completed(
            VERIFICATION_STAGE,
            json!({"all_verified": all_verified, "iteration": iteration}),
        )
        .await?;

        Ok(StateUpdate {
            behaviour_specs: Some(specs),
            behaviour_verified: Some(all_verified),
            verification_loop_count: Some(iteration),
            current_stage: Some(VERIFICATION_STAGE.to_string()),
            cost_input_tokens: input_tokens,
            cost_output_tokens: output_tokens,
            cost_usd,
            stage_history: vec![StageRecord::completed(VERIFICATION_STAGE)],
            ..Default::default()
        })
    }
}
