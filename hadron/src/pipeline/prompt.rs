//! Prompt composer: assembles the layered prompt for each agent role.
//!
//! Layer 1: role system prompt (embedded templates)
//! Layer 2: repo context (AGENTS.md, language, test command, directory tree)
//! Layer 3: task payload (CR, specs, diff, from pipeline state)
//! Layer 4: loop feedback (verification feedback, review findings, operator
//!          interventions)

const MAX_STATIC_CONTEXT_CHARS: usize = 48_000;

fn role_template(role: &str) -> &'static str {
    match role {
        "intake_parser" => {
            "You are an intake analyst. Parse the change request into JSON with keys: title, \
             description, acceptance_criteria (array), affected_domains (array), priority \
             (low|medium|high|critical), constraints (array), risk_flags (array). Respond with \
             JSON only."
        }
        "spec_writer" => {
            "You are a behaviour spec writer. Translate the change request into Gherkin .feature \
             files and write them into the repository with the tools provided. Cover every \
             acceptance criterion."
        }
        "spec_verifier" => {
            "You are a behaviour spec verifier. Read the .feature files in the repository and \
             check them against the change request. Respond with JSON: {\"verified\": bool, \
             \"feedback\": string, \"missing_scenarios\": array, \"issues\": array}."
        }
        "test_writer" => {
            "You are a test-first developer. Write failing tests that pin down the requested \
             behaviour before any implementation exists. Do not implement the behaviour itself."
        }
        "code_writer" => {
            "You are an implementation developer. Make the failing tests pass with the smallest \
             change that honors the change request. Run the test command to check your work."
        }
        "security_reviewer" => {
            "You are a security reviewer. Examine the diff for vulnerabilities, secret leakage, \
             injection risks and supply-chain changes. Respond with JSON: {\"review_passed\": \
             bool, \"findings\": [{\"severity\": \"critical|major|minor|info\", \"category\": \
             string, \"file\": string, \"line\": number, \"message\": string}]}."
        }
        "quality_reviewer" => {
            "You are a code quality reviewer. Examine the diff for correctness, maintainability \
             and test coverage. Respond with JSON: {\"review_passed\": bool, \"findings\": \
             [{\"severity\": \"critical|major|minor|info\", \"category\": string, \"file\": \
             string, \"line\": number, \"message\": string}]}."
        }
        "spec_compliance_reviewer" => {
            "You are a spec compliance reviewer. Check that the diff satisfies every acceptance \
             criterion of the change request and nothing beyond it. Respond with JSON: \
             {\"review_passed\": bool, \"findings\": [{\"severity\": \
             \"critical|major|minor|info\", \"category\": string, \"file\": string, \"line\": \
             number, \"message\": string}]}."
        }
        "conflict_resolver" => {
            "You are a merge conflict resolver. The repository is mid-rebase. Rewrite each \
             conflicted file to integrate both sides, removing all conflict markers, then stop."
        }
        _ => "You are a software engineering agent. Complete the task precisely.",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated)", &text[..end])
}

/// Assembles system and user prompts from the four layers.
#[derive(Clone, Copy, Debug, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    /// Layers 1 + 2.
    pub fn compose_system_prompt(&self, role: &str, repo_context: &str) -> String {
        let mut parts = vec![role_template(role).to_string()];
        if !repo_context.is_empty() {
            parts.push(format!(
                "\n## Repository Context\n\n{}",
                truncate(repo_context, MAX_STATIC_CONTEXT_CHARS)
            ));
        }
        parts.join("\n")
    }

    /// Layers 3 + 4.
    pub fn compose_user_prompt(&self, task_payload: &str, feedback: &str) -> String {
        let mut parts = vec![task_payload.to_string()];
        if !feedback.is_empty() {
            parts.push(format!("\n## Previous Feedback\n\n{feedback}"));
        }
        parts.join("\n")
    }

    /// Layer 2 repo context string.
    pub fn build_repo_context(
        &self,
        agents_md: &str,
        directory_tree: &str,
        language: &str,
        test_command: &str,
    ) -> String {
        let mut parts = Vec::new();
        if !agents_md.is_empty() {
            parts.push(format!("### AGENTS.md\n\n{agents_md}"));
        }
        if !language.is_empty() {
            parts.push(format!("### Language: {language}"));
        }
        if !test_command.is_empty() {
            parts.push(format!("### Test command: `{test_command}`"));
        }
        if !directory_tree.is_empty() {
            parts.push(format!("### Directory Structure\n\n```\n{directory_tree}\n```"));
        }
        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_includes_repo_context() {
        let composer = PromptComposer::new();
        let context = composer.build_repo_context("follow the lint rules", "src/\n  lib.rs", "rust", "cargo test");
        let system = composer.compose_system_prompt("code_writer", &context);
        assert!(system.contains("implementation developer"));
        assert!(system.contains("Repository Context"));
        assert!(system.contains("cargo test"));
    }

    #[test]
    fn user_prompt_appends_feedback_only_when_present() {
        let composer = PromptComposer::new();
        assert!(!composer.compose_user_prompt("payload", "").contains("Previous Feedback"));
        let with = composer.compose_user_prompt("payload", "missing scenario X");
        assert!(with.contains("Previous Feedback"));
        assert!(with.contains("missing scenario X"));
    }

    #[test]
    fn oversized_context_is_truncated() {
        let composer = PromptComposer::new();
        let big = "x".repeat(MAX_STATIC_CONTEXT_CHARS + 10);
        let system = composer.compose_system_prompt("spec_writer", &big);
        assert!(system.contains("(truncated)"));
    }
}
