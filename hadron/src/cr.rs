//! Change Request models: raw API input (with validation) and the
//! structured record produced by the intake agent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shell metacharacters that must never appear in test commands.
static SHELL_METACHAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;|`\n<]|\$\(|&&|\|\||>>?").expect("valid regex"));

/// Allowed base commands (before any flags/args).
pub const ALLOWED_TEST_COMMANDS: &[&str] = &[
    "pytest",
    "python -m pytest",
    "npm test",
    "npm run test",
    "npx jest",
    "yarn test",
    "pnpm test",
    "go test",
    "cargo test",
    "mvn test",
    "mvn verify",
    "gradle test",
    "gradlew test",
    "./gradlew test",
    "make test",
    "make check",
    "bundle exec rspec",
    "phpunit",
    "dotnet test",
];

pub const CR_SOURCES: &[&str] = &["api", "jira", "github", "ado", "slack"];

/// Validation failure for an incoming change request. Maps to HTTP 422.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrValidationError {
    #[error("title must be 1..500 characters")]
    Title,
    #[error("description must not be empty")]
    Description,
    #[error("source must be one of: api, jira, github, ado, slack")]
    Source,
    #[error("test_command contains disallowed shell metacharacters")]
    ShellMetacharacters,
    #[error("test_command must start with an allowed base command")]
    TestCommandNotAllowed,
}

/// Incoming change request as received from any source connector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawChangeRequest {
    pub title: String,
    pub description: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    /// Target repository URL. Required for single-repo operation.
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default = "default_branch")]
    pub repo_default_branch: String,
    /// Command to run the repo's test suite.
    #[serde(default = "default_test_command")]
    pub test_command: String,
    /// Primary language of the target repo.
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_source() -> String {
    "api".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_test_command() -> String {
    "pytest".to_string()
}

fn default_language() -> String {
    "python".to_string()
}

/// Validates a test command against the metacharacter deny-list and the
/// base-command allow-list. Empty or whitespace coerces to `pytest`.
pub fn validate_test_command(command: &str) -> Result<String, CrValidationError> {
    let command = command.trim();
    if command.is_empty() {
        return Ok("pytest".to_string());
    }
    if SHELL_METACHAR_RE.is_match(command) {
        return Err(CrValidationError::ShellMetacharacters);
    }
    // Longest allowed prefix first so "python -m pytest" wins over "pytest".
    let mut allowed: Vec<&str> = ALLOWED_TEST_COMMANDS.to_vec();
    allowed.sort_by_key(|c| std::cmp::Reverse(c.len()));
    for base in allowed {
        if command == base || command.starts_with(&format!("{base} ")) {
            return Ok(command.to_string());
        }
    }
    Err(CrValidationError::TestCommandNotAllowed)
}

impl RawChangeRequest {
    /// Validates field bounds and normalizes the test command in place.
    pub fn validate(&mut self) -> Result<(), CrValidationError> {
        if self.title.is_empty() || self.title.chars().count() > 500 {
            return Err(CrValidationError::Title);
        }
        if self.description.is_empty() {
            return Err(CrValidationError::Description);
        }
        if !CR_SOURCES.contains(&self.source.as_str()) {
            return Err(CrValidationError::Source);
        }
        self.test_command = validate_test_command(&self.test_command)?;
        Ok(())
    }

    /// Repository name derived from the URL's last path segment.
    pub fn repo_name(&self) -> String {
        self.repo_url
            .as_deref()
            .map(|url| {
                url.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or("")
                    .trim_end_matches(".git")
                    .to_string()
            })
            .unwrap_or_default()
    }
}

/// Parsed and normalised change request, the output of the intake agent.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredChangeRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub affected_domains: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub risk_flags: Vec<String>,
}

fn default_priority() -> String {
    "medium".to_string()
}

impl StructuredChangeRequest {
    /// Fallback record synthesized when the intake output cannot be parsed.
    pub fn parse_failed(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            priority: "medium".to_string(),
            risk_flags: vec!["intake_parse_failed".to_string()],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(test_command: &str) -> RawChangeRequest {
        RawChangeRequest {
            title: "Add /status endpoint".into(),
            description: "Expose a status endpoint".into(),
            source: "api".into(),
            external_id: None,
            external_url: None,
            repo_url: Some("file:///tmp/r.git".into()),
            repo_default_branch: "main".into(),
            test_command: test_command.into(),
            language: "python".into(),
        }
    }

    /// **Scenario**: shell metacharacters in a test command are rejected.
    #[test]
    fn test_command_rejects_metacharacters() {
        for cmd in [
            "pytest; rm -rf /",
            "pytest | cat",
            "pytest && true",
            "pytest > out",
            "pytest $(id)",
            "pytest `id`",
            "pytest < in",
        ] {
            assert_eq!(
                validate_test_command(cmd),
                Err(CrValidationError::ShellMetacharacters),
                "{cmd} should be rejected"
            );
        }
    }

    /// **Scenario**: commands outside the allow-list are rejected even without metacharacters.
    #[test]
    fn test_command_requires_allowed_base() {
        assert_eq!(
            validate_test_command("rm -rf /"),
            Err(CrValidationError::TestCommandNotAllowed)
        );
        assert_eq!(
            validate_test_command("pytests --all"),
            Err(CrValidationError::TestCommandNotAllowed)
        );
    }

    /// **Scenario**: allowed base commands pass, with or without arguments.
    #[test]
    fn test_command_accepts_allowed_bases() {
        assert!(validate_test_command("pytest").is_ok());
        assert!(validate_test_command("pytest -x tests/").is_ok());
        assert!(validate_test_command("python -m pytest tests").is_ok());
        assert!(validate_test_command("cargo test").is_ok());
        assert!(validate_test_command("./gradlew test").is_ok());
    }

    /// **Scenario**: empty or whitespace test command coerces to pytest.
    #[test]
    fn empty_test_command_defaults_to_pytest() {
        assert_eq!(validate_test_command("").unwrap(), "pytest");
        assert_eq!(validate_test_command("   ").unwrap(), "pytest");
    }

    #[test]
    fn validate_checks_title_and_source() {
        let mut cr = raw("pytest");
        cr.title = "x".repeat(501);
        assert_eq!(cr.validate(), Err(CrValidationError::Title));

        let mut cr = raw("pytest");
        cr.source = "carrier-pigeon".into();
        assert_eq!(cr.validate(), Err(CrValidationError::Source));
    }

    #[test]
    fn repo_name_from_url() {
        let cr = raw("pytest");
        assert_eq!(cr.repo_name(), "r");
        let mut cr2 = raw("pytest");
        cr2.repo_url = Some("https://example.com/org/widget.git".into());
        assert_eq!(cr2.repo_name(), "widget");
    }
}
