//! Deterministic diff scope analyser.
//!
//! Parses unified diffs to detect changes to configuration/infrastructure
//! files and dependency manifests. The resulting flags are injected into
//! the security reviewer's payload; they inform the review rather than
//! block it. No LLM involved.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static CONFIG_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(^|/)Dockerfile",
        r"(^|/)docker-compose",
        r"(^|/)\.github/",
        r"(^|/)\.gitlab-ci",
        r"(^|/)Makefile$",
        r"\.tf$",
        r"(^|/)\.env",
        r"(^|/)k8s/",
        r"(^|/)deploy/",
        r"(^|/)Jenkinsfile",
        r"(^|/)Procfile$",
        r"(^|/)nginx\.conf",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid pattern"))
    .collect()
});

static DEPENDENCY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(^|/)package\.json$",
        r"(^|/)package-lock\.json$",
        r"(^|/)requirements.*\.txt$",
        r"(^|/)pyproject\.toml$",
        r"(^|/)Cargo\.toml$",
        r"(^|/)go\.mod$",
        r"(^|/)go\.sum$",
        r"(^|/)Gemfile",
        r"(^|/)pom\.xml$",
        r"(^|/)build\.gradle",
        r"(^|/)yarn\.lock$",
        r"(^|/)pnpm-lock\.yaml$",
        r"(^|/)composer\.json$",
        r"(^|/)Pipfile",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid pattern"))
    .collect()
});

/// Matches `diff --git a/path b/path`; the b/ side is extracted.
static DIFF_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^diff --git a/.+ b/(.+)$").expect("valid pattern"));

/// A warning produced by the diff scope analyser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScopeFlag {
    /// `config_scope` or `dependency_scope`.
    pub check: String,
    /// Path that triggered the flag.
    pub file: String,
    pub message: String,
}

fn modified_files(diff: &str) -> Vec<String> {
    DIFF_HEADER_RE
        .captures_iter(diff)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Analyses a unified diff for sensitive file modifications. One flag per
/// matching rule set per file.
pub fn analyse_diff_scope(diff: &str) -> Vec<ScopeFlag> {
    let mut flags = Vec::new();
    for path in modified_files(diff) {
        if CONFIG_PATTERNS.iter().any(|p| p.is_match(&path)) {
            flags.push(ScopeFlag {
                check: "config_scope".to_string(),
                file: path.clone(),
                message: format!("Configuration/infrastructure file modified: {path}"),
            });
        }
        if DEPENDENCY_PATTERNS.iter().any(|p| p.is_match(&path)) {
            flags.push(ScopeFlag {
                check: "dependency_scope".to_string(),
                file: path.clone(),
                message: format!("Dependency manifest modified: {path}"),
            });
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_for(paths: &[&str]) -> String {
        paths
            .iter()
            .map(|p| format!("diff --git a/{p} b/{p}\nindex 111..222 100644\n--- a/{p}\n+++ b/{p}\n"))
            .collect()
    }

    /// **Scenario**: infra files trigger config_scope flags.
    #[test]
    fn flags_config_files() {
        let flags = analyse_diff_scope(&diff_for(&["Dockerfile", ".github/workflows/ci.yml", "src/main.py"]));
        let config: Vec<_> = flags.iter().filter(|f| f.check == "config_scope").collect();
        assert_eq!(config.len(), 2);
        assert!(config.iter().any(|f| f.file == "Dockerfile"));
    }

    /// **Scenario**: dependency manifests trigger dependency_scope flags.
    #[test]
    fn flags_dependency_manifests() {
        let flags = analyse_diff_scope(&diff_for(&["package.json", "requirements-dev.txt", "Cargo.toml"]));
        assert_eq!(flags.len(), 3);
        assert!(flags.iter().all(|f| f.check == "dependency_scope"));
    }

    /// **Scenario**: a file can trip both rule sets.
    #[test]
    fn file_can_match_both_sets() {
        // .env matches config; Pipfile matches dependency; plain source matches neither.
        let flags = analyse_diff_scope(&diff_for(&[".env", "Pipfile", "app/handlers.py"]));
        assert_eq!(flags.len(), 2);
    }

    /// **Scenario**: ordinary source changes produce no flags.
    #[test]
    fn clean_diff_has_no_flags() {
        assert!(analyse_diff_scope(&diff_for(&["src/lib.rs", "tests/api.rs"])).is_empty());
    }

    /// **Scenario**: nested paths match through the (^|/) anchor.
    #[test]
    fn nested_paths_match() {
        let flags = analyse_diff_scope(&diff_for(&["services/web/Dockerfile", "libs/core/go.mod"]));
        assert_eq!(flags.len(), 2);
    }
}
