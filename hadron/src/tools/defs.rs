//! Canonical tool definitions shared by every provider backend.
//!
//! Each backend translates these specs into its own wire format; the
//! executor implements the behavior. Keeping one canonical table means all
//! agents see the same tool surface regardless of provider.

use serde::Serialize;
use serde_json::json;

pub const TOOL_READ_FILE: &str = "read_file";
pub const TOOL_WRITE_FILE: &str = "write_file";
pub const TOOL_LIST_DIRECTORY: &str = "list_directory";
pub const TOOL_RUN_COMMAND: &str = "run_command";

/// Every tool an agent may be granted.
pub const ALL_TOOLS: &[&str] = &[
    TOOL_READ_FILE,
    TOOL_WRITE_FILE,
    TOOL_LIST_DIRECTORY,
    TOOL_RUN_COMMAND,
];

/// Tool subset for the read-only Explore phase.
pub const READ_ONLY_TOOLS: &[&str] = &[TOOL_READ_FILE, TOOL_LIST_DIRECTORY];

/// Name, description and JSON-schema input for one tool.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

fn spec_for(name: &str) -> Option<ToolSpec> {
    let spec = match name {
        TOOL_READ_FILE => ToolSpec {
            name: TOOL_READ_FILE.to_string(),
            description: "Read the contents of a file. Path is relative to the working directory."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to read"}
                },
                "required": ["path"]
            }),
        },
        TOOL_WRITE_FILE => ToolSpec {
            name: TOOL_WRITE_FILE.to_string(),
            description: "Write content to a file. Creates parent directories if needed. Path is relative to the working directory."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to write"},
                    "content": {"type": "string", "description": "File content"}
                },
                "required": ["path", "content"]
            }),
        },
        TOOL_LIST_DIRECTORY => ToolSpec {
            name: TOOL_LIST_DIRECTORY.to_string(),
            description: "List files and directories. Path is relative to the working directory."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory path (default: '.')", "default": "."}
                }
            }),
        },
        TOOL_RUN_COMMAND => ToolSpec {
            name: TOOL_RUN_COMMAND.to_string(),
            description: "Run a shell command in the working directory. Use for running tests, linting, etc."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command to execute"}
                },
                "required": ["command"]
            }),
        },
        _ => return None,
    };
    Some(spec)
}

/// Specs for the allowed tool names; unknown names are skipped.
pub fn tool_specs(allowed: &[String]) -> Vec<ToolSpec> {
    allowed.iter().filter_map(|name| spec_for(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specs_cover_all_tools_and_skip_unknown() {
        let allowed: Vec<String> = ALL_TOOLS.iter().map(|s| s.to_string()).collect();
        assert_eq!(tool_specs(&allowed).len(), 4);
        let with_unknown = vec!["read_file".to_string(), "launch_missiles".to_string()];
        let specs = tool_specs(&with_unknown);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "read_file");
    }
}
