//! Sandboxed tool surface exposed to agents.

mod defs;
mod executor;

pub use defs::{
    tool_specs, ToolSpec, ALL_TOOLS, READ_ONLY_TOOLS, TOOL_LIST_DIRECTORY, TOOL_READ_FILE,
    TOOL_RUN_COMMAND, TOOL_WRITE_FILE,
};
pub use executor::ToolExecutor;
