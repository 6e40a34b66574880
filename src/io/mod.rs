//! External tool invocation and temporary file ownership.

pub mod tools;
pub mod workspace;

pub use tools::{run_tool, Bindings, CommandSpec, StdoutTarget, ToolTemplate};
pub use workspace::Workspace;
