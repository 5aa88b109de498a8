//! Tool-using agent on top of the private completion boundary.

pub mod runner;
pub mod tools;

pub use runner::{AgentResponse, AgentRunner, ToolErrorPolicy, ToolOutcome, MAX_STEPS};
pub use tools::{Tool, ToolRegistry, ToolResult};
