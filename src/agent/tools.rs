//! Agent tool abstraction and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::warn;

use crate::errors::ToolError;

/// Structured outcome of a tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    /// Text fed back to the model as the tool message.
    pub content: String,
    /// Optional machine-readable payload for callers that want more than
    /// the text.
    pub data: Option<Value>,
    /// Image URLs produced by the tool, surfaced alongside the final
    /// response.
    pub image_urls: Vec<String>,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A capability the agent can invoke during its reasoning loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls.
    fn name(&self) -> &str;

    /// Description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with parsed arguments.
    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<ToolResult>;

    /// Convert tool to OpenAI function schema format.
    fn to_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}

/// Holds the tools available to one agent.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if self.tools.contains_key(tool.name()) {
            warn!("Replacing already-registered tool '{}'", tool.name());
        }
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function schemas for every registered tool, name-sorted for stable
    /// request payloads.
    pub fn schemas(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.to_schema())
            .collect()
    }

    /// Parse the raw argument string and run the named tool.
    ///
    /// A panicking tool is caught and reported as an execution failure so
    /// one bad tool cannot take down the agent loop.
    pub async fn execute(&self, name: &str, arguments: &str) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let args: HashMap<String, Value> = if arguments.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolError::ArgumentParse {
                name: name.to_string(),
                message: e.to_string(),
            })?
        };

        match std::panic::AssertUnwindSafe(tool.execute(args))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(ToolError::Execution {
                name: name.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ToolError::Execution {
                name: name.to_string(),
                message: "tool panicked".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input"
        }

        fn parameters(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
                "required": ["text"]
            })
        }

        async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("missing 'text'"))?;
            Ok(ToolResult::text(text))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
            panic!("boom")
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Arc::new(EchoTool));
        r
    }

    #[test]
    fn test_to_schema_structure() {
        let schema = EchoTool.to_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "echo");
        assert_eq!(schema["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_schemas_are_name_sorted() {
        let mut r = registry();
        r.register(Arc::new(PanickingTool));
        let schemas = r.schemas();
        let names: Vec<&str> = schemas
            .iter()
            .map(|s| s["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["echo", "panicky"]);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let r = registry();
        let result = r.execute("echo", r#"{"text":"hello"}"#).await.unwrap();
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let r = registry();
        let err = r.execute("nope", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_execute_bad_arguments() {
        let r = registry();
        let err = r.execute("echo", "not json").await.unwrap_err();
        assert!(matches!(err, ToolError::ArgumentParse { .. }));
    }

    #[tokio::test]
    async fn test_execute_empty_arguments_is_empty_map() {
        let r = registry();
        // Missing required arg fails inside the tool, not in parsing.
        let err = r.execute("echo", "").await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_execute_tool_error_is_execution_failure() {
        let r = registry();
        let err = r.execute("echo", "{}").await.unwrap_err();
        match err {
            ToolError::Execution { name, message } => {
                assert_eq!(name, "echo");
                assert!(message.contains("missing 'text'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_tool_is_contained() {
        let mut r = registry();
        r.register(Arc::new(PanickingTool));
        let err = r.execute("panicky", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { message, .. } if message.contains("panicked")));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut r = registry();
        r.register(Arc::new(EchoTool));
        assert_eq!(r.schemas().len(), 1);
    }
}
