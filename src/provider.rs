//! Raw completion boundary.
//!
//! The HTTP client wrapping the actual provider lives outside this crate;
//! everything here talks to it through [`CompletionClient`]. Implementations
//! are expected to perform no anonymization of their own; that is the whole
//! point of the layers above.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::messages::{Message, ToolCall};

/// Response from a raw completion call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Convert into the assistant message appended to conversation history.
    pub fn into_message(self) -> Message {
        Message::Assistant {
            content: self.content,
            tool_calls: self.tool_calls,
        }
    }
}

/// Abstract completion provider.
///
/// `tools` are OpenAI-format function schemas; implementations that do not
/// support tools may ignore them.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[serde_json::Value],
        model: &str,
    ) -> anyhow::Result<CompletionResponse>;
}
