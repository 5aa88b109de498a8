//! Chat message model.
//!
//! Messages are a tagged sum type, one variant per role, each carrying only
//! the fields that role actually has. Content extraction and rewriting are
//! exhaustive matches, not JSON round-trips.

use serde::{Deserialize, Serialize};

/// A tool call requested by the model.
///
/// `arguments` is the raw JSON-encoded argument string exactly as the
/// provider returned it; parsing is deferred to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A chat message, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A tool-result message answering the tool call with the given id.
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// The wire-format role string for this variant.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Text content of the message, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content } => Some(content),
            Message::User { content, .. } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool { content, .. } => Some(content),
        }
    }

    /// Tool calls carried by this message (empty for non-assistant roles).
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// All text that leaves the process with this message: the content plus
    /// every tool call's argument string.
    pub fn outbound_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(c) = self.content() {
            parts.push(c);
        }
        for call in self.tool_calls() {
            parts.push(&call.arguments);
        }
        parts.join("\n")
    }

    /// Return a copy with `f` applied to the content and to every tool call's
    /// argument string. Role, names and ids are untouched.
    pub fn rewrite(&self, f: impl Fn(&str) -> String) -> Message {
        match self {
            Message::System { content } => Message::System {
                content: f(content),
            },
            Message::User { content, name } => Message::User {
                content: f(content),
                name: name.clone(),
            },
            Message::Assistant {
                content,
                tool_calls,
            } => Message::Assistant {
                content: content.as_deref().map(&f),
                tool_calls: tool_calls
                    .iter()
                    .map(|c| ToolCall {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        arguments: f(&c.arguments),
                    })
                    .collect(),
            },
            Message::Tool {
                content,
                tool_call_id,
            } => Message::Tool {
                content: f(content),
                tool_call_id: tool_call_id.clone(),
            },
        }
    }
}
