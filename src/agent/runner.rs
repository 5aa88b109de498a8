//! Bounded agent reasoning loop.
//!
//! Alternates completion calls and tool execution until the model answers
//! without tool calls or the step budget runs out. All provider traffic
//! goes through [`PrivateCompletions`], so the loop never sees raw
//! conversation text on the wire side.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::tools::ToolRegistry;
use crate::errors::ToolError;
use crate::executor::Priority;
use crate::messages::{Message, ToolCall};
use crate::service::PrivateCompletions;

/// Hard cap on completion rounds per request. Prevents a model that keeps
/// asking for tools from looping forever.
pub const MAX_STEPS: usize = 10;

/// What to do when a single tool call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolErrorPolicy {
    /// Fail the whole request on the first tool error.
    #[default]
    Abort,
    /// Feed the error back to the model as the tool result and continue.
    Collect,
}

/// One executed tool call and its outcome.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call: ToolCall,
    pub content: String,
    pub ok: bool,
}

/// Final result of one agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    /// Concatenated assistant text across all steps.
    pub content: String,
    /// Every tool call the model made, in order.
    pub tool_calls: Vec<ToolCall>,
    /// Outcomes for the executed tool calls.
    pub tool_results: Vec<ToolOutcome>,
    /// Images surfaced by tools during the run.
    pub image_urls: Vec<String>,
}

type ToolHook = Box<dyn Fn(&ToolCall) + Send + Sync>;

pub struct AgentRunner {
    completions: Arc<dyn PrivateCompletions>,
    registry: ToolRegistry,
    model: String,
    max_steps: usize,
    error_policy: ToolErrorPolicy,
    pre_tool_hook: Option<ToolHook>,
    post_tool_hook: Option<ToolHook>,
}

impl AgentRunner {
    pub fn new(
        completions: Arc<dyn PrivateCompletions>,
        registry: ToolRegistry,
        model: impl Into<String>,
    ) -> Self {
        Self {
            completions,
            registry,
            model: model.into(),
            max_steps: MAX_STEPS,
            error_policy: ToolErrorPolicy::default(),
            pre_tool_hook: None,
            post_tool_hook: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Called before each tool executes. Hook panics are contained.
    pub fn with_pre_tool_hook(mut self, hook: ToolHook) -> Self {
        self.pre_tool_hook = Some(hook);
        self
    }

    /// Called after each tool finishes, regardless of outcome.
    pub fn with_post_tool_hook(mut self, hook: ToolHook) -> Self {
        self.post_tool_hook = Some(hook);
        self
    }

    fn fire_hook(hook: &Option<ToolHook>, call: &ToolCall) {
        if let Some(hook) = hook {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(call))).is_err() {
                warn!("Tool hook panicked for '{}', continuing", call.name);
            }
        }
    }

    /// Run the loop to completion.
    ///
    /// Returns normally when the model stops calling tools or the step
    /// budget runs out; in the latter case the response carries whatever
    /// text was accumulated so far.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        conversation_id: &str,
        initial: Vec<Message>,
        priority: Priority,
    ) -> anyhow::Result<AgentResponse> {
        let schemas = self.registry.schemas();
        let mut messages = initial;
        let mut response = AgentResponse::default();
        let mut texts: Vec<String> = Vec::new();

        for step in 0..self.max_steps {
            let result = self
                .completions
                .completions(
                    cancel,
                    conversation_id,
                    &messages,
                    &schemas,
                    &self.model,
                    priority,
                )
                .await?;
            let reply = result.message;

            if let Some(text) = reply.content() {
                if !text.is_empty() {
                    texts.push(text.to_string());
                }
            }

            let calls: Vec<ToolCall> = reply.tool_calls().to_vec();
            if calls.is_empty() {
                response.content = texts.join("\n");
                return Ok(response);
            }
            debug!("Step {}: model requested {} tool calls", step, calls.len());

            messages.push(reply);
            for call in calls {
                response.tool_calls.push(call.clone());
                Self::fire_hook(&self.pre_tool_hook, &call);

                let outcome = match self.registry.execute(&call.name, &call.arguments).await {
                    Ok(result) => {
                        response.image_urls.extend(result.image_urls.clone());
                        ToolOutcome {
                            call: call.clone(),
                            content: result.content,
                            ok: true,
                        }
                    }
                    Err(e @ ToolError::NotFound(_)) => {
                        // A hallucinated tool name is a protocol violation,
                        // not a recoverable tool failure.
                        Self::fire_hook(&self.post_tool_hook, &call);
                        return Err(e.into());
                    }
                    Err(e) => {
                        if self.error_policy == ToolErrorPolicy::Abort {
                            Self::fire_hook(&self.post_tool_hook, &call);
                            return Err(e.into());
                        }
                        ToolOutcome {
                            call: call.clone(),
                            content: format!("Error: {}", e),
                            ok: false,
                        }
                    }
                };

                Self::fire_hook(&self.post_tool_hook, &call);
                messages.push(Message::tool(outcome.content.clone(), &outcome.call.id));
                response.tool_results.push(outcome);
            }
        }

        warn!(
            "Agent hit the {}-step budget, returning accumulated output",
            self.max_steps
        );
        response.content = texts.join("\n");
        Ok(response)
    }
}
