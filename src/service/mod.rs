//! Privacy-preserving completion boundary.
//!
//! [`PrivateCompletionService`] is the only path through which conversation
//! text reaches the completion provider. Outbound messages are anonymized
//! first; the provider's reply is de-anonymized before anyone else sees it.
//! Anonymization runs on the shared [`TaskExecutor`] at the caller's
//! priority so interactive requests are not stuck behind batch work.
//!
//! Anonymization failure aborts the whole request. Sending raw text because
//! the privacy layer broke is never acceptable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::anonymizer::Anonymizer;
use crate::executor::{Priority, TaskExecutor};
use crate::messages::Message;
use crate::provider::CompletionClient;

/// A completion plus the replacement dictionary in effect for the call.
///
/// `replacement_rules` maps `token -> original` and covers the full
/// conversation dictionary, not just rules discovered in this call, so the
/// caller can de-anonymize any token the model echoes back later.
#[derive(Debug, Clone)]
pub struct PrivateResult {
    pub message: Message,
    pub replacement_rules: HashMap<String, String>,
}

/// Completion requests that never leak raw conversation text.
#[async_trait]
pub trait PrivateCompletions: Send + Sync {
    async fn completions(
        &self,
        cancel: &CancellationToken,
        conversation_id: &str,
        messages: &[Message],
        tools: &[serde_json::Value],
        model: &str,
        priority: Priority,
    ) -> anyhow::Result<PrivateResult>;
}

pub struct PrivateCompletionService {
    anonymizer: Arc<dyn Anonymizer>,
    client: Arc<dyn CompletionClient>,
    executor: Arc<TaskExecutor>,
}

impl PrivateCompletionService {
    pub fn new(
        anonymizer: Arc<dyn Anonymizer>,
        client: Arc<dyn CompletionClient>,
        executor: Arc<TaskExecutor>,
    ) -> Self {
        Self {
            anonymizer,
            client,
            executor,
        }
    }
}

#[async_trait]
impl PrivateCompletions for PrivateCompletionService {
    async fn completions(
        &self,
        cancel: &CancellationToken,
        conversation_id: &str,
        messages: &[Message],
        tools: &[serde_json::Value],
        model: &str,
        priority: Priority,
    ) -> anyhow::Result<PrivateResult> {
        let anonymizer = self.anonymizer.clone();
        let conversation = conversation_id.to_string();
        let outbound = messages.to_vec();
        let task_cancel = cancel.clone();

        let batch = self
            .executor
            .execute(cancel, priority, move |ictx| async move {
                anonymizer
                    .anonymize_messages(
                        &task_cancel,
                        &conversation,
                        &outbound,
                        &HashMap::new(),
                        Some(&ictx),
                    )
                    .await
            })
            .await
            .map_err(|e| e.context("anonymization failed"))?;
        debug!(
            "Anonymized {} messages ({} new rules) for completion",
            batch.messages.len(),
            batch.new_rules.len()
        );

        let response = self.client.complete(&batch.messages, tools, model).await?;

        // The model only ever saw tokens; map them back before the reply
        // leaves the boundary.
        let reply = response
            .into_message()
            .rewrite(|s| self.anonymizer.de_anonymize(s, &batch.dict));

        Ok(PrivateResult {
            message: reply,
            replacement_rules: batch.dict,
        })
    }
}

/// Pass-through service for deployments without a privacy layer.
///
/// Same surface, no rewriting in either direction, empty rules.
pub struct FallbackCompletionsService {
    client: Arc<dyn CompletionClient>,
}

impl FallbackCompletionsService {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PrivateCompletions for FallbackCompletionsService {
    async fn completions(
        &self,
        _cancel: &CancellationToken,
        _conversation_id: &str,
        messages: &[Message],
        tools: &[serde_json::Value],
        model: &str,
        _priority: Priority,
    ) -> anyhow::Result<PrivateResult> {
        let response = self.client.complete(messages, tools, model).await?;
        Ok(PrivateResult {
            message: response.into_message(),
            replacement_rules: HashMap::new(),
        })
    }
}
