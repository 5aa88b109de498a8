//! Anonymization orchestration.
//!
//! The [`Anonymizer`] trait is the seam the completion service talks to; the
//! real implementation lives in [`orchestrator`], a no-op variant here, and
//! a config-driven factory in [`manager`].

pub mod manager;
pub mod orchestrator;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use manager::{build_anonymizer, AnonymizerConfig, AnonymizerKind};
pub use orchestrator::PipelineAnonymizer;

use crate::executor::InterruptContext;
use crate::messages::Message;
use crate::replace::Replacer;

/// Result of anonymizing one batch of messages.
#[derive(Debug, Clone)]
pub struct AnonymizedBatch {
    /// The full batch, rewritten with the final merged dictionary.
    pub messages: Vec<Message>,
    /// The merged dictionary in effect for this call (`token -> original`).
    pub dict: HashMap<String, String>,
    /// Only the rules discovered in this call, not the full dictionary.
    pub new_rules: HashMap<String, String>,
}

#[async_trait]
pub trait Anonymizer: Send + Sync {
    /// Anonymize a batch of messages.
    ///
    /// An empty `conversation_id` selects memory-only mode: nothing is
    /// loaded or saved, and `existing_dict` is the sole source of
    /// dictionary state. `existing_dict` entries win over stored entries on
    /// key collision in persistent mode.
    async fn anonymize_messages(
        &self,
        cancel: &CancellationToken,
        conversation_id: &str,
        messages: &[Message],
        existing_dict: &HashMap<String, String>,
        interrupt: Option<&InterruptContext>,
    ) -> anyhow::Result<AnonymizedBatch>;

    /// Reverse anonymization with `rules` (`token -> original`). Tokens are
    /// replaced longest-first; stored original case is emitted verbatim.
    fn de_anonymize(&self, text: &str, rules: &HashMap<String, String>) -> String {
        Replacer::for_deanonymization(rules).rewrite(text)
    }
}

/// Identity anonymizer for privacy-disabled deployments.
pub struct NoOpAnonymizer;

#[async_trait]
impl Anonymizer for NoOpAnonymizer {
    async fn anonymize_messages(
        &self,
        _cancel: &CancellationToken,
        _conversation_id: &str,
        messages: &[Message],
        existing_dict: &HashMap<String, String>,
        _interrupt: Option<&InterruptContext>,
    ) -> anyhow::Result<AnonymizedBatch> {
        Ok(AnonymizedBatch {
            messages: messages.to_vec(),
            dict: existing_dict.clone(),
            new_rules: HashMap::new(),
        })
    }

    fn de_anonymize(&self, text: &str, _rules: &HashMap<String, String>) -> String {
        text.to_string()
    }
}
