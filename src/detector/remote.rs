//! Remote-model detector.
//!
//! Asks a completion provider to emit `{original, replacement}` pairs via a
//! forced `replace_entities` tool call. The current dictionary is passed as
//! context so the model does not rename entities that already have tokens.

use std::collections::HashMap;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    parse_replacements, replace_entities_schema, Detector, DETECTION_SYSTEM_PROMPT,
    REPLACE_ENTITIES_TOOL,
};
use crate::errors::AnonymizerError;
use crate::messages::Message;
use crate::provider::CompletionClient;

pub struct RemoteDetector {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl RemoteDetector {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn build_prompt(text: &str, current_dict: &HashMap<String, String>) -> String {
        if current_dict.is_empty() {
            return text.to_string();
        }
        let known: Vec<String> = current_dict
            .iter()
            .map(|(token, original)| format!("{} -> {}", original, token))
            .collect();
        format!(
            "Already anonymized (do not rename these):\n{}\n\nText:\n{}",
            known.join("\n"),
            text
        )
    }
}

#[async_trait]
impl Detector for RemoteDetector {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn detect(
        &self,
        cancel: &CancellationToken,
        text: &str,
        current_dict: &HashMap<String, String>,
    ) -> anyhow::Result<HashMap<String, String>> {
        let messages = vec![
            Message::system(DETECTION_SYSTEM_PROMPT),
            Message::user(Self::build_prompt(text, current_dict)),
        ];
        let tools = vec![replace_entities_schema()];

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AnonymizerError::Cancelled.into()),
            r = self.client.complete(&messages, &tools, &self.model) => {
                r.map_err(|e| AnonymizerError::Detector(e.to_string()))?
            }
        };

        // Malformed detector output is not a hard failure: a missing or
        // unexpected tool call just means "no replacements found".
        let call = match response.tool_calls.first() {
            Some(call) if call.name == REPLACE_ENTITIES_TOOL => call,
            Some(call) => {
                warn!(
                    "Detector returned unexpected tool call '{}', ignoring",
                    call.name
                );
                return Ok(HashMap::new());
            }
            None => {
                warn!("Detector returned no tool calls, ignoring");
                return Ok(HashMap::new());
            }
        };

        let replacements = parse_replacements(&call.arguments)
            .map_err(|e| AnonymizerError::Detector(format!("bad replacement payload: {}", e)))?;
        debug!("Remote detector found {} replacements", replacements.len());
        Ok(replacements)
    }
}
