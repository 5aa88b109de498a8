//! Local-model detector.
//!
//! Same contract as the remote detector, but over an OpenAI-compatible
//! endpoint served by a local inference runtime (Ollama, LM Studio, vLLM).
//! Ships its own small HTTP client rather than going through the raw
//! completion boundary, since the local model is a dedicated anonymizer and
//! should never see the main provider's configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    parse_replacements, replace_entities_schema, Detector, DETECTION_SYSTEM_PROMPT,
    REPLACE_ENTITIES_TOOL,
};
use crate::errors::AnonymizerError;

pub struct LocalDetector {
    client: Client,
    base_url: String,
    model: String,
}

/// Normalize a base URL so it ends with the OpenAI-compatible `/v1` path.
fn ensure_v1_suffix(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

/// Turn opaque connection errors into something a user can act on.
fn prettify_connection_error(e: &reqwest::Error) -> String {
    if e.is_connect() {
        return "anonymizer is not running".to_string();
    }
    let msg = e.to_string();
    if msg.contains("404") || msg.to_lowercase().contains("not found") {
        return "anonymizer endpoint not found (did you include '/v1' in the base URL?)"
            .to_string();
    }
    msg
}

impl LocalDetector {
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        let base_url = ensure_v1_suffix(base_url);
        let model = model.into();
        info!(
            "Initializing local detector: base_url={} model={}",
            base_url, model
        );
        Self {
            client: Client::new(),
            base_url,
            model,
        }
    }

    /// Lightweight health check: GET the models list endpoint.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let endpoint = format!("{}/models", self.base_url);
        let resp = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!(prettify_connection_error(&e)))?;
        if !resp.status().is_success() {
            anyhow::bail!(
                "anonymizer health check failed: GET {} returned {}",
                endpoint,
                resp.status()
            );
        }
        debug!("Local detector health check OK: {}", endpoint);
        Ok(())
    }

    async fn request_replacements(&self, text: &str) -> anyhow::Result<HashMap<String, String>> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": DETECTION_SYSTEM_PROMPT },
                { "role": "user", "content": text },
            ],
            "tools": [replace_entities_schema()],
            "tool_choice": "required",
            "temperature": 0.0,
            "max_tokens": 256,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AnonymizerError::Detector(prettify_connection_error(&e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AnonymizerError::Detector(format!(
                "local model returned HTTP {}: {}",
                status, text
            ))
            .into());
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AnonymizerError::Detector(e.to_string()))?;

        let tool_call = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("tool_calls"))
            .and_then(|t| t.get(0));

        let Some(tool_call) = tool_call else {
            warn!("Local detector returned no tool calls, ignoring");
            return Ok(HashMap::new());
        };

        let name = tool_call
            .pointer("/function/name")
            .and_then(|n| n.as_str())
            .unwrap_or_default();
        if name != REPLACE_ENTITIES_TOOL {
            warn!("Local detector returned unexpected tool call '{}', ignoring", name);
            return Ok(HashMap::new());
        }

        let arguments = tool_call
            .pointer("/function/arguments")
            .and_then(|a| a.as_str())
            .unwrap_or("{}");
        parse_replacements(arguments)
            .map_err(|e| AnonymizerError::Detector(format!("bad replacement payload: {}", e)).into())
    }
}

#[async_trait]
impl Detector for LocalDetector {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn detect(
        &self,
        cancel: &CancellationToken,
        text: &str,
        _current_dict: &HashMap<String, String>,
    ) -> anyhow::Result<HashMap<String, String>> {
        let replacements = tokio::select! {
            _ = cancel.cancelled() => return Err(AnonymizerError::Cancelled.into()),
            r = self.request_replacements(text) => r?,
        };
        debug!("Local detector found {} replacements", replacements.len());
        Ok(replacements)
    }
}
