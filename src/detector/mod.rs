//! Pluggable PII detection.
//!
//! A detector looks at raw text plus the current working dictionary and
//! returns replacement mappings for genuinely new entities only. The
//! orchestrator owns merging, persistence and rewriting; detectors never
//! touch the store.

pub mod local;
pub mod remote;
pub mod seed;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use local::LocalDetector;
pub use remote::RemoteDetector;
pub use seed::SeedDetector;

/// Finds new sensitive entities in text.
///
/// `current_dict` maps `token -> original` for everything already known in
/// this conversation, so implementations can avoid renaming entities that
/// are already anonymized. The result maps `original -> token` for new
/// entities only.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn detect(
        &self,
        cancel: &CancellationToken,
        text: &str,
        current_dict: &HashMap<String, String>,
    ) -> anyhow::Result<HashMap<String, String>>;
}

// ---------------------------------------------------------------------------
// Structured-output schema shared by the model-backed detectors
// ---------------------------------------------------------------------------

pub const REPLACE_ENTITIES_TOOL: &str = "replace_entities";

/// OpenAI-format function schema for the forced detection tool call.
pub fn replace_entities_schema() -> serde_json::Value {
    json!({
        "type": "function",
        "function": {
            "name": REPLACE_ENTITIES_TOOL,
            "description": "Replace PII entities in the text with semantically equivalent alternatives that preserve context.",
            "parameters": {
                "type": "object",
                "properties": {
                    "replacements": {
                        "type": "array",
                        "description": "List of replacements to make. Each item has the PII text and its anonymized version.",
                        "items": {
                            "type": "object",
                            "properties": {
                                "original": {
                                    "type": "string",
                                    "description": "PII text to replace"
                                },
                                "replacement": {
                                    "type": "string",
                                    "description": "Anonymized text"
                                }
                            },
                            "required": ["original", "replacement"]
                        }
                    }
                },
                "required": ["replacements"]
            }
        }
    })
}

/// System prompt driving model-backed detection.
pub const DETECTION_SYSTEM_PROMPT: &str = r#"You are an anonymizer. Your task is to identify and replace personally identifiable information (PII) in the given text.
Replace PII entities with semantically equivalent alternatives that preserve the context needed for a good response.
If no PII is found or replacement is not needed, return an empty replacements list.

REPLACEMENT RULES:
- Personal names: Replace private or small-group individuals. Pick same culture + gender + era; keep surnames aligned across family members. DO NOT replace globally recognized public figures.
- Companies / organizations: Replace private, niche, employer & partner orgs with a fictitious org in the same industry & size tier; keep legal suffix. Keep major public companies.
- Projects / codenames / internal tools: Always replace with a neutral two-word alias of similar length.
- Locations: Replace street addresses, buildings, villages & towns with a same-level synthetic location inside the same state/country. Keep big cities, states, provinces, countries, iconic landmarks.
- Dates & times: Replace birthdays, meeting invites, exact timestamps. Keep public holidays, famous historic dates, years, fiscal quarters.
- Identifiers (emails, phone numbers, IDs, URLs, account numbers): Always replace with format-valid dummies; keep the domain class.
- Monetary values: Replace personal income, invoices, bids; keep order of magnitude. Keep public list prices & market caps.
- Quotes / text snippets: If the quote contains PII, swap only the embedded tokens; keep the rest verbatim."#;

#[derive(Debug, Deserialize)]
struct ReplacementItem {
    original: String,
    replacement: String,
}

#[derive(Debug, Deserialize)]
struct ReplacementList {
    #[serde(default)]
    replacements: Vec<ReplacementItem>,
}

/// Parse the `replace_entities` argument payload into `original -> token`.
pub(crate) fn parse_replacements(arguments: &str) -> anyhow::Result<HashMap<String, String>> {
    let parsed: ReplacementList = serde_json::from_str(arguments)?;
    Ok(parsed
        .replacements
        .into_iter()
        .map(|r| (r.original, r.replacement))
        .collect())
}

// ---------------------------------------------------------------------------
// Dictionary hygiene shared by all detector variants
// ---------------------------------------------------------------------------

/// Drop detector suggestions that must never enter the dictionary:
/// identity mappings, and suggestions whose original is itself an existing
/// token (the detector tried to anonymize an already-anonymized placeholder).
pub fn sanitize_suggestions(
    suggestions: HashMap<String, String>,
    current_dict: &HashMap<String, String>,
) -> HashMap<String, String> {
    suggestions
        .into_iter()
        .filter(|(original, token)| {
            if original == token {
                return false;
            }
            if current_dict.contains_key(original) {
                warn!("Dropping re-anonymization of placeholder '{}'", original);
                return false;
            }
            true
        })
        .collect()
}

/// Collapse replacement chains so every token maps to its ultimate original.
///
/// A chain arises when an entry's original is itself another entry's token
/// (A -> B while B -> C means A should map to C). Cycles are logged and the
/// walk stops rather than looping.
pub fn resolve_chains(dict: &mut HashMap<String, String>) {
    let tokens: Vec<String> = dict.keys().cloned().collect();
    for token in tokens {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(token.clone());

        let mut original = match dict.get(&token) {
            Some(o) => o.clone(),
            None => continue,
        };
        while let Some(next) = dict.get(&original) {
            if !visited.insert(original.clone()) {
                warn!(
                    "Replacement chain cycle at '{}' while resolving '{}', stopping",
                    original, token
                );
                break;
            }
            original = next.clone();
        }
        dict.insert(token, original);
    }
}
