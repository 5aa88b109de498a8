//! Message fingerprints for anonymization dedup.
//!
//! A fingerprint is a SHA-256 hash over the semantically relevant fields of
//! a message, normalized so that incidental formatting differences (leading
//! whitespace, JSON key order inside tool-call arguments) do not change the
//! hash. Fingerprints are dedup keys only, with no ordering semantics.

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::messages::Message;

/// Deterministic content hash of one message.
pub fn message_hash(message: &Message) -> String {
    // serde_json maps are BTree-backed, so object keys serialize sorted and
    // the document below is canonical.
    let mut doc = serde_json::Map::new();
    doc.insert("role".into(), json!(message.role()));

    match message {
        Message::System { content } => {
            doc.insert("content".into(), json!(content.trim()));
        }
        Message::User { content, name } => {
            doc.insert("content".into(), json!(content.trim()));
            if let Some(name) = name {
                doc.insert("name".into(), json!(name));
            }
        }
        Message::Assistant {
            content,
            tool_calls,
        } => {
            if let Some(content) = content {
                doc.insert("content".into(), json!(content.trim()));
            }
            if !tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "name": c.name,
                            "arguments": canonical_arguments(&c.arguments),
                        })
                    })
                    .collect();
                doc.insert("tool_calls".into(), json!(calls));
            }
        }
        Message::Tool {
            content,
            tool_call_id,
        } => {
            doc.insert("content".into(), json!(content.trim()));
            doc.insert("tool_call_id".into(), json!(tool_call_id));
        }
    }

    let serialized =
        serde_json::to_string(&doc).unwrap_or_else(|_| format!("{:?}", message));
    hex_digest(serialized.as_bytes())
}

/// Hash of a whole batch: individual hashes sorted and joined, so batch
/// order does not matter.
pub fn batch_hash(messages: &[Message]) -> String {
    let mut hashes: Vec<String> = messages.iter().map(message_hash).collect();
    hashes.sort();
    hex_digest(hashes.join("|").as_bytes())
}

/// Re-serialize a JSON argument string so key order is canonical. Strings
/// that do not parse as JSON are hashed as-is.
fn canonical_arguments(arguments: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| arguments.to_string()),
        Err(_) => arguments.to_string(),
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}
