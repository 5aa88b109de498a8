//! The anonymization state machine.
//!
//! One call runs load -> merge -> detect -> persist -> rewrite:
//!
//! 1. Load the stored dictionary (persistent mode only).
//! 2. Overlay the caller's dictionary; caller entries win on collision.
//! 3. Partition messages by fingerprint: already-processed messages skip
//!    detection but are still rewritten with the merged dictionary.
//! 4. Run the detector over each new message, checking cancellation and
//!    the cooperative interrupt before and after each call.
//! 5. Merge detector output, dropping duplicate originals and collapsing
//!    replacement chains.
//! 6. Persist the dictionary and fingerprints once, at the end. A call
//!    that fails or is interrupted persists nothing.
//! 7. Rewrite the FULL batch with the final dictionary so repeated calls
//!    produce identical output.
//!
//! Concurrent calls for the same conversation id are not serialized here;
//! the dictionary update is last-write-wins. Callers that need stricter
//! behavior serialize per conversation at a higher layer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AnonymizedBatch, Anonymizer};
use crate::detector::{resolve_chains, sanitize_suggestions, Detector};
use crate::errors::AnonymizerError;
use crate::executor::InterruptContext;
use crate::fingerprint::message_hash;
use crate::messages::Message;
use crate::replace::Replacer;
use crate::store::ConversationStore;

pub struct PipelineAnonymizer {
    detector: Arc<dyn Detector>,
    store: Option<Arc<ConversationStore>>,
}

impl PipelineAnonymizer {
    /// Memory-only anonymizer: no dictionary survives the call.
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            store: None,
        }
    }

    /// Anonymizer with durable per-conversation dictionaries.
    pub fn with_store(detector: Arc<dyn Detector>, store: Arc<ConversationStore>) -> Self {
        Self {
            detector,
            store: Some(store),
        }
    }

    fn checkpoint(
        cancel: &CancellationToken,
        interrupt: Option<&InterruptContext>,
    ) -> anyhow::Result<()> {
        if cancel.is_cancelled() {
            return Err(AnonymizerError::Cancelled.into());
        }
        if let Some(ictx) = interrupt {
            if ictx.check_and_consume_interrupt() {
                return Err(AnonymizerError::Interrupted.into());
            }
        }
        Ok(())
    }

    /// Fold detector suggestions into the working dictionary, skipping
    /// originals that already have a token and tokens that are already
    /// taken. Returns what was actually added, keyed `token -> original`.
    fn merge_suggestions(
        working: &mut HashMap<String, String>,
        suggestions: HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut added = HashMap::new();
        for (original, token) in suggestions {
            if working.values().any(|known| *known == original) {
                continue;
            }
            if working.contains_key(&token) {
                warn!("Detector reused token '{}', skipping suggestion", token);
                continue;
            }
            working.insert(token.clone(), original.clone());
            added.insert(token, original);
        }
        added
    }
}

#[async_trait]
impl Anonymizer for PipelineAnonymizer {
    async fn anonymize_messages(
        &self,
        cancel: &CancellationToken,
        conversation_id: &str,
        messages: &[Message],
        existing_dict: &HashMap<String, String>,
        interrupt: Option<&InterruptContext>,
    ) -> anyhow::Result<AnonymizedBatch> {
        Self::checkpoint(cancel, interrupt)?;

        let store = if conversation_id.is_empty() {
            None
        } else {
            self.store.as_deref()
        };

        // Stored entries first, then the caller's dictionary on top so
        // explicit arguments beat stored state on key collision.
        let mut working = match store {
            Some(store) => store.get_dict(conversation_id),
            None => HashMap::new(),
        };
        for (token, original) in existing_dict {
            working.insert(token.clone(), original.clone());
        }

        // Partition into already-fingerprinted vs new messages.
        let hashes: Vec<String> = messages.iter().map(message_hash).collect();
        let new_indices: Vec<usize> = (0..messages.len())
            .filter(|&i| match store {
                Some(store) => !store.is_anonymized(conversation_id, &hashes[i]),
                None => true,
            })
            .collect();
        debug!(
            "Anonymizing batch: {} messages, {} new",
            messages.len(),
            new_indices.len()
        );

        let mut new_rules: HashMap<String, String> = HashMap::new();
        for &i in &new_indices {
            let text = messages[i].outbound_text();
            if text.trim().is_empty() {
                continue;
            }

            Self::checkpoint(cancel, interrupt)?;
            let found = self
                .detector
                .detect(cancel, &text, &working)
                .await
                .map_err(|e| match e.downcast_ref::<AnonymizerError>() {
                    Some(_) => e,
                    None => AnonymizerError::Detector(e.to_string()).into(),
                })?;
            Self::checkpoint(cancel, interrupt)?;

            let found = sanitize_suggestions(found, &working);
            let added = Self::merge_suggestions(&mut working, found);
            new_rules.extend(added);
        }

        resolve_chains(&mut working);

        // Persistence happens exactly once, after the whole batch was
        // processed. Failed or interrupted calls never reach this point.
        if let Some(store) = store {
            store.save_dict(conversation_id, &working);
            for &i in &new_indices {
                store.mark_anonymized(conversation_id, &hashes[i]);
            }
        }

        // Rewrite the full batch with the final dictionary, including
        // messages that skipped detection, so output is stable across
        // repeated calls.
        let replacer = Replacer::for_anonymization(&working);
        let anonymized = messages
            .iter()
            .map(|m| m.rewrite(|s| replacer.rewrite(s)))
            .collect();

        Ok(AnonymizedBatch {
            messages: anonymized,
            dict: working,
            new_rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Detector that reports fixed rules for originals present in the text
    /// and counts invocations.
    struct MockDetector {
        rules: Vec<(String, String)>,
        calls: AtomicUsize,
    }

    impl MockDetector {
        fn new(rules: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                rules: rules
                    .iter()
                    .map(|(o, t)| (o.to_string(), t.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Detector for MockDetector {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn detect(
            &self,
            _cancel: &CancellationToken,
            text: &str,
            current_dict: &HashMap<String, String>,
        ) -> anyhow::Result<HashMap<String, String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rules
                .iter()
                .filter(|(original, _)| {
                    text.contains(original.as_str())
                        && !current_dict.values().any(|o| o == original)
                })
                .map(|(o, t)| (o.clone(), t.clone()))
                .collect())
        }
    }

    fn dict(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(t, o)| (t.to_string(), o.to_string()))
            .collect()
    }

    fn temp_store() -> (tempfile::TempDir, Arc<ConversationStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(&dir.path().join("test.db")).unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn test_memory_only_discovers_and_rewrites() {
        let detector = MockDetector::new(&[("John", "PERSON_001")]);
        let anon = PipelineAnonymizer::new(detector.clone());
        let cancel = CancellationToken::new();

        let batch = anon
            .anonymize_messages(
                &cancel,
                "",
                &[Message::user("John called")],
                &HashMap::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(batch.messages[0].content(), Some("PERSON_001 called"));
        assert_eq!(batch.dict, dict(&[("PERSON_001", "John")]));
        assert_eq!(batch.new_rules, dict(&[("PERSON_001", "John")]));
    }

    #[tokio::test]
    async fn test_memory_only_caller_dict_is_sole_state() {
        let detector = MockDetector::new(&[]);
        let anon = PipelineAnonymizer::new(detector);
        let cancel = CancellationToken::new();
        let existing = dict(&[("PERSON_001", "Maria")]);

        let batch = anon
            .anonymize_messages(
                &cancel,
                "",
                &[Message::user("Maria waved")],
                &existing,
                None,
            )
            .await
            .unwrap();
        assert_eq!(batch.messages[0].content(), Some("PERSON_001 waved"));
        assert!(batch.new_rules.is_empty());
    }

    #[tokio::test]
    async fn test_merge_precedence_caller_wins() {
        let (_dir, store) = temp_store();
        store.save_dict("conv-1", &dict(&[("a", "1"), ("b", "2")]));

        let anon = PipelineAnonymizer::with_store(MockDetector::new(&[]), store);
        let cancel = CancellationToken::new();
        let caller = dict(&[("a", "3"), ("c", "4")]);

        let batch = anon
            .anonymize_messages(&cancel, "conv-1", &[Message::user("x")], &caller, None)
            .await
            .unwrap();
        assert_eq!(batch.dict, dict(&[("a", "3"), ("b", "2"), ("c", "4")]));
    }

    #[tokio::test]
    async fn test_replay_is_idempotent_and_deduped() {
        let (_dir, store) = temp_store();
        let detector = MockDetector::new(&[("John", "PERSON_001")]);
        let anon = PipelineAnonymizer::with_store(detector.clone(), store);
        let cancel = CancellationToken::new();
        let messages = vec![Message::user("John called"), Message::user("John again")];

        let first = anon
            .anonymize_messages(&cancel, "conv-1", &messages, &HashMap::new(), None)
            .await
            .unwrap();
        assert_eq!(detector.call_count(), 2);
        assert_eq!(first.new_rules, dict(&[("PERSON_001", "John")]));

        // Replay: no detector calls, identical dictionary, empty new rules,
        // identical rewritten output.
        let second = anon
            .anonymize_messages(&cancel, "conv-1", &messages, &HashMap::new(), None)
            .await
            .unwrap();
        assert_eq!(detector.call_count(), 2);
        assert!(second.new_rules.is_empty());
        assert_eq!(second.dict, first.dict);
        assert_eq!(second.messages, first.messages);
    }

    #[tokio::test]
    async fn test_known_messages_still_rewritten() {
        let (_dir, store) = temp_store();
        let detector = MockDetector::new(&[("John", "PERSON_001")]);
        let anon = PipelineAnonymizer::with_store(detector.clone(), store.clone());
        let cancel = CancellationToken::new();
        let messages = vec![Message::user("John called")];

        anon.anonymize_messages(&cancel, "conv-1", &messages, &HashMap::new(), None)
            .await
            .unwrap();

        // Same message resubmitted as part of a longer batch: it skips
        // detection but appears rewritten in the output.
        let extended = vec![Message::user("John called"), Message::user("hello")];
        let batch = anon
            .anonymize_messages(&cancel, "conv-1", &extended, &HashMap::new(), None)
            .await
            .unwrap();
        assert_eq!(batch.messages[0].content(), Some("PERSON_001 called"));
        assert_eq!(detector.call_count(), 2); // 1 first call + 1 for "hello"
    }

    #[tokio::test]
    async fn test_cancellation_persists_nothing() {
        let (_dir, store) = temp_store();
        let anon = PipelineAnonymizer::with_store(
            MockDetector::new(&[("John", "PERSON_001")]),
            store.clone(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = anon
            .anonymize_messages(
                &cancel,
                "conv-1",
                &[Message::user("John called")],
                &HashMap::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnonymizerError>(),
            Some(AnonymizerError::Cancelled)
        ));
        assert!(store.get_dict("conv-1").is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_persists_nothing() {
        let (_dir, store) = temp_store();
        let anon = PipelineAnonymizer::with_store(
            MockDetector::new(&[("John", "PERSON_001")]),
            store.clone(),
        );
        let cancel = CancellationToken::new();
        let ictx = InterruptContext::new();
        ictx.interrupt();

        let err = anon
            .anonymize_messages(
                &cancel,
                "conv-1",
                &[Message::user("John called")],
                &HashMap::new(),
                Some(&ictx),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnonymizerError>(),
            Some(AnonymizerError::Interrupted)
        ));
        assert!(store.get_dict("conv-1").is_empty());
        assert!(!store.is_anonymized("conv-1", &message_hash(&Message::user("John called"))));
    }

    #[tokio::test]
    async fn test_detector_failure_propagates() {
        struct FailingDetector;

        #[async_trait]
        impl Detector for FailingDetector {
            fn name(&self) -> &'static str {
                "failing"
            }
            async fn detect(
                &self,
                _cancel: &CancellationToken,
                _text: &str,
                _current_dict: &HashMap<String, String>,
            ) -> anyhow::Result<HashMap<String, String>> {
                anyhow::bail!("model exploded")
            }
        }

        let anon = PipelineAnonymizer::new(Arc::new(FailingDetector));
        let cancel = CancellationToken::new();
        let err = anon
            .anonymize_messages(
                &cancel,
                "",
                &[Message::user("John called")],
                &HashMap::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnonymizerError>(),
            Some(AnonymizerError::Detector(_))
        ));
    }

    #[tokio::test]
    async fn test_chain_in_existing_dict_collapses() {
        let anon = PipelineAnonymizer::new(MockDetector::new(&[]));
        let cancel = CancellationToken::new();
        // ANON_2's "original" is itself a placeholder; it must resolve to
        // the true value.
        let existing = dict(&[("ANON_2", "ANON_1"), ("ANON_1", "John")]);

        let batch = anon
            .anonymize_messages(&cancel, "", &[Message::user("x")], &existing, None)
            .await
            .unwrap();
        assert_eq!(batch.dict.get("ANON_2").map(String::as_str), Some("John"));
    }

    #[tokio::test]
    async fn test_duplicate_original_keeps_first_token() {
        let (_dir, store) = temp_store();
        let detector = MockDetector::new(&[("John", "PERSON_009")]);
        let anon = PipelineAnonymizer::with_store(detector, store);
        let cancel = CancellationToken::new();
        // John already has a token; the detector's new suggestion for the
        // same original is ignored.
        let existing = dict(&[("PERSON_001", "John")]);

        let batch = anon
            .anonymize_messages(
                &cancel,
                "conv-1",
                &[Message::user("John called")],
                &existing,
                None,
            )
            .await
            .unwrap();
        assert!(batch.new_rules.is_empty());
        assert_eq!(batch.messages[0].content(), Some("PERSON_001 called"));
    }

    #[tokio::test]
    async fn test_tool_call_arguments_are_rewritten() {
        use crate::messages::ToolCall;

        let detector = MockDetector::new(&[("John", "PERSON_001")]);
        let anon = PipelineAnonymizer::new(detector);
        let cancel = CancellationToken::new();
        let messages = vec![Message::Assistant {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "search".into(),
                arguments: "{\"q\":\"John\"}".into(),
            }],
        }];

        let batch = anon
            .anonymize_messages(&cancel, "", &messages, &HashMap::new(), None)
            .await
            .unwrap();
        assert_eq!(
            batch.messages[0].tool_calls()[0].arguments,
            "{\"q\":\"PERSON_001\"}"
        );
    }
}
