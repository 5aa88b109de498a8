//! Replacement engine: trie-based, longest-match-first, case-preserving
//! string substitution used for both directions of the pipeline.

pub mod case;
pub mod trie;

use std::collections::HashMap;

pub use case::{apply_case_pattern, merge_rules};
pub use trie::ReplacementTrie;

/// A rule set compiled for one rewriting direction.
///
/// Dictionaries are stored canonically as `token -> original`. Anonymization
/// inverts the dictionary (matching originals, emitting tokens, inferring
/// case from each matched span); de-anonymization indexes the tokens
/// directly and emits originals verbatim.
pub struct Replacer {
    trie: ReplacementTrie,
    preserve_case: bool,
}

impl Replacer {
    /// Compile `dict` (`token -> original`) for anonymization. Case-variant
    /// originals are merged before the trie is built.
    pub fn for_anonymization(dict: &HashMap<String, String>) -> Self {
        let inverted: HashMap<String, String> = dict
            .iter()
            .map(|(token, original)| (original.clone(), token.clone()))
            .collect();
        let rules = merge_rules(&inverted);

        let mut trie = ReplacementTrie::new();
        for (original, token) in &rules {
            trie.insert(original, token);
        }
        Self {
            trie,
            preserve_case: true,
        }
    }

    /// Compile `dict` (`token -> original`) for de-anonymization. The stored
    /// original case is emitted as-is, so no case inference happens.
    pub fn for_deanonymization(dict: &HashMap<String, String>) -> Self {
        let mut trie = ReplacementTrie::new();
        for (token, original) in dict {
            trie.insert(token, original);
        }
        Self {
            trie,
            preserve_case: false,
        }
    }

    /// Rewrite `text`; the returned map holds the rules that fired, keyed by
    /// the emitted replacement.
    pub fn replace_all(&self, text: &str) -> (String, HashMap<String, String>) {
        self.trie.replace_all(text, self.preserve_case)
    }

    /// Rewrite `text`, discarding the applied-rule report.
    pub fn rewrite(&self, text: &str) -> String {
        self.replace_all(text).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(t, o)| (t.to_string(), o.to_string()))
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let d = dict(&[
            ("PERSON_001", "John Smith"),
            ("PERSON_002", "John"),
            ("COMPANY_001", "OpenAI"),
        ]);
        let text = "John Smith met John at OpenAI";

        let anonymized = Replacer::for_anonymization(&d).rewrite(text);
        assert_eq!(anonymized, "PERSON_001 met PERSON_002 at COMPANY_001");

        let restored = Replacer::for_deanonymization(&d).rewrite(&anonymized);
        assert_eq!(restored, text);
    }

    #[test]
    fn test_empty_dict_is_identity() {
        let d = HashMap::new();
        assert_eq!(Replacer::for_anonymization(&d).rewrite("hello"), "hello");
        assert_eq!(Replacer::for_deanonymization(&d).rewrite("hello"), "hello");
    }

    #[test]
    fn test_longest_token_first_deanonymization() {
        // ANON_12 must not be rewritten as ANON_1 followed by a stray "2".
        let d = dict(&[("ANON_1", "alpha"), ("ANON_12", "beta")]);
        let restored = Replacer::for_deanonymization(&d).rewrite("ANON_12 then ANON_1");
        assert_eq!(restored, "beta then alpha");
    }

    #[test]
    fn test_anonymization_reports_applied_rules() {
        let d = dict(&[("PERSON_001", "John"), ("LOCATION_001", "Berlin")]);
        let (out, applied) = Replacer::for_anonymization(&d).replace_all("John left");
        assert_eq!(out, "PERSON_001 left");
        assert_eq!(applied.len(), 1);
        assert_eq!(applied.get("PERSON_001").map(String::as_str), Some("John"));
    }

    #[test]
    fn test_case_variants_collapse_before_compilation() {
        let d = dict(&[
            ("PERSON_001", "InnokenTii"),
            ("PERSON_002", "innokentii"),
        ]);
        let replacer = Replacer::for_anonymization(&d);
        // A lowercase span lower-cases the emitted token; the applied-rule
        // report still carries the canonical token spelling.
        let (out, applied) = replacer.replace_all("innokentii waved");
        assert_eq!(out, "person_001 waved");
        assert_eq!(applied.len(), 1);
        assert!(applied.contains_key("PERSON_001"));
    }
}
