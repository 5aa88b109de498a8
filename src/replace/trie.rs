//! Longest-match replacement trie.
//!
//! A char-keyed trie over the patterns of a rule set, scanned left to right.
//! At every position the longest matching pattern wins, so "John Smith" is
//! always preferred over "John" on overlapping spans. Matching is
//! case-insensitive; word-boundary checks stop a pattern from matching
//! inside a larger alphanumeric run ("2" never matches inside "2025").

use std::collections::HashMap;

use super::case::apply_case_pattern;

/// Terminal payload of a trie path.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    /// Text substituted for the matched span.
    pub replacement: String,
    /// The pattern in its canonical spelling, as inserted.
    pub original: String,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    entry: Option<Entry>,
}

/// Case-insensitive longest-match-first replacement index.
#[derive(Debug, Default)]
pub struct ReplacementTrie {
    root: TrieNode,
    len: usize,
}

/// Single-char case fold used for both insertion and matching.
fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

impl ReplacementTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of patterns in the trie.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add a pattern. Empty patterns are rejected as a no-op; re-inserting a
    /// pattern replaces its payload.
    pub fn insert(&mut self, pattern: &str, replacement: &str) {
        if pattern.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for c in pattern.chars().map(fold_char) {
            node = node.children.entry(c).or_default();
        }
        if node.entry.is_none() {
            self.len += 1;
        }
        node.entry = Some(Entry {
            replacement: replacement.to_string(),
            original: pattern.to_string(),
        });
    }

    /// Rewrite `text`, returning the result plus the rules that actually
    /// fired, keyed `replacement -> canonical pattern`.
    ///
    /// With `preserve_case` the replacement's case is derived from each
    /// matched span (see [`apply_case_pattern`]); otherwise replacements are
    /// emitted verbatim.
    pub fn replace_all(
        &self,
        text: &str,
        preserve_case: bool,
    ) -> (String, HashMap<String, String>) {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut applied: HashMap<String, String> = HashMap::new();

        let mut i = 0;
        while i < chars.len() {
            match self.longest_match(&chars, i) {
                Some((len, entry)) => {
                    let matched: String = chars[i..i + len].iter().collect();
                    if preserve_case {
                        out.push_str(&apply_case_pattern(&matched, &entry.replacement));
                    } else {
                        out.push_str(&entry.replacement);
                    }
                    applied.insert(entry.replacement.clone(), entry.original.clone());
                    i += len;
                }
                None => {
                    out.push(chars[i]);
                    i += 1;
                }
            }
        }

        (out, applied)
    }

    /// Longest pattern matching at `start`, honoring word boundaries on both
    /// ends. Returns the match length in chars and its payload.
    fn longest_match(&self, chars: &[char], start: usize) -> Option<(usize, &Entry)> {
        // A match may not begin in the middle of an alphanumeric run.
        if start > 0
            && chars[start - 1].is_ascii_alphanumeric()
            && chars[start].is_ascii_alphanumeric()
        {
            return None;
        }

        let mut node = &self.root;
        let mut best: Option<(usize, &Entry)> = None;
        let mut j = start;

        while j < chars.len() {
            match node.children.get(&fold_char(chars[j])) {
                Some(next) => node = next,
                None => break,
            }
            j += 1;

            if let Some(entry) = node.entry.as_ref() {
                // A match may not end in the middle of an alphanumeric run.
                let boundary_ok = j >= chars.len()
                    || !chars[j].is_ascii_alphanumeric()
                    || !chars[j - 1].is_ascii_alphanumeric();
                if boundary_ok {
                    best = Some((j - start, entry));
                }
            }
        }

        best
    }
}
