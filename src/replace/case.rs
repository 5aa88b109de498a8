//! Case-pattern transfer and rule canonicalization.

use std::collections::HashMap;

/// Derive the replacement's case from the matched span.
///
/// All-uppercase spans upper-case the replacement, all-lowercase spans
/// lower-case it, and anything mixed capitalizes the first letter only. When
/// the span and the replacement have the same number of words the rule is
/// applied word by word, so "Ivan IVANOV" with replacement "pyotr petrov"
/// becomes "Pyotr PETROV".
pub fn apply_case_pattern(matched: &str, replacement: &str) -> String {
    let matched_words: Vec<&str> = matched.split_whitespace().collect();
    let replacement_words: Vec<&str> = replacement.split_whitespace().collect();

    if matched_words.len() > 1 && matched_words.len() == replacement_words.len() {
        return matched_words
            .iter()
            .zip(replacement_words)
            .map(|(m, r)| transfer_word_case(m, r))
            .collect::<Vec<_>>()
            .join(" ");
    }

    transfer_word_case(matched, replacement)
}

fn transfer_word_case(matched: &str, replacement: &str) -> String {
    let letters: Vec<char> = matched.chars().filter(|c| c.is_alphabetic()).collect();

    if !letters.is_empty() && letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if !letters.is_empty() && letters.iter().all(|c| c.is_lowercase()) {
        return replacement.to_lowercase();
    }
    capitalize_first(replacement)
}

/// Upper-case the first char, leave the rest untouched.
fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Collapse case-variant patterns into one canonical rule each.
///
/// Input and output map `pattern -> replacement`. Patterns that are case
/// variants of each other ("innokentii" / "InnokenTii") collapse to the
/// case-folded spelling; the lexicographically smallest replacement in the
/// group is kept so the result is deterministic. Unique patterns keep their
/// spelling as-is.
pub fn merge_rules(rules: &HashMap<String, String>) -> HashMap<String, String> {
    let mut groups: HashMap<String, Vec<(&String, &String)>> = HashMap::new();
    for (pattern, replacement) in rules {
        groups
            .entry(pattern.to_lowercase())
            .or_default()
            .push((pattern, replacement));
    }

    let mut merged = HashMap::with_capacity(groups.len());
    for (folded, mut group) in groups {
        if group.len() == 1 {
            let (pattern, replacement) = group[0];
            merged.insert(pattern.clone(), replacement.clone());
        } else {
            group.sort_by(|a, b| a.1.cmp(b.1));
            merged.insert(folded, group[0].1.clone());
        }
    }
    merged
}
