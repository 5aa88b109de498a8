//! Rule-based seed detector.
//!
//! Matches a fixed table of known originals plus a few identifier patterns
//! (emails, phone numbers, SSNs). Deterministic and zero-latency, used in
//! tests and as a fallback when no model-backed detector is configured.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::Detector;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
});
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap()
});
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

/// Per-category counters for pattern-generated tokens. Numbering starts at
/// 100 so generated tokens never collide with the seed table's _001 range.
#[derive(Debug)]
struct Counters {
    email: u32,
    phone: u32,
    ssn: u32,
}

/// One table rule with its precompiled whole-word matcher.
struct SeedEntry {
    original: String,
    token: String,
    pattern: Regex,
}

pub struct SeedDetector {
    table: Vec<SeedEntry>,
    counters: Mutex<Counters>,
}

impl SeedDetector {
    /// Detector over the built-in seed table.
    pub fn new() -> Self {
        Self::with_table(default_seed_table())
    }

    /// Detector over a caller-supplied `original -> token` table.
    ///
    /// Each original is compiled to a case-insensitive whole-word pattern so
    /// "John" never fires inside "Johnson". Entries that fail to compile are
    /// dropped with a warning.
    pub fn with_table(table: Vec<(String, String)>) -> Self {
        let table = table
            .into_iter()
            .filter_map(|(original, token)| {
                match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&original))) {
                    Ok(pattern) => Some(SeedEntry {
                        original,
                        token,
                        pattern,
                    }),
                    Err(e) => {
                        warn!("Dropping unusable seed entry '{}': {}", original, e);
                        None
                    }
                }
            })
            .collect();
        Self {
            table,
            counters: Mutex::new(Counters {
                email: 100,
                phone: 100,
                ssn: 100,
            }),
        }
    }

    fn next_token(&self, prefix: &str, dict: &HashMap<String, String>) -> String {
        let mut counters = self.counters.lock().unwrap();
        loop {
            let n = match prefix {
                "EMAIL" => {
                    let n = counters.email;
                    counters.email += 1;
                    n
                }
                "PHONE" => {
                    let n = counters.phone;
                    counters.phone += 1;
                    n
                }
                _ => {
                    let n = counters.ssn;
                    counters.ssn += 1;
                    n
                }
            };
            let token = format!("{}_{}", prefix, n);
            if !dict.contains_key(&token) {
                return token;
            }
        }
    }

    fn scan_pattern(
        &self,
        re: &Regex,
        prefix: &str,
        text: &str,
        current_dict: &HashMap<String, String>,
        found: &mut HashMap<String, String>,
    ) {
        for m in re.find_iter(text) {
            let original = m.as_str().to_string();
            let known = current_dict.values().any(|o| *o == original)
                || found.contains_key(&original);
            if !known {
                let token = self.next_token(prefix, current_dict);
                found.insert(original, token);
            }
        }
    }
}

impl Default for SeedDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for SeedDetector {
    fn name(&self) -> &'static str {
        "seed"
    }

    async fn detect(
        &self,
        _cancel: &CancellationToken,
        text: &str,
        current_dict: &HashMap<String, String>,
    ) -> anyhow::Result<HashMap<String, String>> {
        let mut found = HashMap::new();

        for entry in &self.table {
            if !entry.pattern.is_match(text) {
                continue;
            }
            // Skip entities that already have a token in this conversation.
            let already_known = current_dict
                .values()
                .any(|o| o.eq_ignore_ascii_case(&entry.original));
            if already_known || current_dict.contains_key(&entry.token) {
                continue;
            }
            found.insert(entry.original.clone(), entry.token.clone());
        }

        self.scan_pattern(&SSN_RE, "SSN", text, current_dict, &mut found);
        self.scan_pattern(&EMAIL_RE, "EMAIL", text, current_dict, &mut found);
        self.scan_pattern(&PHONE_RE, "PHONE", text, current_dict, &mut found);

        Ok(found)
    }
}

/// Built-in seed mappings. Longer entries come first so multi-word names
/// keep their own token instead of decomposing.
fn default_seed_table() -> Vec<(String, String)> {
    [
        ("John Smith", "PERSON_001"),
        ("Jane Doe", "PERSON_002"),
        ("John", "PERSON_003"),
        ("Jane", "PERSON_004"),
        ("Acme Corp", "COMPANY_001"),
        ("OpenAI", "COMPANY_002"),
        ("New York", "LOCATION_001"),
        ("San Francisco", "LOCATION_002"),
    ]
    .into_iter()
    .map(|(o, t)| (o.to_string(), t.to_string()))
    .collect()
}
