//! Privacy-preserving agent pipeline.
//!
//! Sits between a tool-using agent and its completion provider: outbound
//! messages are anonymized with a per-conversation replacement dictionary
//! before they reach the provider, and replies are de-anonymized on the way
//! back. Detection is pluggable (rule-based, remote model, or local model),
//! dictionaries persist in SQLite, and anonymization work runs on a
//! priority executor so interactive requests stay responsive.

pub mod agent;
pub mod anonymizer;
pub mod detector;
pub mod errors;
pub mod executor;
pub mod fingerprint;
pub mod messages;
pub mod provider;
pub mod replace;
pub mod service;
pub mod store;
