//! Durable state: per-conversation replacement dictionaries and the set of
//! already-anonymized message fingerprints.

pub mod conversation;

pub use conversation::ConversationStore;
