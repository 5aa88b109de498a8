//! SQLite-backed conversation store.
//!
//! Persists one replacement dictionary per conversation plus the set of
//! message fingerprints already run through the detector. The store is a
//! best-effort durability layer: read failures degrade to "not found" and
//! write failures are logged and swallowed, so a storage hiccup never blocks
//! the anonymization pipeline, only durability suffers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::warn;

/// Thread-safe SQLite conversation store.
///
/// Uses a sync `Mutex<Connection>` because rusqlite's `Connection` is `!Send`.
/// All public methods are synchronous; callers can wrap in `spawn_blocking`
/// or `block_in_place` when needed from async contexts.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// Open (or create) the database at `db_path` and run migrations.
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // Performance pragmas.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;

        Self::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run schema migrations (idempotent).
    fn migrate(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversation_dicts (
                 conversation_id TEXT PRIMARY KEY,
                 dict_json TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS anonymized_messages (
                 conversation_id TEXT NOT NULL,
                 message_hash TEXT NOT NULL,
                 anonymized_at TEXT NOT NULL,
                 PRIMARY KEY (conversation_id, message_hash)
             );

             CREATE INDEX IF NOT EXISTS idx_anonymized_conversation
                 ON anonymized_messages(conversation_id);",
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dictionary operations
    // ------------------------------------------------------------------

    /// Load the dictionary (`token -> original`) for a conversation.
    ///
    /// Absent conversations, empty ids and unreadable rows all yield an
    /// empty map; the pipeline must keep working when the store does not.
    pub fn get_dict(&self, conversation_id: &str) -> HashMap<String, String> {
        if conversation_id.is_empty() {
            return HashMap::new();
        }

        let conn = self.conn.lock().unwrap();
        let dict_json: Option<String> = match conn.query_row(
            "SELECT dict_json FROM conversation_dicts WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        ) {
            Ok(json) => Some(json),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                warn!("Failed to load dict for {}: {}", conversation_id, e);
                None
            }
        };

        match dict_json {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!("Corrupt dict for {}: {}", conversation_id, e);
                HashMap::new()
            }),
            None => HashMap::new(),
        }
    }

    /// Upsert the dictionary for a conversation. No-op for an empty id;
    /// write errors are logged, not returned.
    pub fn save_dict(&self, conversation_id: &str, dict: &HashMap<String, String>) {
        if conversation_id.is_empty() {
            return;
        }

        let dict_json = match serde_json::to_string(dict) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize dict for {}: {}", conversation_id, e);
                return;
            }
        };

        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        if let Err(e) = conn.execute(
            "INSERT INTO conversation_dicts (conversation_id, dict_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(conversation_id)
             DO UPDATE SET dict_json = ?2, updated_at = ?3",
            params![conversation_id, dict_json, now],
        ) {
            warn!("Failed to save dict for {}: {}", conversation_id, e);
        }
    }

    // ------------------------------------------------------------------
    // Fingerprint operations
    // ------------------------------------------------------------------

    /// Whether a message fingerprint was already processed for this
    /// conversation. Read errors count as "no".
    pub fn is_anonymized(&self, conversation_id: &str, message_hash: &str) -> bool {
        if conversation_id.is_empty() {
            return false;
        }

        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM anonymized_messages
             WHERE conversation_id = ?1 AND message_hash = ?2",
            params![conversation_id, message_hash],
            |_| Ok(()),
        )
        .is_ok()
    }

    /// Record a message fingerprint as processed. Idempotent.
    pub fn mark_anonymized(&self, conversation_id: &str, message_hash: &str) {
        if conversation_id.is_empty() {
            return;
        }

        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        if let Err(e) = conn.execute(
            "INSERT OR IGNORE INTO anonymized_messages (conversation_id, message_hash, anonymized_at)
             VALUES (?1, ?2, ?3)",
            params![conversation_id, message_hash, now],
        ) {
            warn!(
                "Failed to mark message anonymized for {}: {}",
                conversation_id, e
            );
        }
    }

    // ------------------------------------------------------------------
    // Conversation lifecycle
    // ------------------------------------------------------------------

    /// Delete a conversation's dictionary and all its fingerprint records in
    /// one transaction.
    pub fn delete_conversation(&self, conversation_id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM anonymized_messages WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.execute(
            "DELETE FROM conversation_dicts WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All conversation ids, most recently updated first.
    pub fn list_conversations(&self) -> Vec<String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT conversation_id FROM conversation_dicts ORDER BY updated_at DESC",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };

        stmt.query_map([], |row| row.get::<_, String>(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }
}
