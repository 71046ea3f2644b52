use confidant_common::{Error, Result};
use ring::digest::{SHA256, digest};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::migrations::PROFILE_SCHEMA_V1;
use crate::session_store::parse_timestamp;

/// Account owner as seen by the assistant core.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub custom_instruction: Option<String>,
    pub elevated: bool,
    pub suspended: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A durable fact about a user, as stored in the authoritative list.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryFact {
    pub id: String,
    pub owner_id: String,
    pub text: String,
    pub source_session: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub enum FactInsert {
    Inserted(MemoryFact),
    /// A fact with the same normalized text already exists for this owner.
    Duplicate,
}

/// A rating left on one assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackEntry {
    pub message_id: String,
    pub kind: String,
    pub category: String,
    pub comment: Option<String>,
}

/// Users, their memory facts, usage counters, reply feedback and the error log.
pub struct ProfileStore {
    conn: Connection,
}

impl ProfileStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening profile store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open profile database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(PROFILE_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("profile migration failed: {e}")))?;
        debug!("profile schema v{} ready", PROFILE_SCHEMA_V1.version);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Load the user, creating the row on first sight.
    pub fn ensure_user(&self, user_id: &str, display_name: &str) -> Result<UserProfile> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO users (id, display_name, created_at)
                 VALUES (?1, ?2, ?3)",
                params![user_id, display_name, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to create user: {e}")))?;

        self.load_user(user_id)?
            .ok_or_else(|| Error::Database(format!("user '{user_id}' missing after insert")))
    }

    pub fn load_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.conn
            .query_row(
                "SELECT id, display_name, custom_instruction, elevated, suspended, created_at
                 FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    let created_raw: String = row.get(5)?;
                    Ok(UserProfile {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        custom_instruction: row.get(2)?,
                        elevated: row.get::<_, i64>(3)? != 0,
                        suspended: row.get::<_, i64>(4)? != 0,
                        created_at: parse_timestamp(&created_raw),
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load user: {e}")))
    }

    pub fn set_display_name(&self, user_id: &str, display_name: &str) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE users SET display_name = ?1 WHERE id = ?2",
                params![display_name, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to update display name: {e}")))?;
        Ok(updated > 0)
    }

    /// Store the persona override. Blank input clears it.
    pub fn set_custom_instruction(&self, user_id: &str, instruction: &str) -> Result<bool> {
        let value = Some(instruction.trim()).filter(|s| !s.is_empty());
        let updated = self
            .conn
            .execute(
                "UPDATE users SET custom_instruction = ?1 WHERE id = ?2",
                params![value, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to update instruction: {e}")))?;
        Ok(updated > 0)
    }

    pub fn set_flags(&self, user_id: &str, elevated: bool, suspended: bool) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE users SET elevated = ?1, suspended = ?2 WHERE id = ?3",
                params![elevated as i64, suspended as i64, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to update user flags: {e}")))?;
        Ok(updated > 0)
    }

    /// Append a fact unless an identical normalized fact already exists for
    /// the owner.
    pub fn insert_fact(
        &self,
        owner_id: &str,
        text: &str,
        source_session: Option<&str>,
    ) -> Result<FactInsert> {
        let normalized = normalize_fact(text);
        if normalized.is_empty() {
            return Ok(FactInsert::Duplicate);
        }
        let id = fact_vector_id(owner_id, text);
        let created_at = chrono::Utc::now();
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO memory_facts
                    (id, user_id, text, normalized, source_session, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    owner_id,
                    text.trim(),
                    normalized,
                    source_session,
                    created_at.to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert memory fact: {e}")))?;

        if inserted == 0 {
            return Ok(FactInsert::Duplicate);
        }
        Ok(FactInsert::Inserted(MemoryFact {
            id,
            owner_id: owner_id.to_string(),
            text: text.trim().to_string(),
            source_session: source_session.map(str::to_string),
            created_at,
        }))
    }

    /// All facts for the owner, newest first.
    pub fn list_facts(&self, owner_id: &str) -> Result<Vec<MemoryFact>> {
        self.query_facts(owner_id, None)
    }

    /// The `limit` most recent facts for the owner, newest first.
    pub fn recent_facts(&self, owner_id: &str, limit: usize) -> Result<Vec<MemoryFact>> {
        self.query_facts(owner_id, Some(limit))
    }

    /// Delete by fact text. Returns the deterministic id when a row was removed.
    pub fn delete_fact(&self, owner_id: &str, text: &str) -> Result<Option<String>> {
        let id = fact_vector_id(owner_id, text);
        if self.delete_fact_by_id(owner_id, &id)? {
            Ok(Some(id))
        } else {
            Ok(None)
        }
    }

    pub fn delete_fact_by_id(&self, owner_id: &str, fact_id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM memory_facts WHERE id = ?1 AND user_id = ?2",
                params![fact_id, owner_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete memory fact: {e}")))?;
        Ok(deleted > 0)
    }

    pub fn increment_usage(&self, mode: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tool_usage (mode, count) VALUES (?1, 1)
                 ON CONFLICT(mode) DO UPDATE SET count = count + 1",
                params![mode],
            )
            .map_err(|e| Error::Database(format!("failed to record usage: {e}")))?;
        Ok(())
    }

    pub fn usage_counts(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT mode, count FROM tool_usage ORDER BY count DESC, mode ASC")
            .map_err(|e| Error::Database(format!("failed to prepare usage query: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))
            .map_err(|e| Error::Database(format!("failed to load usage: {e}")))?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row.map_err(|e| Error::Database(format!("failed to read usage row: {e}")))?);
        }
        Ok(counts)
    }

    pub fn log_error(&self, context: &str, message: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO error_log (context, message, created_at) VALUES (?1, ?2, ?3)",
                params![context, message, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to write error log: {e}")))?;
        Ok(())
    }

    pub fn record_feedback(&self, user_id: &str, entry: &FeedbackEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO feedback (user_id, message_id, kind, category, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user_id,
                    entry.message_id,
                    entry.kind,
                    entry.category,
                    entry.comment,
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to record feedback: {e}")))?;
        debug!("feedback '{}' recorded for message {}", entry.kind, entry.message_id);
        Ok(())
    }

    /// Feedback left by one user, oldest first.
    pub fn list_feedback(&self, user_id: &str) -> Result<Vec<FeedbackEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT message_id, kind, category, comment FROM feedback
                 WHERE user_id = ?1 ORDER BY id ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare feedback query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(FeedbackEntry {
                    message_id: row.get(0)?,
                    kind: row.get(1)?,
                    category: row.get(2)?,
                    comment: row.get(3)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to load feedback: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(
                row.map_err(|e| Error::Database(format!("failed to read feedback row: {e}")))?,
            );
        }
        Ok(entries)
    }

    fn query_facts(&self, owner_id: &str, limit: Option<usize>) -> Result<Vec<MemoryFact>> {
        let limit = limit.map_or(-1, |l| l as i64);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, text, source_session, created_at
                 FROM memory_facts
                 WHERE user_id = ?1
                 ORDER BY rowid DESC
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare fact query: {e}")))?;

        let rows = stmt
            .query_map(params![owner_id, limit], |row| {
                let created_raw: String = row.get(4)?;
                Ok(MemoryFact {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    text: row.get(2)?,
                    source_session: row.get(3)?,
                    created_at: parse_timestamp(&created_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to load facts: {e}")))?;

        let mut facts = Vec::new();
        for row in rows {
            facts.push(row.map_err(|e| Error::Database(format!("failed to read fact row: {e}")))?);
        }
        Ok(facts)
    }
}

/// Case and whitespace insensitive form used for duplicate detection.
pub fn normalize_fact(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase()
}

/// Deterministic id shared by the fact row and its vector index entry.
pub fn fact_vector_id(owner_id: &str, text: &str) -> String {
    let hash = digest(&SHA256, normalize_fact(text).as_bytes());
    let hex: String = hash.as_ref()[..16]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{owner_id}_{hex}")
}
