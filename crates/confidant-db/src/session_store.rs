use confidant_common::{Error, Message, MessageRole, Result};
use rusqlite::Connection;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::migrations::SESSION_SCHEMA_V1;

/// Session row without its messages.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub mode: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Persistent storage for conversation sessions and message history.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening session store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

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
            .execute_batch(SESSION_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        debug!("session schema v{} ready", SESSION_SCHEMA_V1.version);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the session if it does not exist yet. The title is written only
    /// on creation. Returns `true` when a new row was inserted.
    pub fn create_session_if_absent(
        &self,
        session_id: &str,
        user_id: &str,
        title: &str,
        mode: &str,
    ) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO sessions (id, user_id, title, mode, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![session_id, user_id, title, mode, now],
            )
            .map_err(|e| Error::Database(format!("failed to create session: {e}")))?;
        Ok(inserted > 0)
    }

    pub fn session_owner(&self, session_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT user_id FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load session owner: {e}")))
    }

    pub fn load_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        self.conn
            .query_row(
                "SELECT id, user_id, title, mode, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![session_id],
                read_summary,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load session: {e}")))
    }

    /// Sessions owned by `user_id`, most recently active first.
    pub fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, title, mode, created_at, updated_at
                 FROM sessions
                 WHERE user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare session query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id], read_summary)
            .map_err(|e| Error::Database(format!("failed to list sessions: {e}")))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(
                row.map_err(|e| Error::Database(format!("failed to read session row: {e}")))?,
            );
        }
        Ok(sessions)
    }

    /// Explicit rename. Returns `false` when the session does not exist or
    /// belongs to another user.
    pub fn rename_session(&self, user_id: &str, session_id: &str, title: &str) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE sessions SET title = ?1, updated_at = ?2
                 WHERE id = ?3 AND user_id = ?4",
                params![title, chrono::Utc::now().to_rfc3339(), session_id, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to rename session: {e}")))?;
        Ok(updated > 0)
    }

    pub fn delete_session(&self, user_id: &str, session_id: &str) -> Result<bool> {
        let owner = self.session_owner(session_id)?;
        if owner.as_deref() != Some(user_id) {
            return Ok(false);
        }
        self.conn
            .execute(
                "DELETE FROM messages WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete messages: {e}")))?;
        let deleted = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(|e| Error::Database(format!("failed to delete session: {e}")))?;
        Ok(deleted > 0)
    }

    /// Delete every session owned by `user_id`. Returns the number removed.
    pub fn delete_all_sessions(&self, user_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM messages WHERE session_id IN
                    (SELECT id FROM sessions WHERE user_id = ?1)",
                params![user_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete messages: {e}")))?;
        self.conn
            .execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])
            .map_err(|e| Error::Database(format!("failed to delete sessions: {e}")))
    }

    /// Append a single message to a session.
    pub fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO messages (id, session_id, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message_id,
                    session_id,
                    role.as_str(),
                    content,
                    timestamp.to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;

        self.conn
            .execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                params![timestamp.to_rfc3339(), session_id],
            )
            .map_err(|e| Error::Database(format!("failed to touch session: {e}")))?;
        Ok(())
    }

    /// Load recent messages for a session in chronological order.
    pub fn load_recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT role, content, timestamp
                 FROM messages
                 WHERE session_id = ?1
                 ORDER BY rowid DESC
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![session_id, limit as i64], read_message)
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(
                row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?,
            );
        }

        // Query is DESC for efficient tail fetch; return in chronological order.
        messages.reverse();
        Ok(messages)
    }

    /// Full history of a session in chronological order.
    pub fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT role, content, timestamp
                 FROM messages
                 WHERE session_id = ?1
                 ORDER BY rowid ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![session_id], read_message)
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(
                row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?,
            );
        }
        Ok(messages)
    }
}

fn read_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionSummary> {
    let created_raw: String = row.get(4)?;
    let updated_raw: String = row.get(5)?;
    Ok(SessionSummary {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        mode: row.get(3)?,
        created_at: parse_timestamp(&created_raw),
        updated_at: parse_timestamp(&updated_raw),
    })
}

fn read_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_raw: String = row.get(0)?;
    let timestamp_raw: String = row.get(2)?;
    Ok(Message {
        role: MessageRole::from_stored(&role_raw),
        content: row.get(1)?,
        timestamp: parse_timestamp(&timestamp_raw),
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            warn!("failed to parse stored timestamp '{raw}': {e}");
            chrono::Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_is_create_once() {
        let store = SessionStore::in_memory().expect("failed to create in-memory store");
        assert!(
            store
                .create_session_if_absent("s1", "asha", "Chat - hello", "chat")
                .expect("create")
        );
        assert!(
            !store
                .create_session_if_absent("s1", "asha", "Chat - different", "chat")
                .expect("create again")
        );

        let session = store.load_session("s1").expect("load").expect("exists");
        assert_eq!(session.title, "Chat - hello");
    }

    #[test]
    fn rename_requires_owner() {
        let store = SessionStore::in_memory().expect("failed to create in-memory store");
        store
            .create_session_if_absent("s1", "asha", "Chat - hi", "chat")
            .expect("create");

        assert!(!store.rename_session("ravi", "s1", "Stolen").expect("rename"));
        assert!(store.rename_session("asha", "s1", "Trip plans").expect("rename"));
        let session = store.load_session("s1").expect("load").expect("exists");
        assert_eq!(session.title, "Trip plans");
    }

    #[test]
    fn recent_messages_are_chronological_and_bounded() {
        let store = SessionStore::in_memory().expect("failed to create in-memory store");
        store
            .create_session_if_absent("s1", "asha", "Chat", "chat")
            .expect("create");
        for i in 0..5 {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            store
                .append_message("s1", role, &format!("m{i}"), chrono::Utc::now())
                .expect("append");
        }

        let recent = store.load_recent_messages("s1", 3).expect("load");
        let texts: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert_eq!(recent[0].role, MessageRole::User);
        assert_eq!(store.load_messages("s1").expect("all").len(), 5);
    }

    #[test]
    fn list_sessions_is_scoped_to_owner() {
        let store = SessionStore::in_memory().expect("failed to create in-memory store");
        store
            .create_session_if_absent("a1", "asha", "Chat - a", "chat")
            .expect("create");
        store
            .create_session_if_absent("b1", "ravi", "Chat - b", "chat")
            .expect("create");

        let sessions = store.list_sessions("asha").expect("list");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "a1");
    }

    #[test]
    fn delete_session_removes_messages() {
        let store = SessionStore::in_memory().expect("failed to create in-memory store");
        store
            .create_session_if_absent("s1", "asha", "Chat", "chat")
            .expect("create");
        store
            .append_message("s1", MessageRole::User, "hi", chrono::Utc::now())
            .expect("append");

        assert!(!store.delete_session("ravi", "s1").expect("delete"));
        assert!(store.delete_session("asha", "s1").expect("delete"));
        assert!(store.load_session("s1").expect("load").is_none());
        assert!(store.load_messages("s1").expect("messages").is_empty());
    }

    #[test]
    fn delete_all_sessions_only_touches_owner() {
        let store = SessionStore::in_memory().expect("failed to create in-memory store");
        store
            .create_session_if_absent("a1", "asha", "Chat", "chat")
            .expect("create");
        store
            .create_session_if_absent("a2", "asha", "Chat", "chat")
            .expect("create");
        store
            .create_session_if_absent("b1", "ravi", "Chat", "chat")
            .expect("create");

        assert_eq!(store.delete_all_sessions("asha").expect("delete"), 2);
        assert_eq!(store.list_sessions("ravi").expect("list").len(), 1);
    }
}
