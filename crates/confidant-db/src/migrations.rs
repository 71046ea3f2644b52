/// A versioned schema block applied with `execute_batch`.
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

pub const SESSION_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            mode TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id, updated_at);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, timestamp);",
};

pub const PROFILE_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            custom_instruction TEXT,
            elevated INTEGER NOT NULL DEFAULT 0,
            suspended INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_facts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            text TEXT NOT NULL,
            normalized TEXT NOT NULL,
            source_session TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(user_id, normalized)
        );

        CREATE INDEX IF NOT EXISTS idx_memory_facts_user
            ON memory_facts(user_id, created_at);

        CREATE TABLE IF NOT EXISTS tool_usage (
            mode TEXT PRIMARY KEY,
            count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS error_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            context TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS feedback (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            category TEXT NOT NULL,
            comment TEXT,
            created_at TEXT NOT NULL
        );",
};

pub const VECTOR_SCHEMA_V1: Migration = Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS fact_vectors (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            text TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            embedding BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fact_vectors_owner
            ON fact_vectors(owner_id);",
};
