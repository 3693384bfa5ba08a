use rusqlite::Connection;
#[cfg(test)]
use rusqlite::{OptionalExtension, params};

use crate::error::{ObsmemError, Result};

use super::SqliteStateStore;

const MIGRATION_SCHEMA_SQL: &str = r"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS om_generations (
        id TEXT PRIMARY KEY,
        scope TEXT NOT NULL CHECK(scope IN ('thread', 'resource')),
        scope_key TEXT NOT NULL,
        thread_id TEXT,
        resource_id TEXT NOT NULL,
        generation_count INTEGER NOT NULL,
        previous_generation_id TEXT,
        origin_type TEXT NOT NULL CHECK(origin_type IN ('observation', 'reflection')),
        active_observations TEXT NOT NULL DEFAULT '',
        observation_token_count INTEGER NOT NULL DEFAULT 0,
        patterns_json TEXT NOT NULL DEFAULT '{}',
        observed_message_ids_json TEXT NOT NULL DEFAULT '[]',
        last_observed_at_ms INTEGER,
        pending_message_tokens INTEGER NOT NULL DEFAULT 0,
        buffered_observations TEXT,
        buffered_message_ids_json TEXT NOT NULL DEFAULT '[]',
        buffering_message_ids_json TEXT NOT NULL DEFAULT '[]',
        buffered_reflection TEXT,
        is_observing INTEGER NOT NULL DEFAULT 0,
        is_reflecting INTEGER NOT NULL DEFAULT 0,
        suggested_continuation TEXT,
        reflection_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(scope_key, generation_count)
    );

    CREATE TABLE IF NOT EXISTS om_messages (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL,
        resource_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at_ms INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS om_threads (
        thread_id TEXT PRIMARY KEY,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_om_generations_scope_generation
    ON om_generations(scope_key, generation_count DESC);
    CREATE INDEX IF NOT EXISTS idx_om_messages_thread_created
    ON om_messages(thread_id, created_at_ms);
    CREATE INDEX IF NOT EXISTS idx_om_messages_resource_created
    ON om_messages(resource_id, created_at_ms);
";

impl SqliteStateStore {
    pub fn migrate(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ObsmemError::mutex_poisoned("sqlite"))?;
        conn.execute_batch(MIGRATION_SCHEMA_SQL)?;
        ensure_required_column(
            &conn,
            "om_generations",
            "patterns_json",
            "unsupported om_generations schema: patterns_json is missing; reset state database",
        )?;
        ensure_required_column(
            &conn,
            "om_generations",
            "last_observed_at_ms",
            "unsupported om_generations schema: last_observed_at_ms is missing; reset state database",
        )?;
        ensure_required_column(
            &conn,
            "om_messages",
            "created_at_ms",
            "unsupported om_messages schema: created_at_ms is missing; reset state database",
        )?;
        drop(conn);
        Ok(())
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for row in rows {
        if row? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
pub(super) fn has_table(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
            params![table],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

fn ensure_required_column(
    conn: &Connection,
    table: &str,
    column: &str,
    error_message: &'static str,
) -> Result<()> {
    if has_column(conn, table, column)? {
        Ok(())
    } else {
        Err(ObsmemError::Validation(error_message.to_string()))
    }
}
