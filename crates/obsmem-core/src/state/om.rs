use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Map, Value};

use crate::error::{ObsmemError, Result};
use crate::om::{
    ActiveObservationsUpdate, OmMessage, OmOriginType, OmRecord, OmRecordInit, OmRecordKey,
    OmRecordMetadata, OmScope, OmStore, ReflectionGenerationInput, THREAD_METADATA_NAMESPACE,
    ThreadOmMetadata, advance_watermark, truncate_to_millis,
};
use crate::om::store::{
    append_unique_ids, empty_generation, next_reflection_generation, read_namespaced_metadata,
    write_namespaced_metadata,
};

use super::SqliteStateStore;

mod helpers;
use helpers::{
    bool_to_i64, datetime_to_millis, i64_to_u32_saturating, invalid_text, millis_to_datetime,
    parse_json_column, parse_required_rfc3339, usize_to_i64_saturating,
};

const GENERATION_COLUMNS: &str = r"
    id, scope, scope_key, thread_id, resource_id,
    generation_count, previous_generation_id, origin_type,
    active_observations, observation_token_count, patterns_json,
    observed_message_ids_json, last_observed_at_ms, pending_message_tokens,
    buffered_observations, buffered_message_ids_json, buffering_message_ids_json,
    buffered_reflection, is_observing, is_reflecting,
    suggested_continuation, reflection_count, created_at, updated_at
";

fn generation_from_row(row: &Row<'_>) -> rusqlite::Result<OmRecord> {
    let scope_raw = row.get::<_, String>(1)?;
    let scope = OmScope::parse(&scope_raw)
        .ok_or_else(|| invalid_text(1, format!("invalid om scope: {scope_raw}")))?;
    let origin_raw = row.get::<_, String>(7)?;
    let origin_type = OmOriginType::parse(&origin_raw)
        .ok_or_else(|| invalid_text(7, format!("invalid om origin_type: {origin_raw}")))?;
    let last_observed_at = row
        .get::<_, Option<i64>>(12)?
        .map(|millis| millis_to_datetime(12, millis))
        .transpose()?;
    let created_at_raw = row.get::<_, String>(22)?;
    let updated_at_raw = row.get::<_, String>(23)?;

    Ok(OmRecord {
        id: row.get(0)?,
        scope,
        scope_key: row.get(2)?,
        thread_id: row.get(3)?,
        resource_id: row.get(4)?,
        generation_count: i64_to_u32_saturating(row.get::<_, i64>(5)?),
        previous_generation_id: row.get(6)?,
        origin_type,
        active_observations: row.get(8)?,
        observation_token_count: i64_to_u32_saturating(row.get::<_, i64>(9)?),
        patterns: parse_json_column(10, &row.get::<_, String>(10)?)?,
        observed_message_ids: parse_json_column(11, &row.get::<_, String>(11)?)?,
        last_observed_at,
        pending_message_tokens: i64_to_u32_saturating(row.get::<_, i64>(13)?),
        buffered_observations: row.get(14)?,
        buffered_message_ids: parse_json_column(15, &row.get::<_, String>(15)?)?,
        buffering_message_ids: parse_json_column(16, &row.get::<_, String>(16)?)?,
        buffered_reflection: row.get(17)?,
        is_observing: row.get::<_, i64>(18)? != 0,
        is_reflecting: row.get::<_, i64>(19)? != 0,
        suggested_continuation: row.get(20)?,
        metadata: OmRecordMetadata {
            reflection_count: i64_to_u32_saturating(row.get::<_, i64>(21)?),
        },
        created_at: parse_required_rfc3339(22, &created_at_raw)?,
        updated_at: parse_required_rfc3339(23, &updated_at_raw)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<OmMessage> {
    Ok(OmMessage {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        resource_id: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        created_at: millis_to_datetime(5, row.get::<_, i64>(5)?)?,
    })
}

fn insert_generation(conn: &Connection, record: &OmRecord) -> Result<usize> {
    let affected = conn.execute(
        r"
        INSERT OR IGNORE INTO om_generations(
            id, scope, scope_key, thread_id, resource_id,
            generation_count, previous_generation_id, origin_type,
            active_observations, observation_token_count, patterns_json,
            observed_message_ids_json, last_observed_at_ms, pending_message_tokens,
            buffered_observations, buffered_message_ids_json, buffering_message_ids_json,
            buffered_reflection, is_observing, is_reflecting,
            suggested_continuation, reflection_count, created_at, updated_at
        )
        VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8,
            ?9, ?10, ?11,
            ?12, ?13, ?14,
            ?15, ?16, ?17,
            ?18, ?19, ?20,
            ?21, ?22, ?23, ?24
        )
        ",
        params![
            record.id,
            record.scope.as_str(),
            record.scope_key,
            record.thread_id,
            record.resource_id,
            i64::from(record.generation_count),
            record.previous_generation_id,
            record.origin_type.as_str(),
            record.active_observations,
            i64::from(record.observation_token_count),
            serde_json::to_string(&record.patterns)?,
            serde_json::to_string(&record.observed_message_ids)?,
            record.last_observed_at.map(datetime_to_millis),
            i64::from(record.pending_message_tokens),
            record.buffered_observations,
            serde_json::to_string(&record.buffered_message_ids)?,
            serde_json::to_string(&record.buffering_message_ids)?,
            record.buffered_reflection,
            bool_to_i64(record.is_observing),
            bool_to_i64(record.is_reflecting),
            record.suggested_continuation,
            i64::from(record.metadata.reflection_count),
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(affected)
}

fn latest_generation(conn: &Connection, scope_key: &str) -> Result<Option<OmRecord>> {
    let sql = format!(
        "SELECT {GENERATION_COLUMNS} FROM om_generations
         WHERE scope_key = ?1
         ORDER BY generation_count DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![scope_key], generation_from_row)
        .optional()?)
}

fn generation_by_id(conn: &Connection, record_id: &str) -> Result<Option<OmRecord>> {
    let sql = format!("SELECT {GENERATION_COLUMNS} FROM om_generations WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![record_id], generation_from_row)
        .optional()?)
}

fn require_generation(conn: &Connection, record_id: &str) -> Result<OmRecord> {
    generation_by_id(conn, record_id)?
        .ok_or_else(|| ObsmemError::NotFound(format!("om generation {record_id}")))
}

fn thread_metadata_bag(conn: &Connection, thread_id: &str) -> Result<Option<Map<String, Value>>> {
    let raw = conn
        .query_row(
            "SELECT metadata_json FROM om_threads WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    raw.map(|raw| serde_json::from_str::<Map<String, Value>>(&raw))
        .transpose()
        .map_err(Into::into)
}

fn store_thread_metadata_bag(
    conn: &Connection,
    thread_id: &str,
    bag: &Map<String, Value>,
) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO om_threads(thread_id, metadata_json, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(thread_id) DO UPDATE SET
            metadata_json = excluded.metadata_json,
            updated_at = excluded.updated_at
        ",
        params![thread_id, serde_json::to_string(bag)?, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

impl SqliteStateStore {
    fn swap_flag(&self, record_id: &str, column: &str, value: bool) -> Result<bool> {
        self.with_tx(|tx| {
            let affected = tx.execute(
                &format!(
                    "UPDATE om_generations SET {column} = ?2, updated_at = ?3
                     WHERE id = ?1 AND {column} != ?2"
                ),
                params![record_id, bool_to_i64(value), Utc::now().to_rfc3339()],
            )?;
            if affected == 0 {
                require_generation(tx, record_id)?;
            }
            Ok(affected > 0)
        })
    }

    /// Writes a value into another consumer's namespace of the thread's
    /// metadata bag.
    pub fn put_thread_metadata_value(
        &self,
        thread_id: &str,
        namespace: &str,
        value: Value,
    ) -> Result<()> {
        self.with_tx(|tx| {
            let mut bag = thread_metadata_bag(tx, thread_id)?.unwrap_or_default();
            bag.insert(namespace.to_string(), value);
            store_thread_metadata_bag(tx, thread_id, &bag)
        })
    }

    pub fn thread_metadata_bag(&self, thread_id: &str) -> Result<Map<String, Value>> {
        self.with_conn(|conn| Ok(thread_metadata_bag(conn, thread_id)?.unwrap_or_default()))
    }
}

impl OmStore for SqliteStateStore {
    fn get_latest_generation(&self, key: &OmRecordKey) -> Result<Option<OmRecord>> {
        self.with_conn(|conn| latest_generation(conn, &key.scope_key()))
    }

    fn get_generation(&self, record_id: &str) -> Result<Option<OmRecord>> {
        self.with_conn(|conn| generation_by_id(conn, record_id))
    }

    fn initialize_generation(&self, key: &OmRecordKey, init: OmRecordInit) -> Result<OmRecord> {
        let scope_key = key.scope_key();
        self.with_tx(|tx| {
            if let Some(existing) = latest_generation(tx, &scope_key)? {
                return Ok(existing);
            }
            insert_generation(tx, &empty_generation(key, init, Utc::now()))?;
            latest_generation(tx, &scope_key)?.ok_or_else(|| {
                ObsmemError::Internal(format!("om generation missing after insert: {scope_key}"))
            })
        })
    }

    fn update_active_observations(
        &self,
        record_id: &str,
        update: ActiveObservationsUpdate,
    ) -> Result<OmRecord> {
        self.with_tx(|tx| {
            let current = require_generation(tx, record_id)?;
            let mut observed_ids = current.observed_message_ids;
            append_unique_ids(&mut observed_ids, &update.observed_message_ids);
            let watermark = advance_watermark(current.last_observed_at, update.last_observed_at);
            tx.execute(
                r"
                UPDATE om_generations
                SET active_observations = ?2,
                    observation_token_count = ?3,
                    patterns_json = ?4,
                    observed_message_ids_json = ?5,
                    last_observed_at_ms = ?6,
                    pending_message_tokens = ?7,
                    updated_at = ?8
                WHERE id = ?1
                ",
                params![
                    record_id,
                    update.active_observations,
                    i64::from(update.observation_token_count),
                    serde_json::to_string(&update.patterns)?,
                    serde_json::to_string(&observed_ids)?,
                    watermark.map(datetime_to_millis),
                    i64::from(update.pending_message_tokens),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            require_generation(tx, record_id)
        })
    }

    fn set_pending_message_tokens(&self, record_id: &str, tokens: u32) -> Result<()> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE om_generations SET pending_message_tokens = ?2, updated_at = ?3 WHERE id = ?1",
                params![record_id, i64::from(tokens), Utc::now().to_rfc3339()],
            )?;
            if affected == 0 {
                return Err(ObsmemError::NotFound(format!("om generation {record_id}")));
            }
            Ok(())
        })
    }

    fn create_reflection_generation(
        &self,
        previous: &OmRecord,
        input: ReflectionGenerationInput,
    ) -> Result<OmRecord> {
        self.with_tx(|tx| {
            let current = latest_generation(tx, &previous.scope_key)?;
            if current.as_ref().map(|record| record.id.as_str()) != Some(previous.id.as_str()) {
                return Err(ObsmemError::Conflict(format!(
                    "om generation {} is no longer current for {}",
                    previous.id, previous.scope_key
                )));
            }
            let stored_previous = require_generation(tx, &previous.id)?;
            let now = Utc::now();
            tx.execute(
                r"
                UPDATE om_generations
                SET is_observing = 0, is_reflecting = 0, updated_at = ?2
                WHERE id = ?1
                ",
                params![previous.id, now.to_rfc3339()],
            )?;
            let next = next_reflection_generation(&stored_previous, input, now);
            if insert_generation(tx, &next)? == 0 {
                return Err(ObsmemError::Conflict(format!(
                    "om generation {} already superseded",
                    previous.id
                )));
            }
            Ok(next)
        })
    }

    fn try_set_observing_flag(&self, record_id: &str, value: bool) -> Result<bool> {
        self.swap_flag(record_id, "is_observing", value)
    }

    fn try_set_reflecting_flag(&self, record_id: &str, value: bool) -> Result<bool> {
        self.swap_flag(record_id, "is_reflecting", value)
    }

    fn save_messages(&self, messages: &[OmMessage]) -> Result<()> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                r"
                INSERT INTO om_messages(id, thread_id, resource_id, role, content, created_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    thread_id = excluded.thread_id,
                    resource_id = excluded.resource_id,
                    role = excluded.role,
                    content = excluded.content,
                    created_at_ms = excluded.created_at_ms
                ",
            )?;
            for message in messages {
                stmt.execute(params![
                    message.id,
                    message.thread_id,
                    message.resource_id,
                    message.role,
                    message.content,
                    datetime_to_millis(truncate_to_millis(message.created_at)),
                ])?;
            }
            Ok(())
        })
    }

    fn list_messages_since(
        &self,
        key: &OmRecordKey,
        start: Option<DateTime<Utc>>,
    ) -> Result<Vec<OmMessage>> {
        let start_ms = start.map_or(i64::MIN, datetime_to_millis);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT id, thread_id, resource_id, role, content, created_at_ms
                FROM om_messages
                WHERE resource_id = ?1
                  AND (?2 IS NULL OR thread_id = ?2)
                  AND created_at_ms >= ?3
                ORDER BY created_at_ms ASC, id ASC
                ",
            )?;
            let rows = stmt.query_map(
                params![key.resource_id, key.thread_id, start_ms],
                message_from_row,
            )?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn list_resource_threads(&self, resource_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT thread_id FROM om_messages WHERE resource_id = ?1 ORDER BY thread_id ASC",
            )?;
            let rows = stmt.query_map(params![resource_id], |row| row.get::<_, String>(0))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn get_thread_metadata(&self, thread_id: &str) -> Result<Option<ThreadOmMetadata>> {
        self.with_conn(|conn| match thread_metadata_bag(conn, thread_id)? {
            Some(bag) => read_namespaced_metadata(&bag),
            None => Ok(None),
        })
    }

    fn set_thread_metadata(&self, thread_id: &str, metadata: &ThreadOmMetadata) -> Result<()> {
        self.with_tx(|tx| {
            let mut bag = thread_metadata_bag(tx, thread_id)?.unwrap_or_default();
            write_namespaced_metadata(&mut bag, metadata)?;
            store_thread_metadata_bag(tx, thread_id, &bag)
        })
    }

    fn clear_thread_metadata(&self, thread_id: &str) -> Result<()> {
        self.with_tx(|tx| {
            let Some(mut bag) = thread_metadata_bag(tx, thread_id)? else {
                return Ok(());
            };
            if bag.remove(THREAD_METADATA_NAMESPACE).is_some() {
                store_thread_metadata_bag(tx, thread_id, &bag)?;
            }
            Ok(())
        })
    }

    fn get_history(&self, key: &OmRecordKey, limit: Option<usize>) -> Result<Vec<OmRecord>> {
        let limit = limit.map_or(-1, usize_to_i64_saturating);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GENERATION_COLUMNS} FROM om_generations
                 WHERE scope_key = ?1
                 ORDER BY generation_count DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![key.scope_key(), limit], generation_from_row)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn clear(&self, key: &OmRecordKey) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM om_generations WHERE scope_key = ?1",
                params![key.scope_key()],
            )?;
            Ok(())
        })
    }
}
