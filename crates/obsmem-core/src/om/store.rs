//! Storage boundary for generations, messages and per-thread metadata.
//!
//! Flag operations are compare-and-swap: `try_set_*_flag` reports whether the
//! caller actually changed the flag, so a racer that loses learns it directly
//! instead of through a read-then-write window.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::om::model::{
    OmMessage, OmOriginType, OmPatterns, OmRecord, OmRecordKey, OmRecordMetadata,
    THREAD_METADATA_NAMESPACE, ThreadOmMetadata,
};

mod memory;

pub use memory::InMemoryOmStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OmRecordInit {
    pub last_observed_at: Option<DateTime<Utc>>,
}

/// In-place mutation of the current generation after an observation merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveObservationsUpdate {
    pub active_observations: String,
    pub observation_token_count: u32,
    /// Candidate watermark; stores keep the later of this and the stored one.
    pub last_observed_at: Option<DateTime<Utc>>,
    /// Complete pattern set after merging the observer delta.
    pub patterns: OmPatterns,
    /// Appended to `observed_message_ids`, skipping ids already present.
    pub observed_message_ids: Vec<String>,
    pub pending_message_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectionGenerationInput {
    pub active_observations: String,
    pub observation_token_count: u32,
    /// Complete pattern set for the new generation.
    pub patterns: OmPatterns,
    pub suggested_continuation: Option<String>,
}

pub trait OmStore: Send + Sync {
    fn get_latest_generation(&self, key: &OmRecordKey) -> Result<Option<OmRecord>>;

    fn get_generation(&self, record_id: &str) -> Result<Option<OmRecord>>;

    /// Returns the current generation, creating an empty one when the key has
    /// none yet.
    fn initialize_generation(&self, key: &OmRecordKey, init: OmRecordInit) -> Result<OmRecord>;

    fn update_active_observations(
        &self,
        record_id: &str,
        update: ActiveObservationsUpdate,
    ) -> Result<OmRecord>;

    fn set_pending_message_tokens(&self, record_id: &str, tokens: u32) -> Result<()>;

    /// Atomically supersedes `previous`: clears its flags and appends a new
    /// current generation. Fails with `Conflict` when `previous` is no longer
    /// the current generation of its key.
    fn create_reflection_generation(
        &self,
        previous: &OmRecord,
        input: ReflectionGenerationInput,
    ) -> Result<OmRecord>;

    fn try_set_observing_flag(&self, record_id: &str, value: bool) -> Result<bool>;

    fn try_set_reflecting_flag(&self, record_id: &str, value: bool) -> Result<bool>;

    /// Upserts by message id.
    fn save_messages(&self, messages: &[OmMessage]) -> Result<()>;

    /// Messages of the key's thread (or of every thread of the resource)
    /// created at or after `start`, ascending by `created_at`.
    fn list_messages_since(
        &self,
        key: &OmRecordKey,
        start: Option<DateTime<Utc>>,
    ) -> Result<Vec<OmMessage>>;

    /// Thread ids owning at least one message of the resource, sorted.
    fn list_resource_threads(&self, resource_id: &str) -> Result<Vec<String>>;

    fn get_thread_metadata(&self, thread_id: &str) -> Result<Option<ThreadOmMetadata>>;

    /// Replaces the OM namespace of the thread's metadata bag, leaving other
    /// namespaces untouched.
    fn set_thread_metadata(&self, thread_id: &str, metadata: &ThreadOmMetadata) -> Result<()>;

    fn clear_thread_metadata(&self, thread_id: &str) -> Result<()>;

    /// Newest first.
    fn get_history(&self, key: &OmRecordKey, limit: Option<usize>) -> Result<Vec<OmRecord>>;

    /// Deletes every generation of the key.
    fn clear(&self, key: &OmRecordKey) -> Result<()>;
}

pub(crate) fn read_namespaced_metadata(
    bag: &Map<String, Value>,
) -> Result<Option<ThreadOmMetadata>> {
    bag.get(THREAD_METADATA_NAMESPACE)
        .map(|value| serde_json::from_value(value.clone()))
        .transpose()
        .map_err(Into::into)
}

pub(crate) fn write_namespaced_metadata(
    bag: &mut Map<String, Value>,
    metadata: &ThreadOmMetadata,
) -> Result<()> {
    bag.insert(
        THREAD_METADATA_NAMESPACE.to_string(),
        serde_json::to_value(metadata)?,
    );
    Ok(())
}

pub(crate) fn append_unique_ids(existing: &mut Vec<String>, ids: &[String]) {
    for id in ids {
        if !existing.contains(id) {
            existing.push(id.clone());
        }
    }
}

/// New generation superseding `previous`; watermark, observed ids and pending
/// tokens carry over unchanged.
pub(crate) fn next_reflection_generation(
    previous: &OmRecord,
    input: ReflectionGenerationInput,
    now: DateTime<Utc>,
) -> OmRecord {
    OmRecord {
        id: uuid::Uuid::new_v4().to_string(),
        scope: previous.scope,
        scope_key: previous.scope_key.clone(),
        thread_id: previous.thread_id.clone(),
        resource_id: previous.resource_id.clone(),
        generation_count: previous.generation_count.saturating_add(1),
        previous_generation_id: Some(previous.id.clone()),
        origin_type: OmOriginType::Reflection,
        active_observations: input.active_observations,
        observation_token_count: input.observation_token_count,
        patterns: input.patterns,
        observed_message_ids: previous.observed_message_ids.clone(),
        last_observed_at: previous.last_observed_at,
        pending_message_tokens: previous.pending_message_tokens,
        buffered_observations: None,
        buffered_message_ids: Vec::new(),
        buffering_message_ids: Vec::new(),
        buffered_reflection: None,
        is_observing: false,
        is_reflecting: false,
        suggested_continuation: input.suggested_continuation,
        metadata: OmRecordMetadata {
            reflection_count: previous.metadata.reflection_count.saturating_add(1),
        },
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn empty_generation(
    key: &OmRecordKey,
    init: OmRecordInit,
    now: DateTime<Utc>,
) -> OmRecord {
    OmRecord {
        id: uuid::Uuid::new_v4().to_string(),
        scope: key.scope(),
        scope_key: key.scope_key(),
        thread_id: key.thread_id.clone(),
        resource_id: key.resource_id.clone(),
        generation_count: 0,
        previous_generation_id: None,
        origin_type: OmOriginType::Observation,
        active_observations: String::new(),
        observation_token_count: 0,
        patterns: OmPatterns::new(),
        observed_message_ids: Vec::new(),
        last_observed_at: init.last_observed_at,
        pending_message_tokens: 0,
        buffered_observations: None,
        buffered_message_ids: Vec::new(),
        buffering_message_ids: Vec::new(),
        buffered_reflection: None,
        is_observing: false,
        is_reflecting: false,
        suggested_continuation: None,
        metadata: OmRecordMetadata::default(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
pub(crate) mod conformance;
