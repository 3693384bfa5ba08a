use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{ObsmemError, Result};
use crate::om::model::{
    OmMessage, OmRecord, OmRecordKey, THREAD_METADATA_NAMESPACE, ThreadOmMetadata,
};
use crate::om::transform::{advance_watermark, truncate_to_millis};

use super::{
    ActiveObservationsUpdate, OmRecordInit, OmStore, ReflectionGenerationInput, append_unique_ids,
    empty_generation, next_reflection_generation, read_namespaced_metadata,
    write_namespaced_metadata,
};

#[derive(Debug, Default)]
struct Inner {
    /// Every generation ever written, keyed by id.
    generations: HashMap<String, OmRecord>,
    /// Generation ids per scope key, oldest first; the last one is current.
    chains: HashMap<String, Vec<String>>,
    messages: HashMap<String, OmMessage>,
    thread_metadata: HashMap<String, Map<String, Value>>,
}

impl Inner {
    fn record_mut(&mut self, record_id: &str) -> Result<&mut OmRecord> {
        self.generations
            .get_mut(record_id)
            .ok_or_else(|| ObsmemError::NotFound(format!("om generation {record_id}")))
    }

    fn latest(&self, scope_key: &str) -> Option<&OmRecord> {
        self.chains
            .get(scope_key)
            .and_then(|chain| chain.last())
            .and_then(|id| self.generations.get(id))
    }
}

/// Process-local store backed by a generation arena.
#[derive(Debug, Default)]
pub struct InMemoryOmStore {
    inner: Mutex<Inner>,
}

impl InMemoryOmStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| ObsmemError::mutex_poisoned("om store"))
    }

    /// Writes a value into another consumer's namespace of the thread's
    /// metadata bag.
    pub fn put_thread_metadata_value(
        &self,
        thread_id: &str,
        namespace: &str,
        value: Value,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .thread_metadata
            .entry(thread_id.to_string())
            .or_default()
            .insert(namespace.to_string(), value);
        Ok(())
    }

    pub fn thread_metadata_bag(&self, thread_id: &str) -> Result<Map<String, Value>> {
        let inner = self.lock()?;
        Ok(inner
            .thread_metadata
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn swap_flag(record: &mut OmRecord, reflecting: bool, value: bool) -> bool {
    let slot = if reflecting {
        &mut record.is_reflecting
    } else {
        &mut record.is_observing
    };
    if *slot == value {
        return false;
    }
    *slot = value;
    record.updated_at = Utc::now();
    true
}

impl OmStore for InMemoryOmStore {
    fn get_latest_generation(&self, key: &OmRecordKey) -> Result<Option<OmRecord>> {
        let inner = self.lock()?;
        Ok(inner.latest(&key.scope_key()).cloned())
    }

    fn get_generation(&self, record_id: &str) -> Result<Option<OmRecord>> {
        let inner = self.lock()?;
        Ok(inner.generations.get(record_id).cloned())
    }

    fn initialize_generation(&self, key: &OmRecordKey, init: OmRecordInit) -> Result<OmRecord> {
        let mut inner = self.lock()?;
        let scope_key = key.scope_key();
        if let Some(existing) = inner.latest(&scope_key) {
            return Ok(existing.clone());
        }
        let record = empty_generation(key, init, Utc::now());
        inner
            .chains
            .entry(scope_key)
            .or_default()
            .push(record.id.clone());
        inner.generations.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update_active_observations(
        &self,
        record_id: &str,
        update: ActiveObservationsUpdate,
    ) -> Result<OmRecord> {
        let mut inner = self.lock()?;
        let record = inner.record_mut(record_id)?;
        record.active_observations = update.active_observations;
        record.observation_token_count = update.observation_token_count;
        record.last_observed_at =
            advance_watermark(record.last_observed_at, update.last_observed_at);
        record.patterns = update.patterns;
        append_unique_ids(&mut record.observed_message_ids, &update.observed_message_ids);
        record.pending_message_tokens = update.pending_message_tokens;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn set_pending_message_tokens(&self, record_id: &str, tokens: u32) -> Result<()> {
        let mut inner = self.lock()?;
        let record = inner.record_mut(record_id)?;
        record.pending_message_tokens = tokens;
        record.updated_at = Utc::now();
        Ok(())
    }

    fn create_reflection_generation(
        &self,
        previous: &OmRecord,
        input: ReflectionGenerationInput,
    ) -> Result<OmRecord> {
        let mut inner = self.lock()?;
        let current_id = inner.latest(&previous.scope_key).map(|record| record.id.clone());
        if current_id.as_deref() != Some(previous.id.as_str()) {
            return Err(ObsmemError::Conflict(format!(
                "om generation {} is no longer current for {}",
                previous.id, previous.scope_key
            )));
        }
        let now = Utc::now();
        let stored_previous = inner.record_mut(&previous.id)?;
        stored_previous.is_observing = false;
        stored_previous.is_reflecting = false;
        stored_previous.updated_at = now;
        let next = next_reflection_generation(stored_previous, input, now);

        inner
            .chains
            .entry(next.scope_key.clone())
            .or_default()
            .push(next.id.clone());
        inner.generations.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    fn try_set_observing_flag(&self, record_id: &str, value: bool) -> Result<bool> {
        let mut inner = self.lock()?;
        let record = inner.record_mut(record_id)?;
        Ok(swap_flag(record, false, value))
    }

    fn try_set_reflecting_flag(&self, record_id: &str, value: bool) -> Result<bool> {
        let mut inner = self.lock()?;
        let record = inner.record_mut(record_id)?;
        Ok(swap_flag(record, true, value))
    }

    fn save_messages(&self, messages: &[OmMessage]) -> Result<()> {
        let mut inner = self.lock()?;
        for message in messages {
            let mut message = message.clone();
            message.created_at = truncate_to_millis(message.created_at);
            inner.messages.insert(message.id.clone(), message);
        }
        Ok(())
    }

    fn list_messages_since(
        &self,
        key: &OmRecordKey,
        start: Option<DateTime<Utc>>,
    ) -> Result<Vec<OmMessage>> {
        let inner = self.lock()?;
        let mut messages = inner
            .messages
            .values()
            .filter(|message| message.resource_id == key.resource_id)
            .filter(|message| {
                key.thread_id
                    .as_deref()
                    .is_none_or(|thread_id| message.thread_id == thread_id)
            })
            .filter(|message| start.is_none_or(|start| message.created_at >= start))
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(messages)
    }

    fn list_resource_threads(&self, resource_id: &str) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let threads = inner
            .messages
            .values()
            .filter(|message| message.resource_id == resource_id)
            .map(|message| message.thread_id.clone())
            .collect::<BTreeSet<_>>();
        Ok(threads.into_iter().collect())
    }

    fn get_thread_metadata(&self, thread_id: &str) -> Result<Option<ThreadOmMetadata>> {
        let inner = self.lock()?;
        match inner.thread_metadata.get(thread_id) {
            Some(bag) => read_namespaced_metadata(bag),
            None => Ok(None),
        }
    }

    fn set_thread_metadata(&self, thread_id: &str, metadata: &ThreadOmMetadata) -> Result<()> {
        let mut inner = self.lock()?;
        let bag = inner
            .thread_metadata
            .entry(thread_id.to_string())
            .or_default();
        write_namespaced_metadata(bag, metadata)
    }

    fn clear_thread_metadata(&self, thread_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(bag) = inner.thread_metadata.get_mut(thread_id) {
            bag.remove(THREAD_METADATA_NAMESPACE);
        }
        Ok(())
    }

    fn get_history(&self, key: &OmRecordKey, limit: Option<usize>) -> Result<Vec<OmRecord>> {
        let inner = self.lock()?;
        let Some(chain) = inner.chains.get(&key.scope_key()) else {
            return Ok(Vec::new());
        };
        Ok(chain
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|id| inner.generations.get(id).cloned())
            .collect())
    }

    fn clear(&self, key: &OmRecordKey) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(chain) = inner.chains.remove(&key.scope_key()) {
            for id in chain {
                inner.generations.remove(&id);
            }
        }
        Ok(())
    }
}
