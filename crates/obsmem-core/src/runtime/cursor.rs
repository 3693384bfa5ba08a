use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::{ObsmemError, Result};
use crate::om::{
    OmMessage, OmRecord, OmRecordInit, OmRecordKey, OmScope, ThreadBacklog,
    ThreadOmMetadataUpdate, exclusive_start, filter_after_watermark, seed_future_only_watermark,
};

use super::ObservationalMemory;

pub(super) struct TurnAccount {
    pub fresh: Vec<OmMessage>,
    pub fresh_tokens: u32,
    /// Cost of the stored backlog before the turn is saved.
    pub stored_tokens: u32,
}

impl TurnAccount {
    /// Carried-forward pending count, never below what the store still holds
    /// unobserved.
    pub fn stored_pending(&self, recorded: u32) -> u32 {
        recorded.max(self.stored_tokens)
    }
}

impl ObservationalMemory {
    /// Messages of the key created strictly after `watermark`, oldest first.
    pub(super) fn load_unobserved(
        &self,
        key: &OmRecordKey,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<OmMessage>> {
        self.store
            .list_messages_since(key, exclusive_start(watermark))
    }

    /// Watermark that governs `thread_id`: the generation's in thread scope,
    /// the thread's own metadata cursor in resource scope.
    pub(super) fn thread_watermark(
        &self,
        scope: OmScope,
        record: Option<&OmRecord>,
        thread_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        match scope {
            OmScope::Thread => Ok(record.and_then(|record| record.last_observed_at)),
            OmScope::Resource => Ok(self
                .store
                .get_thread_metadata(thread_id)?
                .and_then(|metadata| metadata.last_observed_at)),
        }
    }

    /// Per-thread backlogs of a resource, each loaded against that thread's
    /// own cursor. Threads with nothing unobserved are left out.
    pub(super) fn load_thread_backlogs(
        &self,
        resource_id: &str,
        exclude_thread: Option<&str>,
    ) -> Result<Vec<ThreadBacklog>> {
        let mut backlogs = Vec::new();
        for thread_id in self.store.list_resource_threads(resource_id)? {
            if exclude_thread == Some(thread_id.as_str()) {
                continue;
            }
            let watermark = self.thread_watermark(OmScope::Resource, None, &thread_id)?;
            let messages =
                self.load_unobserved(&OmRecordKey::thread(&thread_id, resource_id), watermark)?;
            if messages.is_empty() {
                continue;
            }
            let tokens = self.counter.count_messages(&messages);
            backlogs.push(ThreadBacklog {
                thread_id,
                messages,
                tokens,
            });
        }
        Ok(backlogs)
    }

    /// Splits a turn against the thread's stored backlog. Fresh messages are
    /// newer than the watermark and not stored by an earlier turn; the
    /// backlog cost covers everything already waiting for observation,
    /// including messages a busy turn stored without counting.
    pub(super) fn account_turn(
        &self,
        thread_key: &OmRecordKey,
        watermark: Option<DateTime<Utc>>,
        messages: &[OmMessage],
    ) -> Result<TurnAccount> {
        let stored = self.load_unobserved(thread_key, watermark)?;
        let known = stored
            .iter()
            .map(|message| message.id.as_str())
            .collect::<HashSet<_>>();
        let fresh = filter_after_watermark(messages, watermark)
            .into_iter()
            .filter(|message| !known.contains(message.id.as_str()))
            .collect::<Vec<_>>();
        Ok(TurnAccount {
            fresh_tokens: self.counter.count_messages(&fresh),
            fresh,
            stored_tokens: self.counter.count_messages(&stored),
        })
    }

    /// Current generation of `key`, created on first use.
    ///
    /// Turn hooks pass the turn so the observe-future-only seed lands just
    /// before its newest user message. Manual operations pass `None` and
    /// start from the full history.
    pub(super) fn get_or_init_record(
        &self,
        key: &OmRecordKey,
        turn: Option<(&str, &[OmMessage])>,
    ) -> Result<OmRecord> {
        if let Some(record) = self.store.get_latest_generation(key)? {
            return Ok(record);
        }
        let seed = match turn {
            Some((_, messages)) if self.config.observation.observe_future_only => {
                Some(seed_future_only_watermark(Utc::now(), messages))
            }
            _ => None,
        };
        let record = self.store.initialize_generation(
            key,
            OmRecordInit {
                last_observed_at: seed,
            },
        )?;
        let seeded_here = record.generation_count == 0 && record.last_observed_at == seed;
        if let (OmScope::Resource, Some(seed), true) = (key.scope(), seed, seeded_here) {
            let mut threads = self.store.list_resource_threads(&key.resource_id)?;
            if let Some((thread_id, _)) = turn
                && !threads.iter().any(|known| known == thread_id)
            {
                threads.push(thread_id.to_string());
            }
            self.seed_thread_watermarks(&threads, seed)?;
        }
        tracing::info!(
            scope_key = %record.scope_key,
            record_id = %record.id,
            seeded = seed.is_some(),
            "om generation initialized"
        );
        Ok(record)
    }

    /// Threads that already existed when a resource generation was created
    /// start from the seed. Threads appearing later have no cursor and are
    /// observed from their first message.
    fn seed_thread_watermarks(&self, threads: &[String], seed: DateTime<Utc>) -> Result<()> {
        for thread_id in threads {
            let metadata = self.store.get_thread_metadata(thread_id)?;
            if metadata
                .as_ref()
                .is_some_and(|metadata| metadata.last_observed_at.is_some())
            {
                continue;
            }
            self.update_thread_metadata(
                thread_id,
                &ThreadOmMetadataUpdate {
                    last_observed_at: Some(seed),
                    ..ThreadOmMetadataUpdate::default()
                },
            )?;
        }
        Ok(())
    }

    pub(super) fn update_thread_metadata(
        &self,
        thread_id: &str,
        update: &ThreadOmMetadataUpdate,
    ) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut metadata = self
            .store
            .get_thread_metadata(thread_id)?
            .unwrap_or_default();
        update.apply_to(&mut metadata);
        self.store.set_thread_metadata(thread_id, &metadata)
    }
}

/// Turn messages must belong to the thread and resource they are reported
/// under.
pub(super) fn validate_turn_messages(
    thread_id: &str,
    resource_id: &str,
    messages: &[OmMessage],
) -> Result<()> {
    if thread_id.trim().is_empty() {
        return Err(ObsmemError::Validation(
            "thread_id must not be empty".to_string(),
        ));
    }
    if let Some(stray) = messages
        .iter()
        .find(|message| message.thread_id != thread_id || message.resource_id != resource_id)
    {
        return Err(ObsmemError::Validation(format!(
            "message {} belongs to thread {} of resource {}, expected thread {thread_id} of resource {resource_id}",
            stray.id, stray.thread_id, stray.resource_id
        )));
    }
    Ok(())
}
