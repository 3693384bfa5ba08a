use chrono::Utc;
use serde_json::json;

use crate::error::Result;
use crate::om::{
    ActiveObservationsUpdate, ObservationDecision, ObserverInput, OmEvent, OmEventKind, OmMessage,
    OmRecord, OmRecordKey, OmScope, ThreadOmMetadataUpdate, append_observations,
    count_generation_tokens, decide_observation, max_message_timestamp, merge_patterns,
    seed_future_only_watermark,
};

use super::cursor::validate_turn_messages;
use super::{CycleOutcome, Flag, ObservationReport, ObservationalMemory, SkipReason, TurnOutcome};

impl ObservationalMemory {
    /// Stores the turn's messages and runs the observe/reflect state machine.
    ///
    /// Below the threshold the turn's tokens are carried forward into
    /// `pending_message_tokens`. Above it an observation cycle runs, unless
    /// another caller already holds the observing flag.
    pub fn process_turn_output(
        &self,
        thread_id: &str,
        resource_id: &str,
        messages: &[OmMessage],
    ) -> Result<TurnOutcome> {
        let key = self.record_key(Some(thread_id), resource_id)?;
        validate_turn_messages(thread_id, &key.resource_id, messages)?;
        let thread_key = OmRecordKey::thread(thread_id, key.resource_id.as_str());

        let record = self.get_or_init_record(&key, Some((thread_id, messages)))?;
        let watermark = self.thread_watermark(key.scope(), Some(&record), thread_id)?;
        let account = self.account_turn(&thread_key, watermark, messages)?;
        self.store.save_messages(messages)?;

        let decision = decide_observation(
            account.stored_pending(record.pending_message_tokens),
            account.fresh_tokens,
            self.config
                .observation_threshold(record.observation_token_count),
        );
        tracing::debug!(
            scope_key = %record.scope_key,
            record_id = %record.id,
            fresh_messages = account.fresh.len(),
            stored_backlog_tokens = account.stored_tokens,
            total_pending = decision.total_pending,
            threshold = decision.threshold,
            "turn accounted"
        );

        if !decision.should_observe {
            if decision.total_pending != record.pending_message_tokens {
                self.store
                    .set_pending_message_tokens(&record.id, decision.total_pending)?;
            }
            return Ok(TurnOutcome {
                scope_key: record.scope_key,
                decision,
                cycle: None,
            });
        }

        let cycle = self.run_cycle(
            &key,
            &record,
            decision.threshold,
            self.config.reflection.threshold(),
        )?;
        Ok(TurnOutcome {
            scope_key: record.scope_key,
            decision,
            cycle: Some(cycle),
        })
    }

    /// Threshold decision `process_turn_output` would take for `messages`,
    /// without storing or observing anything.
    pub fn should_observe(
        &self,
        thread_id: &str,
        resource_id: &str,
        messages: &[OmMessage],
    ) -> Result<ObservationDecision> {
        let key = self.record_key(Some(thread_id), resource_id)?;
        let thread_key = OmRecordKey::thread(thread_id, key.resource_id.as_str());
        let record = self.store.get_latest_generation(&key)?;
        // A first turn would seed the watermark before accounting.
        let watermark = if record.is_none() && self.config.observation.observe_future_only {
            Some(seed_future_only_watermark(Utc::now(), messages))
        } else {
            self.thread_watermark(key.scope(), record.as_ref(), thread_id)?
        };
        let account = self.account_turn(&thread_key, watermark, messages)?;
        let (recorded_pending, observation_tokens) = record.as_ref().map_or((0, 0), |record| {
            (record.pending_message_tokens, record.observation_token_count)
        });
        Ok(decide_observation(
            account.stored_pending(recorded_pending),
            account.fresh_tokens,
            self.config.observation_threshold(observation_tokens),
        ))
    }

    /// Observes everything unobserved for the key now, ignoring the
    /// threshold. The single-flight guard still applies.
    pub fn observe(&self, thread_id: Option<&str>, resource_id: &str) -> Result<CycleOutcome> {
        let key = self.record_key(thread_id, resource_id)?;
        let record = self.get_or_init_record(&key, None)?;
        self.run_cycle(&key, &record, u32::MAX, self.config.reflection.threshold())
    }

    /// `selection_threshold` bounds how many resource threads are taken in
    /// one cycle; it is ignored in thread scope.
    pub(super) fn run_cycle(
        &self,
        key: &OmRecordKey,
        snapshot: &OmRecord,
        selection_threshold: u32,
        reflection_threshold: u32,
    ) -> Result<CycleOutcome> {
        let outcome = self.with_flag(Flag::Observing, &snapshot.id, || match key.scope() {
            OmScope::Thread => self.observe_thread_locked(key, snapshot, reflection_threshold),
            OmScope::Resource => self.observe_resource_locked(
                key,
                snapshot,
                selection_threshold,
                reflection_threshold,
            ),
        })?;
        Ok(outcome.unwrap_or_else(|| self.observation_busy(snapshot)))
    }

    pub(super) fn observation_busy(&self, snapshot: &OmRecord) -> CycleOutcome {
        tracing::info!(
            scope_key = %snapshot.scope_key,
            record_id = %snapshot.id,
            "observation already in progress, skipping cycle"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::ObservationSkipped, snapshot.scope_key.as_str())
                .with_detail(json!({ "record_id": snapshot.id, "reason": "observing" })),
        );
        CycleOutcome::Skipped {
            reason: SkipReason::Busy,
        }
    }

    /// Re-reads the generation after the flag is held. `None` means the
    /// snapshot went stale and the cycle must not write.
    pub(super) fn recheck_after_acquire(
        &self,
        key: &OmRecordKey,
        snapshot: &OmRecord,
    ) -> Result<Option<OmRecord>> {
        let current = self.require_current(key)?;
        if Self::lost_race(snapshot, &current) {
            tracing::info!(
                scope_key = %snapshot.scope_key,
                snapshot_id = %snapshot.id,
                current_id = %current.id,
                "generation moved during flag acquisition, abandoning cycle"
            );
            self.sink.record(
                &OmEvent::new(OmEventKind::LostRace, snapshot.scope_key.as_str()).with_detail(
                    json!({
                        "flag": Flag::Observing.as_str(),
                        "snapshot_id": snapshot.id,
                        "current_id": current.id,
                    }),
                ),
            );
            return Ok(None);
        }
        Ok(Some(current))
    }

    fn observe_thread_locked(
        &self,
        key: &OmRecordKey,
        snapshot: &OmRecord,
        reflection_threshold: u32,
    ) -> Result<CycleOutcome> {
        let Some(current) = self.recheck_after_acquire(key, snapshot)? else {
            return Ok(CycleOutcome::Skipped {
                reason: SkipReason::LostRace,
            });
        };
        let messages = self.load_unobserved(key, current.last_observed_at)?;
        if messages.is_empty() {
            if current.pending_message_tokens != 0 {
                self.store.set_pending_message_tokens(&current.id, 0)?;
            }
            return Ok(CycleOutcome::Skipped {
                reason: SkipReason::NoBacklog,
            });
        }

        let message_tokens = self.counter.count_messages(&messages);
        tracing::info!(
            scope_key = %current.scope_key,
            record_id = %current.id,
            messages = messages.len(),
            message_tokens,
            "observing thread"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::ObservationStarted, current.scope_key.as_str()).with_detail(
                json!({ "messages": messages.len(), "message_tokens": message_tokens }),
            ),
        );

        let output = self.observer(&current.scope_key).observe(ObserverInput {
            existing_observations: &current.active_observations,
            existing_patterns: &current.patterns,
            messages: &messages,
            other_conversation_context: None,
        })?;

        let observations =
            append_observations(&current.active_observations, &output.section.observations);
        let patterns = merge_patterns(&current.patterns, &output.section.patterns);
        let observation_token_count =
            count_generation_tokens(self.counter.as_ref(), &observations, &patterns);
        let observed_message_ids = messages
            .iter()
            .map(|message| message.id.clone())
            .collect::<Vec<_>>();
        let updated = self.store.update_active_observations(
            &current.id,
            ActiveObservationsUpdate {
                active_observations: observations,
                observation_token_count,
                last_observed_at: max_message_timestamp(&messages),
                patterns,
                observed_message_ids: observed_message_ids.clone(),
                pending_message_tokens: 0,
            },
        )?;

        if let Some(thread_id) = key.thread_id.as_deref() {
            self.update_thread_metadata(
                thread_id,
                &ThreadOmMetadataUpdate {
                    last_observed_at: None,
                    current_task: output.section.current_task.clone(),
                    suggested_response: output.section.suggested_continuation.clone(),
                },
            )?;
        }

        tracing::info!(
            scope_key = %updated.scope_key,
            record_id = %updated.id,
            observation_tokens = updated.observation_token_count,
            input_tokens = output.usage.input_tokens,
            output_tokens = output.usage.output_tokens,
            "thread observed"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::ObservationCompleted, updated.scope_key.as_str())
                .with_detail(json!({
                    "record_id": updated.id,
                    "observed_messages": observed_message_ids.len(),
                    "observation_tokens": updated.observation_token_count,
                    "usage": output.usage,
                })),
        );

        let reflection = self.maybe_reflect(&updated, reflection_threshold)?;
        let record_id = match reflection.as_ref() {
            Some(super::ReflectionOutcome::Reflected(report)) => report.record_id.clone(),
            _ => updated.id.clone(),
        };
        Ok(CycleOutcome::Observed(ObservationReport {
            record_id,
            observed_threads: key.thread_id.iter().cloned().collect(),
            deferred_threads: Vec::new(),
            observed_message_ids,
            last_observed_at: updated.last_observed_at,
            observation_token_count: updated.observation_token_count,
            pending_message_tokens: updated.pending_message_tokens,
            usage: output.usage,
            reflection,
        }))
    }
}
