use std::thread;

use serde_json::json;

use crate::error::{ObsmemError, Result};
use crate::om::{
    ActiveObservationsUpdate, BatchMode, MultiThreadObserverOutput, OmEvent, OmEventKind,
    OmInferenceUsage, OmObserverThreadMessages, OmPatterns, OmRecord, OmRecordKey,
    OmThreadObservation, ThreadBacklog, ThreadOmMetadataUpdate, chunk_threads_by_token_cap,
    count_generation_tokens, max_message_timestamp, merge_patterns, merge_thread_observations,
    order_threads_for_fairness, select_threads_for_observation,
};

use super::{CycleOutcome, ObservationReport, ObservationalMemory, SkipReason};

const MAX_PARALLEL_OBSERVER_BATCHES: usize = 4;

/// Running merge state of one resource cycle.
#[derive(Debug, Clone)]
pub(super) struct ResourceMerge {
    pub(super) observations: String,
    pub(super) patterns: OmPatterns,
    pub(super) usage: OmInferenceUsage,
    pub(super) threads: Vec<OmThreadObservation>,
}

impl ResourceMerge {
    pub(super) fn from_record(record: &OmRecord) -> Self {
        Self {
            observations: record.active_observations.clone(),
            patterns: record.patterns.clone(),
            usage: OmInferenceUsage::default(),
            threads: Vec::new(),
        }
    }

    /// Folds one Observer batch in. Each addressed thread's observations are
    /// attributed with a `<thread id>` block.
    pub(super) fn absorb(&mut self, output: MultiThreadObserverOutput) {
        self.usage.add(output.usage);
        for thread in output.threads {
            if thread.addressed {
                self.observations = merge_thread_observations(
                    &self.observations,
                    &thread.thread_id,
                    &thread.section.observations,
                );
                self.patterns = merge_patterns(&self.patterns, &thread.section.patterns);
            }
            self.threads.push(thread);
        }
    }
}

pub(super) fn thread_messages(batch: &[ThreadBacklog]) -> Vec<OmObserverThreadMessages<'_>> {
    batch
        .iter()
        .map(|backlog| OmObserverThreadMessages {
            thread_id: &backlog.thread_id,
            messages: &backlog.messages,
        })
        .collect()
}

impl ObservationalMemory {
    pub(super) fn observe_resource_locked(
        &self,
        key: &OmRecordKey,
        snapshot: &OmRecord,
        selection_threshold: u32,
        reflection_threshold: u32,
    ) -> Result<CycleOutcome> {
        let Some(current) = self.recheck_after_acquire(key, snapshot)? else {
            return Ok(CycleOutcome::Skipped {
                reason: SkipReason::LostRace,
            });
        };
        let backlogs = self.load_thread_backlogs(&key.resource_id, None)?;
        if backlogs.is_empty() {
            if current.pending_message_tokens != 0 {
                self.store.set_pending_message_tokens(&current.id, 0)?;
            }
            return Ok(CycleOutcome::Skipped {
                reason: SkipReason::NoBacklog,
            });
        }

        let selection = select_threads_for_observation(backlogs, selection_threshold);
        let deferred_tokens = selection.deferred_tokens();
        let deferred_threads = selection
            .deferred
            .iter()
            .map(|backlog| backlog.thread_id.clone())
            .collect::<Vec<_>>();
        let mut selected = selection.selected;
        order_threads_for_fairness(&mut selected);

        tracing::info!(
            scope_key = %current.scope_key,
            record_id = %current.id,
            selected = selected.len(),
            deferred = deferred_threads.len(),
            deferred_tokens,
            "observing resource threads"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::ObservationStarted, current.scope_key.as_str()).with_detail(
                json!({
                    "threads": selected.iter().map(|b| b.thread_id.as_str()).collect::<Vec<_>>(),
                    "deferred_threads": deferred_threads,
                }),
            ),
        );

        let batches = chunk_threads_by_token_cap(
            selected.clone(),
            self.config.observation.max_tokens_per_batch,
        );
        let merge = match self.config.observation.batch_mode {
            BatchMode::Sequential => self.observe_batches_sequential(&current, &batches)?,
            BatchMode::Parallel => self.observe_batches_parallel(&current, &batches)?,
        };

        let observed_message_ids = selected
            .iter()
            .flat_map(|backlog| backlog.messages.iter().map(|message| message.id.clone()))
            .collect::<Vec<_>>();
        let observed_max = selected
            .iter()
            .filter_map(|backlog| max_message_timestamp(&backlog.messages))
            .max();
        let observation_token_count =
            count_generation_tokens(self.counter.as_ref(), &merge.observations, &merge.patterns);
        // Record first: a crash before the thread cursors move re-observes
        // rather than drops.
        let updated = self.store.update_active_observations(
            &current.id,
            ActiveObservationsUpdate {
                active_observations: merge.observations.clone(),
                observation_token_count,
                last_observed_at: observed_max,
                patterns: merge.patterns.clone(),
                observed_message_ids: observed_message_ids.clone(),
                pending_message_tokens: deferred_tokens,
            },
        )?;
        self.advance_thread_cursors(&selected, &merge.threads)?;

        tracing::info!(
            scope_key = %updated.scope_key,
            record_id = %updated.id,
            observation_tokens = updated.observation_token_count,
            input_tokens = merge.usage.input_tokens,
            output_tokens = merge.usage.output_tokens,
            "resource threads observed"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::ObservationCompleted, updated.scope_key.as_str())
                .with_detail(json!({
                    "record_id": updated.id,
                    "observed_messages": observed_message_ids.len(),
                    "observation_tokens": updated.observation_token_count,
                    "usage": merge.usage,
                })),
        );

        let reflection = self.maybe_reflect(&updated, reflection_threshold)?;
        let record_id = match reflection.as_ref() {
            Some(super::ReflectionOutcome::Reflected(report)) => report.record_id.clone(),
            _ => updated.id.clone(),
        };
        Ok(CycleOutcome::Observed(ObservationReport {
            record_id,
            observed_threads: selected
                .iter()
                .map(|backlog| backlog.thread_id.clone())
                .collect(),
            deferred_threads,
            observed_message_ids,
            last_observed_at: updated.last_observed_at,
            observation_token_count: updated.observation_token_count,
            pending_message_tokens: updated.pending_message_tokens,
            usage: merge.usage,
            reflection,
        }))
    }

    /// Each batch sees the observations merged from the batches before it.
    pub(super) fn observe_batches_sequential(
        &self,
        record: &OmRecord,
        batches: &[Vec<ThreadBacklog>],
    ) -> Result<ResourceMerge> {
        let observer = self.observer(&record.scope_key);
        let mut merge = ResourceMerge::from_record(record);
        for batch in batches {
            let output = observer.observe_threads(
                &merge.observations,
                &merge.patterns,
                &thread_messages(batch),
            )?;
            merge.absorb(output);
        }
        Ok(merge)
    }

    /// Batches run concurrently against the pre-cycle observations, at most
    /// [`MAX_PARALLEL_OBSERVER_BATCHES`] at a time, and merge in batch order.
    fn observe_batches_parallel(
        &self,
        record: &OmRecord,
        batches: &[Vec<ThreadBacklog>],
    ) -> Result<ResourceMerge> {
        let observer = self.observer(&record.scope_key);
        let mut merge = ResourceMerge::from_record(record);
        for wave in batches.chunks(MAX_PARALLEL_OBSERVER_BATCHES) {
            let outputs = thread::scope(|scope| {
                let handles = wave
                    .iter()
                    .map(|batch| {
                        scope.spawn(move || {
                            observer.observe_threads(
                                &record.active_observations,
                                &record.patterns,
                                &thread_messages(batch),
                            )
                        })
                    })
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(ObsmemError::Internal(
                                "observer batch worker panicked".to_string(),
                            ))
                        })
                    })
                    .collect::<Vec<_>>()
            });
            for output in outputs {
                merge.absorb(output?);
            }
        }
        Ok(merge)
    }

    /// Moves every observed thread's cursor to its newest observed message
    /// and stores the Observer's per-thread hints.
    pub(super) fn advance_thread_cursors(
        &self,
        observed: &[ThreadBacklog],
        results: &[OmThreadObservation],
    ) -> Result<()> {
        for backlog in observed {
            let section = results
                .iter()
                .find(|result| result.thread_id == backlog.thread_id && result.addressed)
                .map(|result| &result.section);
            self.update_thread_metadata(
                &backlog.thread_id,
                &ThreadOmMetadataUpdate {
                    last_observed_at: max_message_timestamp(&backlog.messages),
                    current_task: section.and_then(|section| section.current_task.clone()),
                    suggested_response: section
                        .and_then(|section| section.suggested_continuation.clone()),
                },
            )?;
        }
        Ok(())
    }
}
