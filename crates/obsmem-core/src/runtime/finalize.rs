use std::slice;

use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::om::{
    ActiveObservationsUpdate, OmEvent, OmEventKind, OmInferenceUsage, OmRecord, OmRecordKey,
    OmScope, count_generation_tokens, max_message_timestamp, order_threads_for_fairness,
    should_reflect_mid_backfill, should_trigger_reflector,
};

use super::resource::{ResourceMerge, thread_messages};
use super::{
    CycleOutcome, Flag, ObservationReport, ObservationalMemory, ReflectionOutcome,
    ReflectionReport, SkipReason, settle_flag,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FinalizeOptions {
    pub thread_id: Option<String>,
    pub resource_id: String,
    /// Observer context window. In resource scope this switches to a
    /// thread-by-thread backfill that reflects whenever the running
    /// observations approach the window.
    pub max_input_tokens: Option<u32>,
    /// Overrides the configured reflection threshold.
    pub reflection_threshold: Option<u32>,
}

impl FinalizeOptions {
    #[must_use]
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    #[must_use]
    pub const fn with_max_input_tokens(mut self, max_input_tokens: u32) -> Self {
        self.max_input_tokens = Some(max_input_tokens);
        self
    }

    #[must_use]
    pub const fn with_reflection_threshold(mut self, threshold: u32) -> Self {
        self.reflection_threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizeReport {
    pub scope_key: String,
    pub cycle: CycleOutcome,
    pub mid_backfill_reflections: Vec<ReflectionReport>,
    /// Outcome of the closing reflection check, when one ran.
    pub final_reflection: Option<ReflectionOutcome>,
}

struct Backfill {
    cycle: CycleOutcome,
    mid_backfill_reflections: Vec<ReflectionReport>,
    final_reflection: Option<ReflectionOutcome>,
}

impl ObservationalMemory {
    /// Observes every unobserved message regardless of the threshold, then
    /// reflects when the result exceeds the reflection threshold.
    pub fn finalize(&self, options: &FinalizeOptions) -> Result<FinalizeReport> {
        let key = self.record_key(options.thread_id.as_deref(), &options.resource_id)?;
        let record = self.get_or_init_record(&key, None)?;
        let reflection_threshold = options
            .reflection_threshold
            .unwrap_or_else(|| self.config.reflection.threshold());
        tracing::info!(
            scope_key = %record.scope_key,
            record_id = %record.id,
            max_input_tokens = ?options.max_input_tokens,
            reflection_threshold,
            "finalizing observational memory"
        );

        let backfill = match (key.scope(), options.max_input_tokens) {
            (OmScope::Resource, Some(max_input_tokens)) => {
                self.backfill_resource(&key, &record, max_input_tokens, reflection_threshold)?
            }
            _ => {
                let cycle = self.run_cycle(&key, &record, u32::MAX, reflection_threshold)?;
                let final_reflection = match &cycle {
                    CycleOutcome::Observed(report) => report.reflection.clone(),
                    CycleOutcome::Skipped {
                        reason: SkipReason::NoBacklog,
                    } => self.reflect_without_backlog(&key, reflection_threshold)?,
                    CycleOutcome::Skipped { .. } => None,
                };
                Backfill {
                    cycle,
                    mid_backfill_reflections: Vec::new(),
                    final_reflection,
                }
            }
        };
        Ok(FinalizeReport {
            scope_key: key.scope_key(),
            cycle: backfill.cycle,
            mid_backfill_reflections: backfill.mid_backfill_reflections,
            final_reflection: backfill.final_reflection,
        })
    }

    /// Nothing new to observe, but the generation may still be over the
    /// threshold (for example after a caller lowered it).
    fn reflect_without_backlog(
        &self,
        key: &OmRecordKey,
        reflection_threshold: u32,
    ) -> Result<Option<ReflectionOutcome>> {
        let Some(record) = self.store.get_latest_generation(key)? else {
            return Ok(None);
        };
        if !should_trigger_reflector(record.observation_token_count, reflection_threshold) {
            return Ok(None);
        }
        let outcome = self.with_flag(Flag::Observing, &record.id, || {
            self.reflect_record(key, &record, None)
        })?;
        Ok(Some(outcome.unwrap_or(ReflectionOutcome::Skipped {
            reason: SkipReason::Busy,
        })))
    }

    /// Sequential per-thread backfill. The observing flag follows the
    /// current generation across mid-backfill reflections, so the id it is
    /// released on is tracked alongside the work.
    fn backfill_resource(
        &self,
        key: &OmRecordKey,
        snapshot: &OmRecord,
        max_input_tokens: u32,
        reflection_threshold: u32,
    ) -> Result<Backfill> {
        if !self.try_set_flag(Flag::Observing, &snapshot.id, true)? {
            return Ok(Backfill {
                cycle: self.observation_busy(snapshot),
                mid_backfill_reflections: Vec::new(),
                final_reflection: None,
            });
        }
        let mut held_id = snapshot.id.clone();
        let outcome = self.backfill_locked(
            key,
            snapshot,
            max_input_tokens,
            reflection_threshold,
            &mut held_id,
        );
        let released = self.try_set_flag(Flag::Observing, &held_id, false);
        settle_flag(Flag::Observing, &held_id, outcome, released)
    }

    fn backfill_locked(
        &self,
        key: &OmRecordKey,
        snapshot: &OmRecord,
        max_input_tokens: u32,
        reflection_threshold: u32,
        held_id: &mut String,
    ) -> Result<Backfill> {
        let Some(mut current) = self.recheck_after_acquire(key, snapshot)? else {
            return Ok(Backfill {
                cycle: CycleOutcome::Skipped {
                    reason: SkipReason::LostRace,
                },
                mid_backfill_reflections: Vec::new(),
                final_reflection: None,
            });
        };
        let mut backlogs = self.load_thread_backlogs(&key.resource_id, None)?;
        if backlogs.is_empty() {
            if current.pending_message_tokens != 0 {
                self.store.set_pending_message_tokens(&current.id, 0)?;
            }
            let final_reflection = self.maybe_reflect(&current, reflection_threshold)?;
            return Ok(Backfill {
                cycle: CycleOutcome::Skipped {
                    reason: SkipReason::NoBacklog,
                },
                mid_backfill_reflections: Vec::new(),
                final_reflection,
            });
        }
        order_threads_for_fairness(&mut backlogs);

        let scope_key = key.scope_key();
        let observer = self.observer(&scope_key);
        let mut remaining_tokens = backlogs
            .iter()
            .fold(0u32, |sum, backlog| sum.saturating_add(backlog.tokens));
        let mut usage = OmInferenceUsage::default();
        let mut observed_threads = Vec::new();
        let mut observed_message_ids = Vec::new();
        let mut mid_backfill_reflections = Vec::new();
        let mut interrupted = false;

        for backlog in &backlogs {
            remaining_tokens = remaining_tokens.saturating_sub(backlog.tokens);
            let mut merge = ResourceMerge::from_record(&current);
            merge.absorb(observer.observe_threads(
                &current.active_observations,
                &current.patterns,
                &thread_messages(slice::from_ref(backlog)),
            )?);
            usage.add(merge.usage);

            let ids = backlog
                .messages
                .iter()
                .map(|message| message.id.clone())
                .collect::<Vec<_>>();
            let observation_token_count = count_generation_tokens(
                self.counter.as_ref(),
                &merge.observations,
                &merge.patterns,
            );
            current = self.store.update_active_observations(
                &current.id,
                ActiveObservationsUpdate {
                    active_observations: merge.observations,
                    observation_token_count,
                    last_observed_at: max_message_timestamp(&backlog.messages),
                    patterns: merge.patterns,
                    observed_message_ids: ids.clone(),
                    pending_message_tokens: remaining_tokens,
                },
            )?;
            self.advance_thread_cursors(slice::from_ref(backlog), &merge.threads)?;
            observed_threads.push(backlog.thread_id.clone());
            observed_message_ids.extend(ids);
            tracing::debug!(
                scope_key = %current.scope_key,
                record_id = %current.id,
                thread_id = %backlog.thread_id,
                observation_tokens = current.observation_token_count,
                remaining_tokens,
                "backfilled thread"
            );

            if !should_reflect_mid_backfill(
                current.observation_token_count,
                max_input_tokens,
                self.config.reflection.backfill_headroom_ratio,
                reflection_threshold,
            ) {
                continue;
            }
            tracing::info!(
                scope_key = %current.scope_key,
                record_id = %current.id,
                observation_tokens = current.observation_token_count,
                max_input_tokens,
                "reflecting mid-backfill"
            );
            self.sink.record(
                &OmEvent::new(OmEventKind::MidBackfillReflection, current.scope_key.as_str())
                    .with_thread(backlog.thread_id.clone())
                    .with_detail(json!({
                        "record_id": current.id,
                        "observation_tokens": current.observation_token_count,
                        "max_input_tokens": max_input_tokens,
                    })),
            );
            let ReflectionOutcome::Reflected(report) =
                self.reflect_record(key, &current, None)?
            else {
                continue;
            };
            let next = self.require_current(key)?;
            let acquired = next.id == report.record_id
                && self.try_set_flag(Flag::Observing, &next.id, true)?;
            mid_backfill_reflections.push(report);
            if !acquired {
                tracing::info!(
                    scope_key = %next.scope_key,
                    record_id = %next.id,
                    "new generation taken over by another caller, stopping backfill"
                );
                self.sink.record(
                    &OmEvent::new(OmEventKind::LostRace, next.scope_key.as_str()).with_detail(
                        json!({ "flag": Flag::Observing.as_str(), "current_id": next.id }),
                    ),
                );
                current = next;
                interrupted = true;
                break;
            }
            held_id.clone_from(&next.id);
            current = next;
        }

        let final_reflection = if interrupted {
            None
        } else {
            self.maybe_reflect(&current, reflection_threshold)?
        };
        let record_id = match final_reflection.as_ref() {
            Some(ReflectionOutcome::Reflected(report)) => report.record_id.clone(),
            _ => current.id.clone(),
        };
        Ok(Backfill {
            cycle: CycleOutcome::Observed(ObservationReport {
                record_id,
                observed_threads,
                deferred_threads: Vec::new(),
                observed_message_ids,
                last_observed_at: current.last_observed_at,
                observation_token_count: current.observation_token_count,
                pending_message_tokens: current.pending_message_tokens,
                usage,
                reflection: final_reflection.clone(),
            }),
            mid_backfill_reflections,
            final_reflection,
        })
    }
}
