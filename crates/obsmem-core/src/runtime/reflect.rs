use serde_json::json;

use crate::error::{ObsmemError, Result};
use crate::om::{
    OmEvent, OmEventKind, OmRecord, OmRecordKey, ReflectionGenerationInput, ReflectorInput,
    count_generation_tokens, merge_patterns, should_trigger_reflector,
};

use super::{Flag, ObservationalMemory, ReflectionOutcome, ReflectionReport, SkipReason};

impl ObservationalMemory {
    /// Forces a reflection of the current generation, optionally steered by
    /// caller guidance. Runs under the observing flag too, so it never races
    /// an in-place observation merge.
    pub fn reflect(
        &self,
        thread_id: Option<&str>,
        resource_id: &str,
        guidance: Option<&str>,
    ) -> Result<ReflectionOutcome> {
        let key = self.record_key(thread_id, resource_id)?;
        let Some(record) = self.store.get_latest_generation(&key)? else {
            return Ok(ReflectionOutcome::Skipped {
                reason: SkipReason::NoObservations,
            });
        };
        let guidance = guidance.map(str::trim).filter(|text| !text.is_empty());
        let outcome = self.with_flag(Flag::Observing, &record.id, || {
            self.reflect_record(&key, &record, guidance)
        })?;
        Ok(outcome.unwrap_or_else(|| {
            self.record_busy(&record, Flag::Observing);
            ReflectionOutcome::Skipped {
                reason: SkipReason::Busy,
            }
        }))
    }

    /// Reflects `record` when its observations exceed `threshold`.
    pub(super) fn maybe_reflect(
        &self,
        record: &OmRecord,
        threshold: u32,
    ) -> Result<Option<ReflectionOutcome>> {
        if !should_trigger_reflector(record.observation_token_count, threshold) {
            return Ok(None);
        }
        self.reflect_record(&record.key(), record, None).map(Some)
    }

    pub(super) fn reflect_record(
        &self,
        key: &OmRecordKey,
        snapshot: &OmRecord,
        guidance: Option<&str>,
    ) -> Result<ReflectionOutcome> {
        let outcome = self.with_flag(Flag::Reflecting, &snapshot.id, || {
            self.reflect_locked(key, snapshot, guidance)
        })?;
        Ok(outcome.unwrap_or_else(|| {
            self.record_busy(snapshot, Flag::Reflecting);
            ReflectionOutcome::Skipped {
                reason: SkipReason::Busy,
            }
        }))
    }

    fn record_busy(&self, record: &OmRecord, flag: Flag) {
        tracing::info!(
            scope_key = %record.scope_key,
            record_id = %record.id,
            flag = flag.as_str(),
            "reflection skipped, flag already held"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::LostRace, record.scope_key.as_str())
                .with_detail(json!({ "record_id": record.id, "flag": flag.as_str() })),
        );
    }

    fn reflect_locked(
        &self,
        key: &OmRecordKey,
        snapshot: &OmRecord,
        guidance: Option<&str>,
    ) -> Result<ReflectionOutcome> {
        let current = self.require_current(key)?;
        if current.id != snapshot.id {
            self.record_superseded(snapshot, Some(&current.id));
            return Ok(ReflectionOutcome::Skipped {
                reason: SkipReason::LostRace,
            });
        }
        if current.active_observations.trim().is_empty() {
            return Ok(ReflectionOutcome::Skipped {
                reason: SkipReason::NoObservations,
            });
        }

        tracing::info!(
            scope_key = %current.scope_key,
            record_id = %current.id,
            observation_tokens = current.observation_token_count,
            guided = guidance.is_some(),
            "reflecting"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::ReflectionStarted, current.scope_key.as_str()).with_detail(
                json!({
                    "record_id": current.id,
                    "observation_tokens": current.observation_token_count,
                }),
            ),
        );

        let output = self.reflector(&current.scope_key).reflect(ReflectorInput {
            observations: &current.active_observations,
            patterns: &current.patterns,
            manual_guidance: guidance,
        })?;
        if output.section.observations.trim().is_empty() {
            tracing::warn!(
                scope_key = %current.scope_key,
                record_id = %current.id,
                "reflector returned no observations, keeping generation"
            );
            self.sink.record(
                &OmEvent::new(OmEventKind::ReflectionSkipped, current.scope_key.as_str())
                    .with_detail(json!({ "record_id": current.id, "usage": output.usage })),
            );
            return Ok(ReflectionOutcome::Skipped {
                reason: SkipReason::EmptyReflection,
            });
        }

        let patterns = merge_patterns(&current.patterns, &output.section.patterns);
        let observation_token_count = count_generation_tokens(
            self.counter.as_ref(),
            &output.section.observations,
            &patterns,
        );
        let suggested_continuation = output
            .section
            .suggested_continuation
            .clone()
            .or_else(|| current.suggested_continuation.clone());
        let next = match self.store.create_reflection_generation(
            &current,
            ReflectionGenerationInput {
                active_observations: output.section.observations.clone(),
                observation_token_count,
                patterns,
                suggested_continuation,
            },
        ) {
            Ok(next) => next,
            Err(ObsmemError::Conflict(message)) => {
                tracing::info!(
                    scope_key = %current.scope_key,
                    record_id = %current.id,
                    %message,
                    "generation superseded while reflecting"
                );
                self.record_superseded(&current, None);
                return Ok(ReflectionOutcome::Skipped {
                    reason: SkipReason::LostRace,
                });
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            scope_key = %next.scope_key,
            previous_record_id = %current.id,
            record_id = %next.id,
            generation = next.generation_count,
            input_tokens = output.input_tokens,
            output_tokens = output.output_tokens,
            compressed = output.compressed,
            "reflection generation created"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::ReflectionCompleted, next.scope_key.as_str()).with_detail(
                json!({
                    "previous_record_id": current.id,
                    "record_id": next.id,
                    "generation": next.generation_count,
                    "input_tokens": output.input_tokens,
                    "output_tokens": output.output_tokens,
                    "compressed": output.compressed,
                    "usage": output.usage,
                }),
            ),
        );
        Ok(ReflectionOutcome::Reflected(ReflectionReport {
            previous_record_id: current.id,
            record_id: next.id,
            generation_count: next.generation_count,
            input_tokens: output.input_tokens,
            output_tokens: output.output_tokens,
            observation_token_count: next.observation_token_count,
            compressed: output.compressed,
            retried: output.retried,
            usage: output.usage,
        }))
    }

    fn record_superseded(&self, snapshot: &OmRecord, current_id: Option<&str>) {
        self.sink.record(
            &OmEvent::new(OmEventKind::LostRace, snapshot.scope_key.as_str()).with_detail(json!({
                "flag": Flag::Reflecting.as_str(),
                "snapshot_id": snapshot.id,
                "current_id": current_id,
            })),
        );
    }
}
