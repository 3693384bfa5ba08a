mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use obsmem_core::error::OmInferenceSource;
use obsmem_core::om::{
    ActiveObservationsUpdate, BatchMode, InMemoryOmStore, OmEventKind, OmMessage, OmOriginType,
    OmRecord, OmRecordInit, OmRecordKey, OmScope, OmStore, ReflectionGenerationInput,
    ThreadOmMetadata,
};
use obsmem_core::{CycleOutcome, FinalizeOptions, ReflectionOutcome, Result, SkipReason};

use support::{Harness, RESOURCE, config, ids, message, minutes_ago};

fn in_memory(config: obsmem_core::ResolvedOmConfig) -> Harness {
    Harness::new(Arc::new(InMemoryOmStore::new()), config)
}

fn observed(outcome: &CycleOutcome) -> &obsmem_core::ObservationReport {
    outcome
        .report()
        .unwrap_or_else(|| panic!("expected an observation, got {outcome:?}"))
}

#[test]
fn pending_tokens_accumulate_until_one_observation() {
    let mut cfg = config(OmScope::Thread, 500, 100_000);
    cfg.observation.observe_future_only = false;
    let h = in_memory(cfg);
    let mut all = Vec::new();
    for turn in 0..5i64 {
        let batch = [
            message(&format!("m-{}", turn * 2), "t-1", 50 - turn * 2, 180),
            message(&format!("m-{}", turn * 2 + 1), "t-1", 49 - turn * 2, 180),
        ];
        all.extend(batch.iter().cloned());
        let outcome = h
            .memory
            .process_turn_output("t-1", RESOURCE, &all)
            .unwrap();
        if turn < 4 {
            assert!(outcome.cycle.is_none(), "turn {turn}");
            assert_eq!(outcome.decision.total_pending, 124 * (u32::try_from(turn).unwrap() + 1));
        } else {
            assert_eq!(outcome.decision.total_pending, 620);
            let report = observed(outcome.cycle.as_ref().unwrap());
            assert_eq!(report.observed_message_ids, ids(&all));
            assert_eq!(report.last_observed_at, Some(all[9].created_at));
        }
    }

    let record = h.memory.get_record(Some("t-1"), RESOURCE).unwrap().unwrap();
    assert_eq!(record.pending_message_tokens, 0);
    assert!(record.observation_token_count > 0);
    assert!(!record.is_observing);
    assert_eq!(h.model.calls(OmInferenceSource::Observer), 1);
}

#[test]
fn sub_threshold_turns_carry_forward() {
    let h = in_memory(config(OmScope::Thread, 1_000, 100_000));
    let first = h
        .memory
        .process_turn_output("t-1", RESOURCE, &[message("m-1", "t-1", 10, 684)])
        .unwrap();
    assert_eq!(first.decision.total_pending, 200);
    let second = h
        .memory
        .process_turn_output("t-1", RESOURCE, &[message("m-2", "t-1", 9, 684)])
        .unwrap();
    assert_eq!(second.decision.total_pending, 400);
    assert!(second.cycle.is_none());

    let record = h.memory.get_record(Some("t-1"), RESOURCE).unwrap().unwrap();
    assert_eq!(record.pending_message_tokens, 400);
    assert!(record.active_observations.is_empty());
    assert!(h.model.requests().is_empty());
}

#[test]
fn enabling_memory_mid_history_observes_only_the_new_turn() {
    let h = in_memory(config(OmScope::Thread, 10, 100_000));
    let mut all = (0..20i64)
        .map(|n| message(&format!("old-{n}"), "t-1", 6_000 - n, 684))
        .collect::<Vec<_>>();
    all.push(message("new", "t-1", 1, 684));

    let outcome = h
        .memory
        .process_turn_output("t-1", RESOURCE, &all)
        .unwrap();
    assert_eq!(outcome.decision.total_pending, 200);
    let report = observed(outcome.cycle.as_ref().unwrap());
    assert_eq!(report.observed_message_ids, vec!["new".to_string()]);
    assert_eq!(report.last_observed_at, Some(all[20].created_at));
    assert_eq!(h.model.calls(OmInferenceSource::Observer), 1);

    assert_eq!(
        h.memory.observe(Some("t-1"), RESOURCE).unwrap(),
        CycleOutcome::Skipped {
            reason: SkipReason::NoBacklog
        }
    );
}

#[test]
fn reflection_appends_a_generation_and_keeps_the_old_one() {
    let h = in_memory(config(OmScope::Thread, 100, 15));
    let first = [message("m-1", "t-1", 10, 684)];
    let outcome = h
        .memory
        .process_turn_output("t-1", RESOURCE, &first)
        .unwrap();
    let report = observed(outcome.cycle.as_ref().unwrap());
    let Some(ReflectionOutcome::Reflected(reflection)) = report.reflection.as_ref() else {
        panic!("expected a reflection, got {:?}", report.reflection);
    };
    assert_eq!(reflection.generation_count, 1);
    assert!(reflection.compressed);
    assert_eq!(report.record_id, reflection.record_id);

    let history = h.memory.get_history(Some("t-1"), RESOURCE, None).unwrap();
    assert_eq!(history.len(), 2);
    let (current, previous) = (&history[0], &history[1]);
    assert_eq!(current.origin_type, OmOriginType::Reflection);
    assert_eq!(current.previous_generation_id.as_deref(), Some(previous.id.as_str()));
    assert_eq!(current.active_observations, "* 🔴 Release work condensed");
    assert!(previous.active_observations.contains("Observation 1"));
    assert_eq!(current.observed_message_ids, previous.observed_message_ids);
    assert_eq!(current.last_observed_at, previous.last_observed_at);
    for record in &history {
        assert!(!record.is_observing && !record.is_reflecting, "{}", record.id);
    }
    let kinds = h.sink.kinds();
    assert!(kinds.contains(&OmEventKind::ReflectionStarted));
    assert!(kinds.contains(&OmEventKind::ReflectionCompleted));

    // The next cycle observes only what arrived after the carried watermark.
    let mut next = first.to_vec();
    next.push(message("m-2", "t-1", 5, 684));
    let outcome = h
        .memory
        .process_turn_output("t-1", RESOURCE, &next)
        .unwrap();
    assert_eq!(
        observed(outcome.cycle.as_ref().unwrap()).observed_message_ids,
        vec!["m-2".to_string()]
    );
}

#[test]
fn uncompressed_reflection_is_retried_once_then_accepted() {
    let h = in_memory(config(OmScope::Thread, 100, 15));
    h.model.queue_reflection(format!(
        "<observations>\n* first draft {}\n</observations>",
        "long ".repeat(60)
    ));
    h.model.queue_reflection(format!(
        "<observations>\n* second draft {}\n</observations>",
        "long ".repeat(60)
    ));
    let outcome = h
        .memory
        .process_turn_output("t-1", RESOURCE, &[message("m-1", "t-1", 10, 684)])
        .unwrap();
    let report = observed(outcome.cycle.as_ref().unwrap());
    let Some(ReflectionOutcome::Reflected(reflection)) = report.reflection.as_ref() else {
        panic!("expected a reflection, got {:?}", report.reflection);
    };
    assert!(reflection.retried);
    assert!(!reflection.compressed);
    assert_eq!(h.model.calls(OmInferenceSource::Reflector), 2);

    let record = h.memory.get_record(Some("t-1"), RESOURCE).unwrap().unwrap();
    assert!(record.active_observations.starts_with("* second draft"));
    let kinds = h.sink.kinds();
    assert!(kinds.contains(&OmEventKind::CompressionRetry));
    assert!(kinds.contains(&OmEventKind::CompressionNotAchieved));
}

#[test]
fn empty_reflection_keeps_the_current_generation() {
    let h = in_memory(config(OmScope::Thread, 100, 100_000));
    h.memory
        .process_turn_output("t-1", RESOURCE, &[message("m-1", "t-1", 10, 684)])
        .unwrap();
    h.model.queue_reflection("<observations>\n</observations>");

    let outcome = h.memory.reflect(Some("t-1"), RESOURCE, None).unwrap();
    assert_eq!(
        outcome,
        ReflectionOutcome::Skipped {
            reason: SkipReason::EmptyReflection
        }
    );
    assert_eq!(h.memory.get_history(Some("t-1"), RESOURCE, None).unwrap().len(), 1);
    assert!(h.sink.kinds().contains(&OmEventKind::ReflectionSkipped));
}

#[test]
fn manual_reflection_passes_guidance_to_the_reflector() {
    let h = in_memory(config(OmScope::Thread, 100, 100_000));
    h.memory
        .process_turn_output("t-1", RESOURCE, &[message("m-1", "t-1", 10, 684)])
        .unwrap();

    let outcome = h
        .memory
        .reflect(Some("t-1"), RESOURCE, Some("Keep every deadline"))
        .unwrap();
    assert!(matches!(outcome, ReflectionOutcome::Reflected(_)));
    let reflector_prompt = h
        .model
        .requests()
        .into_iter()
        .find(|request| request.source == OmInferenceSource::Reflector)
        .unwrap()
        .user_prompt;
    assert!(reflector_prompt.contains("Keep every deadline"));
}

#[test]
fn resource_threads_keep_independent_cursors() {
    let mut cfg = config(OmScope::Resource, 500, 100_000);
    cfg.observation.observe_future_only = false;
    let h = in_memory(cfg);

    let b_turn = [message("b-1", "t-b", 30, 84)];
    let outcome = h
        .memory
        .process_turn_output("t-b", RESOURCE, &b_turn)
        .unwrap();
    assert_eq!(outcome.decision.total_pending, 50);
    assert!(outcome.cycle.is_none());

    let a_turn = [message("a-1", "t-a", 20, 2284)];
    let outcome = h
        .memory
        .process_turn_output("t-a", RESOURCE, &a_turn)
        .unwrap();
    assert_eq!(outcome.decision.total_pending, 650);
    let report = observed(outcome.cycle.as_ref().unwrap());
    assert_eq!(report.observed_threads, vec!["t-a"]);
    assert_eq!(report.deferred_threads, vec!["t-b"]);
    assert_eq!(report.pending_message_tokens, 50);

    let requests = h.model.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].user_prompt.ends_with("Thread ids in this batch: t-a."));

    let store = h.memory.store();
    let a_meta = store.get_thread_metadata("t-a").unwrap().unwrap();
    assert_eq!(a_meta.last_observed_at, Some(a_turn[0].created_at));
    assert_eq!(a_meta.current_task.as_deref(), Some("Task for t-a"));
    assert!(
        store
            .get_thread_metadata("t-b")
            .unwrap()
            .and_then(|meta| meta.last_observed_at)
            .is_none()
    );
    let record = h.memory.get_record(None, RESOURCE).unwrap().unwrap();
    assert!(record.active_observations.contains("<thread id=\"t-a\">"));
    assert!(!record.active_observations.contains("t-b"));

    let outcome = h.memory.observe(None, RESOURCE).unwrap();
    let report = observed(&outcome);
    assert_eq!(report.observed_threads, vec!["t-b"]);
    assert_eq!(report.observed_message_ids, vec!["b-1"]);
    assert_eq!(report.pending_message_tokens, 0);
}

#[test]
fn unaddressed_threads_still_advance() {
    let mut cfg = config(OmScope::Resource, 10_000, 100_000);
    cfg.observation.observe_future_only = false;
    let h = in_memory(cfg);
    let store = h.memory.store();
    store
        .save_messages(&[message("a-1", "t-a", 20, 84), message("b-1", "t-b", 19, 84)])
        .unwrap();
    h.model.skip_thread("t-b");

    let outcome = h.memory.observe(None, RESOURCE).unwrap();
    assert_eq!(observed(&outcome).observed_threads, vec!["t-a", "t-b"]);

    let not_addressed = h
        .sink
        .events()
        .into_iter()
        .filter(|event| event.kind == OmEventKind::ThreadNotAddressed)
        .map(|event| event.thread_id)
        .collect::<Vec<_>>();
    assert_eq!(not_addressed, vec![Some("t-b".to_string())]);
    let b_meta = store.get_thread_metadata("t-b").unwrap().unwrap();
    assert_eq!(b_meta.last_observed_at, Some(created_at_of(store, "b-1")));
    assert!(b_meta.current_task.is_none());
    let record = h.memory.get_record(None, RESOURCE).unwrap().unwrap();
    assert!(!record.active_observations.contains("t-b"));
}

fn created_at_of(store: &dyn OmStore, message_id: &str) -> DateTime<Utc> {
    store
        .list_messages_since(&OmRecordKey::resource(RESOURCE), None)
        .unwrap()
        .into_iter()
        .find(|message| message.id == message_id)
        .unwrap()
        .created_at
}

#[test]
fn parallel_batches_merge_in_batch_order() {
    let mut cfg = config(OmScope::Resource, 10_000, 100_000);
    cfg.observation.observe_future_only = false;
    cfg.observation.batch_mode = BatchMode::Parallel;
    cfg.observation.max_tokens_per_batch = 60;
    let h = in_memory(cfg);
    h.memory
        .store()
        .save_messages(&[
            message("a-1", "t-a", 30, 84),
            message("b-1", "t-b", 20, 84),
            message("c-1", "t-c", 10, 84),
        ])
        .unwrap();

    let outcome = h.memory.observe(None, RESOURCE).unwrap();
    assert_eq!(observed(&outcome).observed_threads, vec!["t-a", "t-b", "t-c"]);
    assert_eq!(h.model.calls(OmInferenceSource::Observer), 3);

    let observations = h
        .memory
        .get_observations(None, RESOURCE)
        .unwrap()
        .unwrap();
    let positions = ["t-a", "t-b", "t-c"]
        .map(|thread| observations.find(&format!("<thread id=\"{thread}\">")).unwrap());
    assert!(positions[0] < positions[1] && positions[1] < positions[2]);
}

#[test]
fn busy_flag_from_another_caller_means_zero_work() {
    let store: Arc<dyn OmStore> = Arc::new(InMemoryOmStore::new());
    let h = Harness::new(Arc::clone(&store), config(OmScope::Thread, 100, 100_000));
    let key = OmRecordKey::thread("t-1", RESOURCE);
    let record = store
        .initialize_generation(&key, OmRecordInit::default())
        .unwrap();
    assert!(store.try_set_observing_flag(&record.id, true).unwrap());

    let outcome = h
        .memory
        .process_turn_output("t-1", RESOURCE, &[message("m-1", "t-1", 5, 684)])
        .unwrap();
    assert_eq!(
        outcome.cycle,
        Some(CycleOutcome::Skipped {
            reason: SkipReason::Busy
        })
    );
    assert!(h.model.requests().is_empty());
    let current = store.get_latest_generation(&key).unwrap().unwrap();
    assert_eq!(current.last_observed_at, record.last_observed_at);
    assert!(current.is_observing);
}

#[test]
fn turn_stored_during_a_busy_cycle_counts_toward_the_next_one() {
    let store: Arc<dyn OmStore> = Arc::new(InMemoryOmStore::new());
    let h = Harness::new(Arc::clone(&store), config(OmScope::Thread, 500, 100_000));
    let key = OmRecordKey::thread("t-1", RESOURCE);
    let record = store
        .initialize_generation(&key, OmRecordInit::default())
        .unwrap();
    assert!(store.try_set_observing_flag(&record.id, true).unwrap());

    let busy_turn = [message("m-1", "t-1", 10, 2284)];
    let outcome = h
        .memory
        .process_turn_output("t-1", RESOURCE, &busy_turn)
        .unwrap();
    assert_eq!(outcome.decision.total_pending, 600);
    assert_eq!(
        outcome.cycle,
        Some(CycleOutcome::Skipped {
            reason: SkipReason::Busy
        })
    );
    assert!(store.try_set_observing_flag(&record.id, false).unwrap());

    let mut next = busy_turn.to_vec();
    next.push(message("m-2", "t-1", 5, 40));
    let decision = h.memory.should_observe("t-1", RESOURCE, &next).unwrap();
    assert_eq!(decision.total_pending, 639);
    assert!(decision.should_observe);

    let outcome = h
        .memory
        .process_turn_output("t-1", RESOURCE, &next)
        .unwrap();
    assert_eq!(outcome.decision.total_pending, 639);
    assert_eq!(
        observed(outcome.cycle.as_ref().unwrap()).observed_message_ids,
        ids(&next)
    );
}

/// Lets another "process" finish an observation between the flag
/// acquisition and the re-read.
struct RacingStore {
    inner: InMemoryOmStore,
    armed: AtomicBool,
}

impl RacingStore {
    fn interfere(&self, record_id: &str) -> Result<()> {
        let Some(record) = self.inner.get_generation(record_id)? else {
            return Ok(());
        };
        let messages = self.inner.list_messages_since(&record.key(), None)?;
        self.inner.update_active_observations(
            record_id,
            ActiveObservationsUpdate {
                active_observations: "* 🔴 Observed by another process".to_string(),
                observation_token_count: 8,
                last_observed_at: messages.iter().map(|message| message.created_at).max(),
                patterns: record.patterns.clone(),
                observed_message_ids: messages.iter().map(|message| message.id.clone()).collect(),
                pending_message_tokens: 0,
            },
        )?;
        Ok(())
    }
}

impl OmStore for RacingStore {
    fn get_latest_generation(&self, key: &OmRecordKey) -> Result<Option<OmRecord>> {
        self.inner.get_latest_generation(key)
    }

    fn get_generation(&self, record_id: &str) -> Result<Option<OmRecord>> {
        self.inner.get_generation(record_id)
    }

    fn initialize_generation(&self, key: &OmRecordKey, init: OmRecordInit) -> Result<OmRecord> {
        self.inner.initialize_generation(key, init)
    }

    fn update_active_observations(
        &self,
        record_id: &str,
        update: ActiveObservationsUpdate,
    ) -> Result<OmRecord> {
        self.inner.update_active_observations(record_id, update)
    }

    fn set_pending_message_tokens(&self, record_id: &str, tokens: u32) -> Result<()> {
        self.inner.set_pending_message_tokens(record_id, tokens)
    }

    fn create_reflection_generation(
        &self,
        previous: &OmRecord,
        input: ReflectionGenerationInput,
    ) -> Result<OmRecord> {
        self.inner.create_reflection_generation(previous, input)
    }

    fn try_set_observing_flag(&self, record_id: &str, value: bool) -> Result<bool> {
        let acquired = self.inner.try_set_observing_flag(record_id, value)?;
        if acquired && value && self.armed.swap(false, Ordering::SeqCst) {
            self.interfere(record_id)?;
        }
        Ok(acquired)
    }

    fn try_set_reflecting_flag(&self, record_id: &str, value: bool) -> Result<bool> {
        self.inner.try_set_reflecting_flag(record_id, value)
    }

    fn save_messages(&self, messages: &[OmMessage]) -> Result<()> {
        self.inner.save_messages(messages)
    }

    fn list_messages_since(
        &self,
        key: &OmRecordKey,
        start: Option<DateTime<Utc>>,
    ) -> Result<Vec<OmMessage>> {
        self.inner.list_messages_since(key, start)
    }

    fn list_resource_threads(&self, resource_id: &str) -> Result<Vec<String>> {
        self.inner.list_resource_threads(resource_id)
    }

    fn get_thread_metadata(&self, thread_id: &str) -> Result<Option<ThreadOmMetadata>> {
        self.inner.get_thread_metadata(thread_id)
    }

    fn set_thread_metadata(&self, thread_id: &str, metadata: &ThreadOmMetadata) -> Result<()> {
        self.inner.set_thread_metadata(thread_id, metadata)
    }

    fn clear_thread_metadata(&self, thread_id: &str) -> Result<()> {
        self.inner.clear_thread_metadata(thread_id)
    }

    fn get_history(&self, key: &OmRecordKey, limit: Option<usize>) -> Result<Vec<OmRecord>> {
        self.inner.get_history(key, limit)
    }

    fn clear(&self, key: &OmRecordKey) -> Result<()> {
        self.inner.clear(key)
    }
}

#[test]
fn advanced_watermark_after_acquire_abandons_the_cycle() {
    let store = Arc::new(RacingStore {
        inner: InMemoryOmStore::new(),
        armed: AtomicBool::new(true),
    });
    let h = Harness::new(store, config(OmScope::Thread, 100, 100_000));

    let outcome = h
        .memory
        .process_turn_output("t-1", RESOURCE, &[message("m-1", "t-1", 5, 684)])
        .unwrap();
    assert_eq!(
        outcome.cycle,
        Some(CycleOutcome::Skipped {
            reason: SkipReason::LostRace
        })
    );
    assert!(h.model.requests().is_empty());
    assert!(h.sink.kinds().contains(&OmEventKind::LostRace));

    let record = h.memory.get_record(Some("t-1"), RESOURCE).unwrap().unwrap();
    assert_eq!(record.active_observations, "* 🔴 Observed by another process");
    assert!(!record.is_observing);
}

#[test]
fn finalize_observes_below_threshold_then_reports_no_backlog() {
    let h = in_memory(config(OmScope::Thread, 10_000, 100_000));
    h.memory
        .process_turn_output("t-1", RESOURCE, &[message("m-1", "t-1", 5, 180)])
        .unwrap();

    let options = FinalizeOptions::new(RESOURCE).with_thread("t-1");
    let report = h.memory.finalize(&options).unwrap();
    assert_eq!(observed(&report.cycle).observed_message_ids, vec!["m-1"]);
    assert!(report.final_reflection.is_none());

    let again = h.memory.finalize(&options).unwrap();
    assert_eq!(
        again.cycle,
        CycleOutcome::Skipped {
            reason: SkipReason::NoBacklog
        }
    );
    assert_eq!(h.model.calls(OmInferenceSource::Observer), 1);
}

#[test]
fn finalize_reflects_mid_backfill_when_the_window_fills() {
    let mut cfg = config(OmScope::Resource, 10_000, 20);
    cfg.observation.observe_future_only = false;
    let h = in_memory(cfg);
    h.memory
        .store()
        .save_messages(&[
            message("a-1", "t-a", 30, 84),
            message("b-1", "t-b", 20, 84),
            message("c-1", "t-c", 10, 84),
        ])
        .unwrap();

    let report = h
        .memory
        .finalize(&FinalizeOptions::new(RESOURCE).with_max_input_tokens(30))
        .unwrap();
    let cycle = observed(&report.cycle);
    assert_eq!(cycle.observed_threads, vec!["t-a", "t-b", "t-c"]);
    assert!(!report.mid_backfill_reflections.is_empty());
    assert_eq!(h.model.calls(OmInferenceSource::Observer), 3);

    let history = h.memory.get_history(None, RESOURCE, None).unwrap();
    let reflections = report.mid_backfill_reflections.len()
        + usize::from(matches!(
            report.final_reflection,
            Some(ReflectionOutcome::Reflected(_))
        ));
    assert_eq!(history.len(), 1 + reflections);
    let mid_events = h
        .sink
        .kinds()
        .into_iter()
        .filter(|kind| *kind == OmEventKind::MidBackfillReflection)
        .count();
    assert_eq!(mid_events, report.mid_backfill_reflections.len());

    let current = &history[0];
    assert!(!current.is_observing && !current.is_reflecting);
    assert_eq!(current.pending_message_tokens, 0);
    for thread in ["t-a", "t-b", "t-c"] {
        let meta = h.memory.store().get_thread_metadata(thread).unwrap().unwrap();
        assert!(meta.last_observed_at.is_some(), "{thread}");
    }
}

#[test]
fn turn_input_carries_memory_and_sibling_threads() {
    let mut cfg = config(OmScope::Resource, 10_000, 100_000);
    cfg.observation.observe_future_only = false;
    let h = in_memory(cfg);
    let a_turn = [message("a-1", "t-a", 30, 84)];
    h.memory
        .process_turn_output("t-a", RESOURCE, &a_turn)
        .unwrap();
    h.memory.observe(None, RESOURCE).unwrap();

    let sibling = OmMessage::new(
        "b-1",
        "t-b",
        RESOURCE,
        "assistant",
        "Booked the venue for Thursday",
        minutes_ago(5),
    );
    h.memory.store().save_messages(&[sibling]).unwrap();

    let mut messages = a_turn.to_vec();
    messages.push(message("a-2", "t-a", 1, 40));
    let injection = h
        .memory
        .process_turn_input("t-a", RESOURCE, &mut messages)
        .unwrap();
    assert_eq!(ids(&messages), vec!["a-2"]);
    assert_eq!(injection.folded_message_count, 1);
    assert_eq!(injection.current_task.as_deref(), Some("Task for t-a"));
    let others = injection.other_conversations.as_deref().unwrap();
    assert!(others.contains("t-b"));
    assert!(others.contains("Booked the venue for Thursday"));

    let rendered = injection.render().unwrap();
    assert!(rendered.contains("<thread id=\"t-a\">"));
    assert!(rendered.contains("Booked the venue"));
}

#[test]
fn clear_resets_a_resource() {
    let mut cfg = config(OmScope::Resource, 10_000, 100_000);
    cfg.observation.observe_future_only = false;
    let h = in_memory(cfg);
    h.memory
        .store()
        .save_messages(&[message("a-1", "t-a", 30, 84), message("b-1", "t-b", 20, 84)])
        .unwrap();
    h.memory.observe(None, RESOURCE).unwrap();

    h.memory.clear(None, RESOURCE).unwrap();
    assert!(h.memory.get_observations(None, RESOURCE).unwrap().is_none());
    assert!(h.memory.get_history(None, RESOURCE, None).unwrap().is_empty());
    for thread in ["t-a", "t-b"] {
        assert!(h.memory.store().get_thread_metadata(thread).unwrap().is_none());
    }

    // Without cursors the whole history is observed again.
    let outcome = h.memory.observe(None, RESOURCE).unwrap();
    assert_eq!(observed(&outcome).observed_message_ids.len(), 2);
}
