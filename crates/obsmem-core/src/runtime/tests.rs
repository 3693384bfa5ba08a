use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};

use super::*;
use crate::error::OmInferenceSource;
use crate::om::{
    CompletionRequest, CompletionResponse, MemoryEventSink, OmEventKind, OmMessage, OmPatterns,
    ResolvedThreshold, truncate_to_millis,
};

/// Answers every Observer call with one bullet and a task hint, and every
/// Reflector call with a short summary. Can be switched to fail.
#[derive(Default)]
struct EchoModel {
    failing: AtomicBool,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl EchoModel {
    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl CompletionModel for EchoModel {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(ObsmemError::Internal("model offline".to_string()));
        }
        let text = match request.source {
            OmInferenceSource::Observer => {
                "<observations>\n* 🔴 User is drafting a memo\n</observations>\n<current-task>Draft the memo</current-task>"
            }
            OmInferenceSource::Reflector => "<observations>\n* Memo drafted\n</observations>",
        };
        Ok(CompletionResponse {
            text: text.to_string(),
            usage: OmInferenceUsage::new(10, 5),
        })
    }
}

fn config(scope: OmScope, message_tokens: u32) -> ResolvedOmConfig {
    let mut config = ResolvedOmConfig::default();
    config.scope = scope;
    config.observation.message_tokens = ResolvedThreshold::fixed(message_tokens);
    config
}

fn engine(scope: OmScope, message_tokens: u32) -> (ObservationalMemory, Arc<EchoModel>) {
    let model = Arc::new(EchoModel::default());
    let memory = ObservationalMemory::new(
        Arc::new(InMemoryOmStore::new()),
        Arc::clone(&model) as Arc<dyn CompletionModel>,
        config(scope, message_tokens),
    );
    (memory, model)
}

fn message(id: &str, thread: &str, minutes_ago: i64, content: &str) -> OmMessage {
    OmMessage::new(
        id,
        thread,
        "res-1",
        "user",
        content,
        truncate_to_millis(Utc::now() - Duration::minutes(minutes_ago)),
    )
}

#[test]
fn record_key_follows_scope() {
    let (thread_memory, _) = engine(OmScope::Thread, 100);
    let key = thread_memory.record_key(Some(" t-1 "), "res-1").unwrap();
    assert_eq!(key.scope_key(), OmRecordKey::thread("t-1", "res-1").scope_key());
    let err = thread_memory.record_key(None, "res-1").unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let (resource_memory, _) = engine(OmScope::Resource, 100);
    let key = resource_memory.record_key(Some("t-1"), "res-1").unwrap();
    assert_eq!(key, OmRecordKey::resource("res-1"));
    assert!(resource_memory.record_key(Some("t-1"), "  ").is_err());
}

#[test]
fn turn_messages_must_belong_to_the_reported_thread() {
    let (memory, model) = engine(OmScope::Thread, 100);
    let stray = message("m-1", "t-2", 5, "hello");
    let err = memory
        .process_turn_output("t-1", "res-1", &[stray])
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
    assert!(memory.get_record(Some("t-1"), "res-1").unwrap().is_none());
    assert_eq!(model.calls(), 0);
}

#[test]
fn settle_flag_prefers_the_work_error() {
    let outcome: Result<u32> = Err(ObsmemError::Validation("work failed".to_string()));
    let released = Err(ObsmemError::Internal("release failed".to_string()));
    let err = settle_flag(Flag::Observing, "rec-1", outcome, released).unwrap_err();
    assert!(matches!(err, ObsmemError::Validation(_)));

    let released = Err(ObsmemError::Internal("release failed".to_string()));
    let err = settle_flag(Flag::Reflecting, "rec-1", Ok(7u32), released).unwrap_err();
    assert!(matches!(err, ObsmemError::Internal(_)));

    assert_eq!(
        settle_flag(Flag::Observing, "rec-1", Ok(7u32), Ok(true)).unwrap(),
        7
    );
}

#[test]
fn observer_failure_releases_the_observing_flag() {
    let (memory, model) = engine(OmScope::Thread, 10);
    model.failing.store(true, Ordering::SeqCst);
    let turn = [message("m-1", "t-1", 1, &"a".repeat(200))];
    assert!(memory.process_turn_output("t-1", "res-1", &turn).is_err());

    let record = memory.get_record(Some("t-1"), "res-1").unwrap().unwrap();
    assert!(!record.is_observing);
    assert!(!record.is_reflecting);

    model.failing.store(false, Ordering::SeqCst);
    let outcome = memory.observe(Some("t-1"), "res-1").unwrap();
    assert_eq!(
        outcome.report().unwrap().observed_message_ids,
        vec!["m-1".to_string()]
    );
}

#[test]
fn repeated_turn_messages_are_not_counted_twice() {
    let (memory, model) = engine(OmScope::Thread, 10_000);
    let first = [message("m-1", "t-1", 3, &"a".repeat(400))];
    let outcome = memory.process_turn_output("t-1", "res-1", &first).unwrap();
    let after_first = outcome.decision.total_pending;
    assert!(after_first > 0);

    let second = [
        first[0].clone(),
        message("m-2", "t-1", 2, &"b".repeat(400)),
    ];
    let outcome = memory.process_turn_output("t-1", "res-1", &second).unwrap();
    let added = memory
        .counter
        .count_messages(std::slice::from_ref(&second[1]));
    assert_eq!(outcome.decision.total_pending, after_first + added);
    assert_eq!(model.calls(), 0);
}

#[test]
fn manual_observe_on_a_new_key_reads_the_full_history() {
    let (memory, _) = engine(OmScope::Thread, 10_000);
    let history = [
        message("m-1", "t-1", 600, "old question"),
        message("m-2", "t-1", 590, "old answer"),
    ];
    memory.store().save_messages(&history).unwrap();

    let outcome = memory.observe(Some("t-1"), "res-1").unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.observed_message_ids, vec!["m-1", "m-2"]);
    assert_eq!(report.last_observed_at, Some(history[1].created_at));
}

#[test]
fn turn_hook_seeds_a_future_only_watermark() {
    let (memory, _) = engine(OmScope::Thread, 10_000);
    memory
        .store()
        .save_messages(&[message("m-old", "t-1", 600, "before memory was enabled")])
        .unwrap();

    let turn = [message("m-new", "t-1", 1, "first observed turn")];
    memory.process_turn_output("t-1", "res-1", &turn).unwrap();
    let record = memory.get_record(Some("t-1"), "res-1").unwrap().unwrap();
    assert_eq!(
        record.last_observed_at,
        Some(turn[0].created_at - Duration::milliseconds(1))
    );

    let outcome = memory.observe(Some("t-1"), "res-1").unwrap();
    assert_eq!(
        outcome.report().unwrap().observed_message_ids,
        vec!["m-new".to_string()]
    );
}

#[test]
fn resource_initialization_seeds_existing_threads_only() {
    let (memory, _) = engine(OmScope::Resource, 10_000);
    memory
        .store()
        .save_messages(&[message("b-old", "t-b", 600, "older thread")])
        .unwrap();

    let turn = [message("a-1", "t-a", 1, "hello")];
    memory.process_turn_output("t-a", "res-1", &turn).unwrap();
    let seed = turn[0].created_at - Duration::milliseconds(1);
    for thread in ["t-a", "t-b"] {
        let metadata = memory.store().get_thread_metadata(thread).unwrap().unwrap();
        assert_eq!(metadata.last_observed_at, Some(seed), "{thread}");
    }

    // A thread that shows up later has no cursor and is read from its start.
    memory
        .store()
        .save_messages(&[message("c-1", "t-c", 700, "late thread")])
        .unwrap();
    let outcome = memory.observe(None, "res-1").unwrap();
    let report = outcome.report().unwrap();
    assert!(report.observed_message_ids.contains(&"c-1".to_string()));
    assert!(report.observed_message_ids.contains(&"a-1".to_string()));
    assert!(!report.observed_message_ids.contains(&"b-old".to_string()));
}

#[test]
fn should_observe_is_a_dry_run() {
    let (memory, model) = engine(OmScope::Thread, 10);
    let turn = [message("m-1", "t-1", 1, &"a".repeat(400))];
    let decision = memory.should_observe("t-1", "res-1", &turn).unwrap();
    assert!(decision.should_observe);
    assert!(memory.get_record(Some("t-1"), "res-1").unwrap().is_none());
    assert!(
        memory
            .store()
            .list_messages_since(&OmRecordKey::thread("t-1", "res-1"), None)
            .unwrap()
            .is_empty()
    );
    assert_eq!(model.calls(), 0);
}

#[test]
fn busy_observing_flag_skips_the_cycle() {
    let (memory, model) = engine(OmScope::Thread, 10);
    let sink = Arc::new(MemoryEventSink::new());
    let memory = memory.with_event_sink(Arc::clone(&sink) as Arc<dyn OmEventSink>);
    let key = OmRecordKey::thread("t-1", "res-1");
    let record = memory.get_or_init_record(&key, None).unwrap();
    assert!(memory.store().try_set_observing_flag(&record.id, true).unwrap());

    let outcome = memory.observe(Some("t-1"), "res-1").unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Skipped {
            reason: SkipReason::Busy
        }
    );
    assert_eq!(sink.kinds(), vec![OmEventKind::ObservationSkipped]);
    assert_eq!(model.calls(), 0);
}

#[test]
fn context_injection_renders_sections_in_order() {
    let mut patterns = OmPatterns::new();
    patterns.insert("tools".to_string(), vec!["prefers ripgrep".to_string()]);
    let injection = ContextInjection {
        scope_key: "thread:res-1:t-1".to_string(),
        observations: Some("* 🔴 User ships on Fridays".to_string()),
        patterns,
        current_task: Some("Fix <b> tag".to_string()),
        suggested_continuation: Some("Ask about tests".to_string()),
        other_conversations: Some("<other-conversation id=\"t-2\">\nhi\n</other-conversation>".to_string()),
        folded_message_count: 0,
    };
    let rendered = injection.render().unwrap();
    let order = [
        MEMORY_PREAMBLE_PREFIX,
        "<observations>",
        "<patterns>",
        "<current-task>",
        "<suggested-response>",
        "<other-conversation",
    ]
    .map(|needle| rendered.find(needle).unwrap());
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{rendered}");
    assert!(rendered.contains("Fix &lt;b&gt; tag"));

    assert!(ContextInjection::default().render().is_none());
}

const MEMORY_PREAMBLE_PREFIX: &str = "The following observations are your memory";

#[test]
fn process_turn_input_drops_folded_messages() {
    let (memory, _) = engine(OmScope::Thread, 10);
    let mut answer = message("m-2", "t-1", 2, &"b".repeat(200));
    answer.role = "assistant".to_string();
    let turn = [message("m-1", "t-1", 3, &"a".repeat(200)), answer];
    memory.process_turn_output("t-1", "res-1", &turn).unwrap();

    let mut next = turn.to_vec();
    next.push(message("m-3", "t-1", 0, "what next?"));
    let injection = memory
        .process_turn_input("t-1", "res-1", &mut next)
        .unwrap();
    assert_eq!(
        next.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["m-3"]
    );
    assert_eq!(injection.folded_message_count, 2);
    assert_eq!(injection.current_task.as_deref(), Some("Draft the memo"));
    assert!(
        injection
            .observations
            .as_deref()
            .unwrap()
            .contains("drafting a memo")
    );
}

#[test]
fn clear_drops_the_chain_and_thread_hints() {
    let (memory, _) = engine(OmScope::Thread, 10);
    let turn = [message("m-1", "t-1", 1, &"a".repeat(200))];
    memory.process_turn_output("t-1", "res-1", &turn).unwrap();
    assert!(memory.store().get_thread_metadata("t-1").unwrap().is_some());

    memory.clear(Some("t-1"), "res-1").unwrap();
    assert!(memory.get_record(Some("t-1"), "res-1").unwrap().is_none());
    assert!(memory.get_history(Some("t-1"), "res-1", None).unwrap().is_empty());
    assert!(memory.store().get_thread_metadata("t-1").unwrap().is_none());
    assert_eq!(
        memory
            .store()
            .list_messages_since(&OmRecordKey::thread("t-1", "res-1"), None)
            .unwrap()
            .len(),
        1
    );
}
