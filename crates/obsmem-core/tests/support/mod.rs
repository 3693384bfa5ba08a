#![allow(dead_code, reason = "each test binary uses a different subset of the helpers")]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use obsmem_core::error::OmInferenceSource;
use obsmem_core::om::{
    CompletionModel, CompletionRequest, CompletionResponse, MemoryEventSink, OmEventSink,
    OmInferenceUsage, OmMessage, OmScope, OmStore, ResolvedOmConfig, ResolvedThreshold, Sleeper,
    truncate_to_millis,
};
use obsmem_core::{ObservationalMemory, Result};

pub const RESOURCE: &str = "res-1";

const BATCH_MARKER: &str = "Thread ids in this batch: ";
const FILLER: &str = "user walked through the release checklist and the rollback plan";

/// Deterministic Observer/Reflector stand-in.
///
/// Observer calls get one bullet per call (per thread for batched prompts).
/// Reflector calls pop a queued reply and fall back to a short summary.
#[derive(Default)]
pub struct ScriptedModel {
    reflections: Mutex<VecDeque<String>>,
    skipped_threads: Mutex<HashSet<String>>,
    observer_calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn queue_reflection(&self, text: impl Into<String>) {
        self.reflections.lock().unwrap().push_back(text.into());
    }

    /// The Observer leaves this thread out of its batched answers.
    pub fn skip_thread(&self, thread_id: &str) {
        self.skipped_threads
            .lock()
            .unwrap()
            .insert(thread_id.to_string());
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, source: OmInferenceSource) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.source == source)
            .count()
    }

    fn observe(&self, request: &CompletionRequest) -> String {
        let call = self.observer_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(position) = request.user_prompt.rfind(BATCH_MARKER) else {
            return format!(
                "<observations>\n* 🔴 Observation {call}: {FILLER}\n</observations>\n<current-task>Ship release {call}</current-task>\n<suggested-response>Confirm the rollback owner</suggested-response>"
            );
        };
        let skipped = self.skipped_threads.lock().unwrap().clone();
        let blocks = request.user_prompt[position + BATCH_MARKER.len()..]
            .trim()
            .trim_end_matches('.')
            .split(", ")
            .filter(|thread_id| !skipped.contains(*thread_id))
            .map(|thread_id| {
                format!(
                    "<thread id=\"{thread_id}\">\n* 🔴 {thread_id} observation {call}: {FILLER}\n<current-task>Task for {thread_id}</current-task>\n</thread>"
                )
            })
            .collect::<Vec<_>>();
        format!("<observations>\n{}\n</observations>", blocks.join("\n"))
    }
}

impl CompletionModel for ScriptedModel {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let text = match request.source {
            OmInferenceSource::Observer => self.observe(request),
            OmInferenceSource::Reflector => self
                .reflections
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    "<observations>\n* 🔴 Release work condensed\n</observations>".to_string()
                }),
        };
        Ok(CompletionResponse {
            text,
            usage: OmInferenceUsage::new(100, 20),
        })
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub struct Harness {
    pub memory: ObservationalMemory,
    pub model: Arc<ScriptedModel>,
    pub sink: Arc<MemoryEventSink>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    pub fn new(store: Arc<dyn OmStore>, config: ResolvedOmConfig) -> Self {
        let model = Arc::new(ScriptedModel::default());
        let sink = Arc::new(MemoryEventSink::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let memory = ObservationalMemory::new(
            store,
            Arc::clone(&model) as Arc<dyn CompletionModel>,
            config,
        )
        .with_event_sink(Arc::clone(&sink) as Arc<dyn OmEventSink>)
        .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>);
        Self {
            memory,
            model,
            sink,
            sleeper,
        }
    }
}

pub fn config(scope: OmScope, message_tokens: u32, reflection_tokens: u32) -> ResolvedOmConfig {
    let mut config = ResolvedOmConfig::default();
    config.scope = scope;
    config.observation.message_tokens = ResolvedThreshold::fixed(message_tokens);
    config.reflection.observation_tokens = ResolvedThreshold::fixed(reflection_tokens);
    config
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    truncate_to_millis(Utc::now() - chrono::Duration::minutes(minutes))
}

/// A user message whose content costs `content_chars / 4` tokens (rounded
/// up); with role and per-message overhead it costs five more.
pub fn message(id: &str, thread_id: &str, minutes: i64, content_chars: usize) -> OmMessage {
    OmMessage::new(
        id,
        thread_id,
        RESOURCE,
        "user",
        "x".repeat(content_chars),
        minutes_ago(minutes),
    )
}

/// An assistant reply; "assistant" costs three tokens against the user's one.
pub fn reply(id: &str, thread_id: &str, minutes: i64, content_chars: usize) -> OmMessage {
    let mut message = message(id, thread_id, minutes, content_chars);
    message.role = "assistant".to_string();
    message
}

pub fn ids(messages: &[OmMessage]) -> Vec<String> {
    messages.iter().map(|message| message.id.clone()).collect()
}
