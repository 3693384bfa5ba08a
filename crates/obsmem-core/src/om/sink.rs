//! Injectable observability sink. The engine reports every non-fatal
//! decision here; the default sink drops them.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ObsmemError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmEventKind {
    ObservationStarted,
    ObservationSkipped,
    ObservationCompleted,
    LostRace,
    ThreadNotAddressed,
    ReflectionStarted,
    ReflectionCompleted,
    ReflectionSkipped,
    CompressionRetry,
    CompressionNotAchieved,
    RateLimitRetry,
    ContentPolicyRejected,
    MidBackfillReflection,
}

impl OmEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ObservationStarted => "observation_started",
            Self::ObservationSkipped => "observation_skipped",
            Self::ObservationCompleted => "observation_completed",
            Self::LostRace => "lost_race",
            Self::ThreadNotAddressed => "thread_not_addressed",
            Self::ReflectionStarted => "reflection_started",
            Self::ReflectionCompleted => "reflection_completed",
            Self::ReflectionSkipped => "reflection_skipped",
            Self::CompressionRetry => "compression_retry",
            Self::CompressionNotAchieved => "compression_not_achieved",
            Self::RateLimitRetry => "rate_limit_retry",
            Self::ContentPolicyRejected => "content_policy_rejected",
            Self::MidBackfillReflection => "mid_backfill_reflection",
        }
    }

    /// Kinds that indicate degraded compression rather than routine progress.
    #[must_use]
    pub const fn is_warning(self) -> bool {
        matches!(
            self,
            Self::CompressionNotAchieved
                | Self::ContentPolicyRejected
                | Self::ThreadNotAddressed
                | Self::ReflectionSkipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmEvent {
    pub kind: OmEventKind,
    pub scope_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl OmEvent {
    #[must_use]
    pub fn new(kind: OmEventKind, scope_key: impl Into<String>) -> Self {
        Self {
            kind,
            scope_key: scope_key.into(),
            thread_id: None,
            at: Utc::now(),
            detail: Value::Null,
        }
    }

    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

pub trait OmEventSink: Send + Sync {
    fn record(&self, event: &OmEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl OmEventSink for NoopEventSink {
    fn record(&self, _event: &OmEvent) {}
}

/// Forwards events to `tracing`; warnings go out at `warn`, the rest at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl OmEventSink for TracingEventSink {
    fn record(&self, event: &OmEvent) {
        let thread_id = event.thread_id.as_deref().unwrap_or("");
        if event.kind.is_warning() {
            tracing::warn!(
                kind = event.kind.as_str(),
                scope_key = %event.scope_key,
                thread_id,
                detail = %event.detail,
                "observational memory event"
            );
        } else {
            tracing::debug!(
                kind = event.kind.as_str(),
                scope_key = %event.scope_key,
                thread_id,
                detail = %event.detail,
                "observational memory event"
            );
        }
    }
}

/// Buffers events in memory for tests and post-mortem dumps.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<OmEvent>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<OmEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<OmEventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }

    pub fn drain(&self) -> Vec<OmEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }

    /// Appends the buffered events to `path` as JSON lines and clears the buffer.
    pub fn write_jsonl(&self, path: &Path) -> Result<usize> {
        let events = {
            let mut guard = self
                .events
                .lock()
                .map_err(|_| ObsmemError::mutex_poisoned("om event sink"))?;
            std::mem::take(&mut *guard)
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        for event in &events {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(events.len())
    }
}

impl OmEventSink for MemoryEventSink {
    fn record(&self, event: &OmEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
