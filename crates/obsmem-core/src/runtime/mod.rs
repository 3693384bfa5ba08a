//! Observational memory engine.
//!
//! [`ObservationalMemory`] wires a [`OmStore`], an Observer and a Reflector
//! model into the turn hooks (`process_turn_input` / `process_turn_output`),
//! the manual triggers (`observe`, `reflect`, `finalize`) and the read/admin
//! accessors. All cross-process coordination goes through the store's
//! compare-and-swap flags followed by a re-read of the current generation.

mod context;
mod cursor;
mod finalize;
mod observe;
mod reflect;
mod resource;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ObsmemConfig;
use crate::error::{ObsmemError, Result};
use crate::om::{
    CharEstimateTokenCounter, CompletionModel, HttpCompletionModel, InMemoryOmStore,
    ObservationDecision, Observer, OmEventSink, OmInferenceUsage, OmRecord, OmRecordKey, OmScope,
    OmStore, Reflector, ResolvedOmConfig, RetryPolicy, Sleeper, ThreadSleeper, TokenCounter,
    TracingEventSink,
};
use crate::state::SqliteStateStore;

pub use context::ContextInjection;
pub use finalize::{FinalizeOptions, FinalizeReport};

/// Why a cycle ended without writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another caller holds the flag.
    Busy,
    /// The generation moved on between the snapshot and the flag acquisition.
    LostRace,
    NoBacklog,
    NoObservations,
    /// The Reflector returned no observations; the generation is kept.
    EmptyReflection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflectionReport {
    pub previous_record_id: String,
    pub record_id: String,
    pub generation_count: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub observation_token_count: u32,
    pub compressed: bool,
    pub retried: bool,
    pub usage: OmInferenceUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReflectionOutcome {
    Reflected(ReflectionReport),
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationReport {
    /// Generation current after the cycle (a reflection may have replaced
    /// the one that was observed into).
    pub record_id: String,
    pub observed_threads: Vec<String>,
    pub deferred_threads: Vec<String>,
    pub observed_message_ids: Vec<String>,
    pub last_observed_at: Option<DateTime<Utc>>,
    pub observation_token_count: u32,
    pub pending_message_tokens: u32,
    pub usage: OmInferenceUsage,
    pub reflection: Option<ReflectionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Observed(ObservationReport),
    Skipped { reason: SkipReason },
}

impl CycleOutcome {
    #[must_use]
    pub const fn report(&self) -> Option<&ObservationReport> {
        match self {
            Self::Observed(report) => Some(report),
            Self::Skipped { .. } => None,
        }
    }
}

/// Result of `process_turn_output`: the threshold decision, and the cycle it
/// triggered when pending tokens crossed the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub scope_key: String,
    pub decision: ObservationDecision,
    pub cycle: Option<CycleOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Observing,
    Reflecting,
}

impl Flag {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Observing => "observing",
            Self::Reflecting => "reflecting",
        }
    }
}

pub struct ObservationalMemory {
    store: Arc<dyn OmStore>,
    observer_model: Arc<dyn CompletionModel>,
    reflector_model: Arc<dyn CompletionModel>,
    counter: Arc<dyn TokenCounter>,
    sink: Arc<dyn OmEventSink>,
    sleeper: Arc<dyn Sleeper>,
    config: ResolvedOmConfig,
}

impl std::fmt::Debug for ObservationalMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationalMemory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ObservationalMemory {
    /// Engine using `model` for both the Observer and the Reflector, the
    /// character-ratio token counter, no event sink and real sleeps.
    pub fn new(
        store: Arc<dyn OmStore>,
        model: Arc<dyn CompletionModel>,
        config: ResolvedOmConfig,
    ) -> Self {
        Self {
            store,
            observer_model: Arc::clone(&model),
            reflector_model: model,
            counter: Arc::new(CharEstimateTokenCounter),
            sink: Arc::new(crate::om::NoopEventSink),
            sleeper: Arc::new(ThreadSleeper),
            config,
        }
    }

    /// Builds the engine from file/env configuration: SQLite when a state
    /// path is configured (in-memory otherwise), HTTP models, and events
    /// forwarded to `tracing`.
    pub fn from_config(config: &ObsmemConfig) -> Result<Self> {
        let resolved = config.resolve_om()?;
        let store: Arc<dyn OmStore> = match config.state_path.as_ref() {
            Some(path) => Arc::new(SqliteStateStore::open(path)?),
            None => Arc::new(InMemoryOmStore::new()),
        };
        let observer = HttpCompletionModel::new(config.llm.observer_model_config())?;
        let reflector = HttpCompletionModel::new(config.llm.reflector_model_config())?;
        tracing::info!(
            scope = resolved.scope.as_str(),
            persistent = config.state_path.is_some(),
            "observational memory configured"
        );
        Ok(Self::new(store, Arc::new(observer), resolved)
            .with_reflector_model(Arc::new(reflector))
            .with_event_sink(Arc::new(TracingEventSink)))
    }

    #[must_use]
    pub fn with_reflector_model(mut self, model: Arc<dyn CompletionModel>) -> Self {
        self.reflector_model = model;
        self
    }

    #[must_use]
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn OmEventSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ResolvedOmConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn OmStore {
        self.store.as_ref()
    }

    /// Generation key for the configured scope. Thread scope needs a thread id;
    /// resource scope ignores it.
    pub fn record_key(&self, thread_id: Option<&str>, resource_id: &str) -> Result<OmRecordKey> {
        let resource_id = resource_id.trim();
        if resource_id.is_empty() {
            return Err(ObsmemError::Validation(
                "resource_id must not be empty".to_string(),
            ));
        }
        match self.config.scope {
            OmScope::Resource => Ok(OmRecordKey::resource(resource_id)),
            OmScope::Thread => {
                let thread_id = thread_id.map(str::trim).filter(|id| !id.is_empty()).ok_or_else(
                    || ObsmemError::Validation("thread scope requires a thread_id".to_string()),
                )?;
                Ok(OmRecordKey::thread(thread_id, resource_id))
            }
        }
    }

    /// Active observations of the current generation, if any.
    pub fn get_observations(
        &self,
        thread_id: Option<&str>,
        resource_id: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .get_record(thread_id, resource_id)?
            .map(|record| record.active_observations)
            .filter(|observations| !observations.trim().is_empty()))
    }

    pub fn get_record(
        &self,
        thread_id: Option<&str>,
        resource_id: &str,
    ) -> Result<Option<OmRecord>> {
        let key = self.record_key(thread_id, resource_id)?;
        self.store.get_latest_generation(&key)
    }

    /// Generations of the key, newest first.
    pub fn get_history(
        &self,
        thread_id: Option<&str>,
        resource_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<OmRecord>> {
        let key = self.record_key(thread_id, resource_id)?;
        self.store.get_history(&key, limit)
    }

    /// Drops the generation chain and the OM slice of the affected threads'
    /// metadata. Stored messages are left alone.
    pub fn clear(&self, thread_id: Option<&str>, resource_id: &str) -> Result<()> {
        let key = self.record_key(thread_id, resource_id)?;
        let threads = match key.thread_id.as_ref() {
            Some(thread_id) => vec![thread_id.clone()],
            None => self.store.list_resource_threads(&key.resource_id)?,
        };
        self.store.clear(&key)?;
        for thread in &threads {
            self.store.clear_thread_metadata(thread)?;
        }
        tracing::info!(
            scope_key = %key.scope_key(),
            threads = threads.len(),
            "observational memory cleared"
        );
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(self.config.retry)
    }

    fn observer<'a>(&'a self, scope_key: &'a str) -> Observer<'a> {
        Observer {
            model: self.observer_model.as_ref(),
            retry: self.retry_policy(),
            sleeper: self.sleeper.as_ref(),
            sink: self.sink.as_ref(),
            scope_key,
        }
    }

    fn reflector<'a>(&'a self, scope_key: &'a str) -> Reflector<'a> {
        Reflector {
            model: self.reflector_model.as_ref(),
            retry: self.retry_policy(),
            sleeper: self.sleeper.as_ref(),
            sink: self.sink.as_ref(),
            counter: self.counter.as_ref(),
            compression_ratio: self.config.reflection.compression_ratio,
            scope_key,
        }
    }

    fn try_set_flag(&self, flag: Flag, record_id: &str, value: bool) -> Result<bool> {
        match flag {
            Flag::Observing => self.store.try_set_observing_flag(record_id, value),
            Flag::Reflecting => self.store.try_set_reflecting_flag(record_id, value),
        }
    }

    /// Runs `work` while holding `flag` on `record_id`. Returns `None` when the
    /// flag was already held. The flag is released on every exit path.
    fn with_flag<T>(
        &self,
        flag: Flag,
        record_id: &str,
        work: impl FnOnce() -> Result<T>,
    ) -> Result<Option<T>> {
        if !self.try_set_flag(flag, record_id, true)? {
            tracing::debug!(record_id, flag = flag.as_str(), "flag already held");
            return Ok(None);
        }
        let outcome = work();
        let released = self.try_set_flag(flag, record_id, false);
        settle_flag(flag, record_id, outcome, released).map(Some)
    }

    /// Current generation of `key`; the store contract says it exists once
    /// a cycle has started.
    fn require_current(&self, key: &OmRecordKey) -> Result<OmRecord> {
        self.store
            .get_latest_generation(key)?
            .ok_or_else(|| ObsmemError::NotFound(format!("om generation for {}", key.scope_key())))
    }

    /// Whether `current` still is the generation `snapshot` was taken from
    /// with the same watermark.
    fn lost_race(snapshot: &OmRecord, current: &OmRecord) -> bool {
        current.id != snapshot.id || current.last_observed_at > snapshot.last_observed_at
    }
}

/// Combines the outcome of flagged work with the flag release. An error from
/// the work takes precedence over a release failure.
fn settle_flag<T>(
    flag: Flag,
    record_id: &str,
    outcome: Result<T>,
    released: Result<bool>,
) -> Result<T> {
    match (outcome, released) {
        (Err(err), released) => {
            if let Err(release_err) = released {
                tracing::warn!(
                    record_id,
                    flag = flag.as_str(),
                    error = %release_err,
                    "failed to release flag after error"
                );
            }
            Err(err)
        }
        (Ok(_), Err(release_err)) => Err(release_err),
        (Ok(value), Ok(_)) => Ok(value),
    }
}

#[cfg(test)]
mod tests;
