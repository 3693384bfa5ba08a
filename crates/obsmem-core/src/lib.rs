// Public fallible APIs in this crate share one concrete error contract (`ObsmemError`).
// Repeating per-function `# Errors` boilerplate obscures behavior more than it clarifies.
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod config;
pub mod error;
pub(crate) mod llm_io;
pub mod om;
pub mod runtime;
pub mod state;

pub use config::{LlmConfigInput, ObsmemConfig};
pub use error::{ObsmemError, Result};
pub use om::{
    CompletionModel, CompletionRequest, CompletionResponse, InMemoryOmStore, OmConfigInput,
    OmEvent, OmEventKind, OmEventSink, OmMessage, OmRecord, OmRecordKey, OmScope, OmStore,
    ResolvedOmConfig, TokenCounter,
};
pub use runtime::{
    ContextInjection, CycleOutcome, FinalizeOptions, FinalizeReport, ObservationReport,
    ObservationalMemory, ReflectionOutcome, ReflectionReport, SkipReason, TurnOutcome,
};
pub use state::SqliteStateStore;
