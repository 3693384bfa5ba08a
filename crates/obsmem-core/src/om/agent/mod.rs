//! LLM-backed compression steps. A [`CompletionModel`] performs one
//! single-turn call; [`Observer`] and [`Reflector`] add prompting, retry,
//! parsing and (for the reflector) compression validation on top.

mod http;
mod observer;
mod reflector;
mod retry;

use serde::{Deserialize, Serialize};

use crate::error::{OmInferenceSource, Result};

pub use http::{HttpCompletionModel, HttpCompletionModelConfig};
pub use observer::{MultiThreadObserverOutput, Observer, ObserverInput, ObserverOutput};
pub use reflector::{Reflector, ReflectorInput, ReflectorOutput};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OmInferenceUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl OmInferenceUsage {
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }

    pub const fn add(&mut self, other: Self) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub source: OmInferenceSource,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: OmInferenceUsage,
}

/// One blocking single-turn completion. Failures must be reported as
/// `ObsmemError::OmInference` so the retry loop can classify them.
pub trait CompletionModel: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}
