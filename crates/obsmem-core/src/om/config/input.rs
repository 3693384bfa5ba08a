use serde::{Deserialize, Serialize};

use crate::om::OmScope;

/// A fixed token threshold or a `{ min, max }` range interpolated against
/// how full the active generation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdInput {
    Fixed(u32),
    Range { min: u32, max: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Each batch sees the observations produced by the batches before it.
    #[default]
    Sequential,
    /// Batches run concurrently against the pre-cycle observations.
    Parallel,
}

impl BatchMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfigInput {
    pub message_tokens: Option<ThresholdInput>,
    pub max_tokens_per_batch: Option<u32>,
    pub batch_mode: Option<BatchMode>,
    pub observe_future_only: Option<bool>,
    pub other_conversation_max_part_chars: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfigInput {
    pub observation_tokens: Option<ThresholdInput>,
    pub compression_ratio: Option<f64>,
    pub backfill_headroom_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigInput {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OmConfigInput {
    pub scope: OmScope,
    pub observation: ObservationConfigInput,
    pub reflection: ReflectionConfigInput,
    pub retry: RetryConfigInput,
}

impl Default for OmConfigInput {
    fn default() -> Self {
        Self {
            scope: OmScope::Thread,
            observation: ObservationConfigInput::default(),
            reflection: ReflectionConfigInput::default(),
            retry: RetryConfigInput::default(),
        }
    }
}
