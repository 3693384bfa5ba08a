use std::time::Duration;

use crate::om::{OmScope, calculate_dynamic_threshold};

use super::input::{BatchMode, OmConfigInput, ThresholdInput};
use super::validate::{
    OmConfigError, resolve_observation_threshold, resolve_reflection_threshold,
    validate_backfill_headroom_ratio, validate_compression_ratio,
    validate_observation_max_tokens_per_batch, validate_retry_max_attempts,
};
use super::{
    DEFAULT_BACKFILL_HEADROOM_RATIO, DEFAULT_OBSERVER_MAX_TOKENS_PER_BATCH,
    DEFAULT_OBSERVER_MESSAGE_TOKENS, DEFAULT_OTHER_CONVERSATION_MAX_PART_CHARS,
    DEFAULT_REFLECTION_COMPRESSION_RATIO, DEFAULT_REFLECTOR_OBSERVATION_TOKENS,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS,
};

/// Validated threshold; a fixed threshold has `min == max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedThreshold {
    pub min: u32,
    pub max: u32,
}

impl ResolvedThreshold {
    #[must_use]
    pub const fn fixed(value: u32) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    #[must_use]
    pub const fn is_range(&self) -> bool {
        self.min < self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedObservationConfig {
    pub message_tokens: ResolvedThreshold,
    pub max_tokens_per_batch: u32,
    pub batch_mode: BatchMode,
    pub observe_future_only: bool,
    pub other_conversation_max_part_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedReflectionConfig {
    pub observation_tokens: ResolvedThreshold,
    pub compression_ratio: f64,
    pub backfill_headroom_ratio: f64,
}

impl ResolvedReflectionConfig {
    /// Reflection fires above the upper bound of the configured threshold.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.observation_tokens.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl ResolvedRetryConfig {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedOmConfig {
    pub scope: OmScope,
    pub observation: ResolvedObservationConfig,
    pub reflection: ResolvedReflectionConfig,
    pub retry: ResolvedRetryConfig,
}

impl ResolvedOmConfig {
    /// Effective observation threshold for a generation currently holding
    /// `current_observation_tokens`.
    #[must_use]
    pub fn observation_threshold(&self, current_observation_tokens: u32) -> u32 {
        calculate_dynamic_threshold(
            self.observation.message_tokens,
            current_observation_tokens,
            self.reflection.threshold(),
        )
    }
}

impl Default for ResolvedOmConfig {
    fn default() -> Self {
        Self {
            scope: OmScope::Thread,
            observation: ResolvedObservationConfig {
                message_tokens: ResolvedThreshold::fixed(DEFAULT_OBSERVER_MESSAGE_TOKENS),
                max_tokens_per_batch: DEFAULT_OBSERVER_MAX_TOKENS_PER_BATCH,
                batch_mode: BatchMode::Sequential,
                observe_future_only: true,
                other_conversation_max_part_chars: DEFAULT_OTHER_CONVERSATION_MAX_PART_CHARS,
            },
            reflection: ResolvedReflectionConfig {
                observation_tokens: ResolvedThreshold::fixed(DEFAULT_REFLECTOR_OBSERVATION_TOKENS),
                compression_ratio: DEFAULT_REFLECTION_COMPRESSION_RATIO,
                backfill_headroom_ratio: DEFAULT_BACKFILL_HEADROOM_RATIO,
            },
            retry: ResolvedRetryConfig {
                max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
                base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            },
        }
    }
}

pub fn resolve_om_config(input: OmConfigInput) -> Result<ResolvedOmConfig, OmConfigError> {
    let message_tokens = resolve_observation_threshold(
        input
            .observation
            .message_tokens
            .unwrap_or(ThresholdInput::Fixed(DEFAULT_OBSERVER_MESSAGE_TOKENS)),
    )?;
    let observation_tokens = resolve_reflection_threshold(
        input
            .reflection
            .observation_tokens
            .unwrap_or(ThresholdInput::Fixed(DEFAULT_REFLECTOR_OBSERVATION_TOKENS)),
    )?;
    let max_tokens_per_batch = validate_observation_max_tokens_per_batch(
        input
            .observation
            .max_tokens_per_batch
            .unwrap_or(DEFAULT_OBSERVER_MAX_TOKENS_PER_BATCH),
    )?;
    let compression_ratio = validate_compression_ratio(
        input
            .reflection
            .compression_ratio
            .unwrap_or(DEFAULT_REFLECTION_COMPRESSION_RATIO),
    )?;
    let backfill_headroom_ratio = validate_backfill_headroom_ratio(
        input
            .reflection
            .backfill_headroom_ratio
            .unwrap_or(DEFAULT_BACKFILL_HEADROOM_RATIO),
    )?;
    let max_attempts = validate_retry_max_attempts(
        input
            .retry
            .max_attempts
            .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
    )?;

    Ok(ResolvedOmConfig {
        scope: input.scope,
        observation: ResolvedObservationConfig {
            message_tokens,
            max_tokens_per_batch,
            batch_mode: input.observation.batch_mode.unwrap_or_default(),
            observe_future_only: input.observation.observe_future_only.unwrap_or(true),
            other_conversation_max_part_chars: input
                .observation
                .other_conversation_max_part_chars
                .unwrap_or(DEFAULT_OTHER_CONVERSATION_MAX_PART_CHARS),
        },
        reflection: ResolvedReflectionConfig {
            observation_tokens,
            compression_ratio,
            backfill_headroom_ratio,
        },
        retry: ResolvedRetryConfig {
            max_attempts,
            base_delay_ms: input
                .retry
                .base_delay_ms
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
        },
    })
}
