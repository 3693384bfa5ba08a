use thiserror::Error;

use super::input::ThresholdInput;
use super::resolve::ResolvedThreshold;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OmConfigError {
    #[error("invalid observation.message_tokens: must be > 0")]
    InvalidObservationMessageTokens,
    #[error("invalid observation.message_tokens range: min must be <= max")]
    InvalidObservationThresholdRange,
    #[error("invalid reflection.observation_tokens: must be > 0")]
    InvalidReflectionObservationTokens,
    #[error("invalid reflection.observation_tokens range: min must be <= max")]
    InvalidReflectionThresholdRange,
    #[error("invalid observation.max_tokens_per_batch: must be > 0")]
    InvalidObservationMaxTokensPerBatch,
    #[error("invalid reflection.compression_ratio: must be in (0, 1]")]
    InvalidCompressionRatio,
    #[error("invalid reflection.backfill_headroom_ratio: must be in (0, 1]")]
    InvalidBackfillHeadroomRatio,
    #[error("invalid retry.max_attempts: must be in [1, 10]")]
    InvalidRetryMaxAttempts,
}

fn resolve_threshold(
    input: ThresholdInput,
    zero_error: OmConfigError,
    range_error: OmConfigError,
) -> Result<ResolvedThreshold, OmConfigError> {
    let (min, max) = match input {
        ThresholdInput::Fixed(value) => (value, value),
        ThresholdInput::Range { min, max } => (min, max),
    };
    if min == 0 || max == 0 {
        return Err(zero_error);
    }
    if min > max {
        return Err(range_error);
    }
    Ok(ResolvedThreshold { min, max })
}

pub(super) fn resolve_observation_threshold(
    input: ThresholdInput,
) -> Result<ResolvedThreshold, OmConfigError> {
    resolve_threshold(
        input,
        OmConfigError::InvalidObservationMessageTokens,
        OmConfigError::InvalidObservationThresholdRange,
    )
}

pub(super) fn resolve_reflection_threshold(
    input: ThresholdInput,
) -> Result<ResolvedThreshold, OmConfigError> {
    resolve_threshold(
        input,
        OmConfigError::InvalidReflectionObservationTokens,
        OmConfigError::InvalidReflectionThresholdRange,
    )
}

pub(super) const fn validate_observation_max_tokens_per_batch(
    value: u32,
) -> Result<u32, OmConfigError> {
    if value == 0 {
        Err(OmConfigError::InvalidObservationMaxTokensPerBatch)
    } else {
        Ok(value)
    }
}

fn is_unit_ratio(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value <= 1.0
}

pub(super) fn validate_compression_ratio(value: f64) -> Result<f64, OmConfigError> {
    if is_unit_ratio(value) {
        Ok(value)
    } else {
        Err(OmConfigError::InvalidCompressionRatio)
    }
}

pub(super) fn validate_backfill_headroom_ratio(value: f64) -> Result<f64, OmConfigError> {
    if is_unit_ratio(value) {
        Ok(value)
    } else {
        Err(OmConfigError::InvalidBackfillHeadroomRatio)
    }
}

pub(super) const fn validate_retry_max_attempts(value: u32) -> Result<u32, OmConfigError> {
    if value == 0 || value > 10 {
        Err(OmConfigError::InvalidRetryMaxAttempts)
    } else {
        Ok(value)
    }
}
