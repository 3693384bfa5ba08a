use serde::Serialize;

use crate::om::config::ResolvedThreshold;

/// Interpolates a ranged threshold toward `min` as the active generation
/// approaches the reflection limit. Fixed thresholds are returned as-is.
#[must_use]
pub fn calculate_dynamic_threshold(
    threshold: ResolvedThreshold,
    current_observation_tokens: u32,
    reflection_threshold: u32,
) -> u32 {
    if !threshold.is_range() || reflection_threshold == 0 {
        return threshold.max;
    }
    let fullness =
        (f64::from(current_observation_tokens) / f64::from(reflection_threshold)).min(1.0);
    let span = f64::from(threshold.max - threshold.min);
    let reduction = (fullness * span).round().clamp(0.0, span);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "reduction is clamped to [0, max - min] before the cast"
    )]
    let reduction = reduction as u32;
    threshold.max.saturating_sub(reduction).max(threshold.min)
}

#[must_use]
pub const fn should_trigger_observer(total_pending: u32, threshold: u32) -> bool {
    total_pending > threshold
}

/// Outcome of the pending-token bookkeeping for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObservationDecision {
    pub threshold: u32,
    pub total_pending: u32,
    pub should_observe: bool,
}

#[must_use]
pub const fn decide_observation(
    stored_pending_tokens: u32,
    unobserved_tokens: u32,
    threshold: u32,
) -> ObservationDecision {
    let total_pending = stored_pending_tokens.saturating_add(unobserved_tokens);
    ObservationDecision {
        threshold,
        total_pending,
        should_observe: should_trigger_observer(total_pending, threshold),
    }
}
