use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::om::model::OmMessage;

/// Stored timestamps carry millisecond precision; watermarks compare at the
/// same resolution.
#[must_use]
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::milliseconds(1)).unwrap_or(at)
}

/// Inclusive lower bound for "strictly after the watermark" queries.
#[must_use]
pub fn exclusive_start(watermark: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    watermark.map(|at| truncate_to_millis(at) + Duration::milliseconds(1))
}

#[must_use]
pub fn filter_after_watermark(
    messages: &[OmMessage],
    watermark: Option<DateTime<Utc>>,
) -> Vec<OmMessage> {
    let Some(start) = exclusive_start(watermark) else {
        return messages.to_vec();
    };
    messages
        .iter()
        .filter(|message| truncate_to_millis(message.created_at) >= start)
        .cloned()
        .collect()
}

#[must_use]
pub fn max_message_timestamp(messages: &[OmMessage]) -> Option<DateTime<Utc>> {
    messages
        .iter()
        .map(|message| truncate_to_millis(message.created_at))
        .max()
}

/// Watermarks never regress.
#[must_use]
pub fn advance_watermark(
    current: Option<DateTime<Utc>>,
    observed_max: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, observed_max) {
        (Some(current), Some(next)) => Some(current.max(next)),
        (current, None) => current,
        (None, next) => next,
    }
}

/// First-initialization watermark under the observe-future-only policy.
///
/// Turn hooks receive the whole thread history, so only the current turn is
/// new: it starts at the newest user message, or at the newest message when
/// the turn carries no user message. The seed lands just before that start
/// and never after `now`.
#[must_use]
pub fn seed_future_only_watermark(
    now: DateTime<Utc>,
    turn_messages: &[OmMessage],
) -> DateTime<Utc> {
    let now = truncate_to_millis(now);
    let turn_start = turn_messages
        .iter()
        .filter(|message| message.is_user())
        .map(|message| message.created_at)
        .max()
        .or_else(|| turn_messages.iter().map(|message| message.created_at).max());
    turn_start.map_or(now, |start| {
        (truncate_to_millis(start) - Duration::milliseconds(1)).min(now)
    })
}
