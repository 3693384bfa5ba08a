#[must_use]
pub const fn should_trigger_reflector(observation_tokens: u32, threshold: u32) -> bool {
    observation_tokens > threshold
}

/// A reflection counts as compressed when it is below `ratio` of its input.
#[must_use]
pub fn validate_reflection_compression(
    reflected_tokens: u32,
    input_tokens: u32,
    compression_ratio: f64,
) -> bool {
    if input_tokens == 0 {
        return true;
    }
    f64::from(reflected_tokens) < compression_ratio * f64::from(input_tokens)
}

/// Whether finalize must reflect before observing the next thread.
#[must_use]
pub fn should_reflect_mid_backfill(
    observation_tokens: u32,
    max_input_tokens: u32,
    headroom_ratio: f64,
    reflection_threshold: u32,
) -> bool {
    f64::from(observation_tokens) >= headroom_ratio * f64::from(max_input_tokens)
        && should_trigger_reflector(observation_tokens, reflection_threshold)
}

#[must_use]
pub fn reflector_compression_guidance(level: u8) -> &'static str {
    match level.min(2) {
        1 => {
            "## COMPRESSION REQUIRED

The reflection you produced was not smaller than the observations it replaces.

Produce it again with tighter wording:
- Fold older observations into broader summary lines
- Keep recent observations closer to their original detail
- Merge entries that describe the same activity, keeping names, dates and outcomes
- Collapse repeated tool calls into one line stating how often and why they happened

Aim for roughly 80% of the current level of detail."
        }
        2 => {
            "## AGGRESSIVE COMPRESSION REQUIRED

Even after the previous guidance the reflection is still too large.

Rewrite it much more compactly:
- Summarize older observations into a few high-level lines
- Keep fine detail only for the most recent context
- Drop redundant or superseded entries and merge overlapping ones
- Never lose the names of people, places, projects or decisions

Aim for roughly 60% of the current level of detail."
        }
        _ => "",
    }
}
