//! Pure decision and text-merge functions used by the runtime. Nothing in
//! here touches storage or calls a model.

mod context;
mod cursor;
mod merge;
mod reflection;
mod selection;
mod threshold;

pub use context::{build_other_conversation_blocks, normalize_whitespace};
pub use cursor::{
    advance_watermark, exclusive_start, filter_after_watermark, max_message_timestamp,
    seed_future_only_watermark, truncate_to_millis,
};
pub use merge::{
    append_observations, first_date_header, latest_date_header, merge_patterns,
    merge_thread_observations,
};
pub use reflection::{
    reflector_compression_guidance, should_reflect_mid_backfill, should_trigger_reflector,
    validate_reflection_compression,
};
pub use selection::{
    ThreadBacklog, ThreadSelection, chunk_threads_by_token_cap, order_threads_for_fairness,
    select_threads_for_observation,
};
pub use threshold::{
    ObservationDecision, calculate_dynamic_threshold, decide_observation, should_trigger_observer,
};

#[cfg(test)]
mod tests;
