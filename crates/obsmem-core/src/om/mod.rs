//! Observational memory building blocks: the generation data model, the
//! pure transforms, the prompt/parse layer, the Observer and Reflector
//! adapters and the storage boundary. The engine that drives them lives in
//! `crate::runtime`.

mod agent;
mod config;
mod failure;
mod model;
mod parse;
mod prompt;
mod sink;
pub(crate) mod store;
mod tokens;
mod transform;
mod xml;

pub use agent::{
    CompletionModel, CompletionRequest, CompletionResponse, HttpCompletionModel,
    HttpCompletionModelConfig, MultiThreadObserverOutput, Observer, ObserverInput,
    ObserverOutput, OmInferenceUsage, Reflector, ReflectorInput, ReflectorOutput, RetryPolicy,
    Sleeper, ThreadSleeper,
};
pub use config::{
    BatchMode, DEFAULT_BACKFILL_HEADROOM_RATIO, DEFAULT_OBSERVER_MAX_TOKENS_PER_BATCH,
    DEFAULT_OBSERVER_MESSAGE_TOKENS, DEFAULT_OTHER_CONVERSATION_MAX_PART_CHARS,
    DEFAULT_REFLECTION_COMPRESSION_RATIO, DEFAULT_REFLECTOR_OBSERVATION_TOKENS,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS, ObservationConfigInput,
    OmConfigError, OmConfigInput, ReflectionConfigInput, ResolvedObservationConfig,
    ResolvedOmConfig, ResolvedReflectionConfig, ResolvedRetryConfig, ResolvedThreshold,
    RetryConfigInput, ThresholdInput, resolve_om_config,
};
pub use failure::{om_inference_error, om_rate_limited_error, om_status_kind};
pub use model::{
    OmMessage, OmOriginType, OmPatterns, OmRecord, OmRecordKey, OmRecordMetadata, OmScope,
    THREAD_METADATA_NAMESPACE, THREAD_METADATA_VERSION, ThreadOmMetadata,
    ThreadOmMetadataUpdate,
};
pub use parse::{
    OmMemorySection, OmMultiThreadObserverSection, OmParseMode, OmThreadObservation,
    demultiplex_thread_sections, extract_list_items_only, parse_memory_section_xml,
    parse_memory_section_xml_accuracy_first, parse_multi_thread_observer_output,
    parse_multi_thread_observer_output_accuracy_first, render_patterns_block,
};
pub use prompt::{
    OmMultiThreadObserverPromptInput, OmObserverPromptInput, OmObserverThreadMessages,
    OmReflectorPromptInput, build_multi_thread_observer_system_prompt,
    build_multi_thread_observer_user_prompt, build_observer_system_prompt,
    build_observer_user_prompt, build_reflector_system_prompt, build_reflector_user_prompt,
    format_multi_thread_observer_messages_for_prompt, format_observer_messages_for_prompt,
};
pub use sink::{
    MemoryEventSink, NoopEventSink, OmEvent, OmEventKind, OmEventSink, TracingEventSink,
};
pub use store::{
    ActiveObservationsUpdate, InMemoryOmStore, OmRecordInit, OmStore, ReflectionGenerationInput,
};
pub use tokens::{
    CharEstimateTokenCounter, TOKENS_PER_CONVERSATION, TOKENS_PER_MESSAGE, TokenCounter,
    count_generation_tokens,
};
pub use transform::{
    ObservationDecision, ThreadBacklog, ThreadSelection, advance_watermark, append_observations,
    build_other_conversation_blocks, calculate_dynamic_threshold, chunk_threads_by_token_cap,
    decide_observation, exclusive_start, filter_after_watermark, first_date_header,
    latest_date_header, max_message_timestamp, merge_patterns, merge_thread_observations,
    normalize_whitespace, order_threads_for_fairness, reflector_compression_guidance,
    seed_future_only_watermark, select_threads_for_observation, should_reflect_mid_backfill,
    should_trigger_observer, should_trigger_reflector, truncate_to_millis,
    validate_reflection_compression,
};
pub use xml::{escape_xml_attribute, escape_xml_text, unescape_xml};
