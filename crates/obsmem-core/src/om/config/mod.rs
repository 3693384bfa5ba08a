mod input;
mod resolve;
mod validate;

pub const DEFAULT_OBSERVER_MESSAGE_TOKENS: u32 = 30_000;
pub const DEFAULT_REFLECTOR_OBSERVATION_TOKENS: u32 = 40_000;
pub const DEFAULT_OBSERVER_MAX_TOKENS_PER_BATCH: u32 = 10_000;
pub const DEFAULT_REFLECTION_COMPRESSION_RATIO: f64 = 0.9;
pub const DEFAULT_BACKFILL_HEADROOM_RATIO: f64 = 0.7;
pub const DEFAULT_OTHER_CONVERSATION_MAX_PART_CHARS: usize = 500;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 15_000;

pub use input::{
    BatchMode, ObservationConfigInput, OmConfigInput, ReflectionConfigInput, RetryConfigInput,
    ThresholdInput,
};
pub use resolve::{
    ResolvedObservationConfig, ResolvedOmConfig, ResolvedReflectionConfig, ResolvedRetryConfig,
    ResolvedThreshold, resolve_om_config,
};
pub use validate::OmConfigError;
