//! Crate-level configuration: engine thresholds plus the completion endpoint,
//! read from a TOML file and/or `OBSMEM_*` environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::om::{
    BatchMode, HttpCompletionModelConfig, OmConfigInput, OmScope, ResolvedOmConfig,
    ThresholdInput, resolve_om_config,
};

mod env;

use env::{
    EnvSource, ProcessEnv, read_env_bool, read_env_f64, read_env_u16, read_env_u32, read_env_u64,
    read_env_usize, read_non_empty_env,
};

const ENV_STATE_PATH: &str = "OBSMEM_STATE_PATH";
const ENV_OM_SCOPE: &str = "OBSMEM_OM_SCOPE";
const ENV_OM_MESSAGE_TOKENS: &str = "OBSMEM_OM_MESSAGE_TOKENS";
const ENV_OM_MESSAGE_TOKENS_MIN: &str = "OBSMEM_OM_MESSAGE_TOKENS_MIN";
const ENV_OM_MESSAGE_TOKENS_MAX: &str = "OBSMEM_OM_MESSAGE_TOKENS_MAX";
const ENV_OM_REFLECTION_TOKENS: &str = "OBSMEM_OM_REFLECTION_TOKENS";
const ENV_OM_MAX_TOKENS_PER_BATCH: &str = "OBSMEM_OM_MAX_TOKENS_PER_BATCH";
const ENV_OM_BATCH_MODE: &str = "OBSMEM_OM_BATCH_MODE";
const ENV_OM_OBSERVE_FUTURE_ONLY: &str = "OBSMEM_OM_OBSERVE_FUTURE_ONLY";
const ENV_OM_COMPRESSION_RATIO: &str = "OBSMEM_OM_COMPRESSION_RATIO";
const ENV_OM_BACKFILL_HEADROOM_RATIO: &str = "OBSMEM_OM_BACKFILL_HEADROOM_RATIO";
const ENV_OM_OTHER_CONVERSATION_MAX_PART_CHARS: &str =
    "OBSMEM_OM_OTHER_CONVERSATION_MAX_PART_CHARS";
const ENV_OM_RETRY_MAX_ATTEMPTS: &str = "OBSMEM_OM_RETRY_MAX_ATTEMPTS";
const ENV_OM_RETRY_BASE_DELAY_MS: &str = "OBSMEM_OM_RETRY_BASE_DELAY_MS";
const ENV_LLM_ENDPOINT: &str = "OBSMEM_LLM_ENDPOINT";
const ENV_LLM_MODEL: &str = "OBSMEM_LLM_MODEL";
const ENV_LLM_REFLECTOR_MODEL: &str = "OBSMEM_LLM_REFLECTOR_MODEL";
const ENV_LLM_API_KEY: &str = "OBSMEM_LLM_API_KEY";
const ENV_LLM_TIMEOUT_MS: &str = "OBSMEM_LLM_TIMEOUT_MS";
const ENV_LLM_MAX_OUTPUT_TOKENS: &str = "OBSMEM_LLM_MAX_OUTPUT_TOKENS";
const ENV_LLM_TEMPERATURE_MILLI: &str = "OBSMEM_LLM_TEMPERATURE_MILLI";

const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:11434/api/chat";
const DEFAULT_LLM_MODEL: &str = "qwen2.5:7b-instruct";
const DEFAULT_LLM_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_LLM_MAX_OUTPUT_TOKENS: u32 = 4_096;
const DEFAULT_LLM_TEMPERATURE_MILLI: u16 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfigInput {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Falls back to `model` when unset.
    pub reflector_model: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_output_tokens: Option<u32>,
    pub temperature_milli: Option<u16>,
}

impl LlmConfigInput {
    fn overlay_env(&mut self, env: &dyn EnvSource) {
        overlay(&mut self.endpoint, read_non_empty_env(env, ENV_LLM_ENDPOINT));
        overlay(&mut self.model, read_non_empty_env(env, ENV_LLM_MODEL));
        overlay(
            &mut self.reflector_model,
            read_non_empty_env(env, ENV_LLM_REFLECTOR_MODEL),
        );
        overlay(&mut self.api_key, read_non_empty_env(env, ENV_LLM_API_KEY));
        overlay(&mut self.timeout_ms, read_env_u64(env, ENV_LLM_TIMEOUT_MS));
        overlay(
            &mut self.max_output_tokens,
            read_env_u32(env, ENV_LLM_MAX_OUTPUT_TOKENS),
        );
        overlay(
            &mut self.temperature_milli,
            read_env_u16(env, ENV_LLM_TEMPERATURE_MILLI),
        );
    }

    fn model_config(&self, model: Option<&str>) -> HttpCompletionModelConfig {
        HttpCompletionModelConfig {
            endpoint: self
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()),
            model: model.unwrap_or(DEFAULT_LLM_MODEL).to_string(),
            api_key: self.api_key.clone(),
            timeout_ms: self.timeout_ms.unwrap_or(DEFAULT_LLM_TIMEOUT_MS),
            max_output_tokens: self
                .max_output_tokens
                .unwrap_or(DEFAULT_LLM_MAX_OUTPUT_TOKENS),
            temperature_milli: self
                .temperature_milli
                .unwrap_or(DEFAULT_LLM_TEMPERATURE_MILLI),
        }
    }

    #[must_use]
    pub fn observer_model_config(&self) -> HttpCompletionModelConfig {
        self.model_config(self.model.as_deref())
    }

    #[must_use]
    pub fn reflector_model_config(&self) -> HttpCompletionModelConfig {
        self.model_config(self.reflector_model.as_deref().or(self.model.as_deref()))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsmemConfig {
    /// SQLite database path; `None` means the caller picks a store.
    pub state_path: Option<PathBuf>,
    pub om: OmConfigInput,
    pub llm: LlmConfigInput,
}

impl ObsmemConfig {
    /// Defaults overlaid with `OBSMEM_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Environment variables win over values already present.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.overlay(&ProcessEnv)
    }

    fn overlay(mut self, env: &dyn EnvSource) -> Self {
        if let Some(path) = read_non_empty_env(env, ENV_STATE_PATH) {
            self.state_path = Some(PathBuf::from(path));
        }
        overlay_om_env(&mut self.om, env);
        self.llm.overlay_env(env);
        self
    }

    pub fn resolve_om(&self) -> Result<ResolvedOmConfig> {
        Ok(resolve_om_config(self.om)?)
    }
}

fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn overlay_om_env(om: &mut OmConfigInput, env: &dyn EnvSource) {
    if let Some(scope) = read_non_empty_env(env, ENV_OM_SCOPE)
        .and_then(|raw| OmScope::parse(&raw.to_ascii_lowercase()))
    {
        om.scope = scope;
    }
    let range = read_env_u32(env, ENV_OM_MESSAGE_TOKENS_MIN)
        .zip(read_env_u32(env, ENV_OM_MESSAGE_TOKENS_MAX));
    let message_tokens = match range {
        Some((min, max)) => Some(ThresholdInput::Range { min, max }),
        None => read_env_u32(env, ENV_OM_MESSAGE_TOKENS).map(ThresholdInput::Fixed),
    };
    overlay(&mut om.observation.message_tokens, message_tokens);
    overlay(
        &mut om.observation.max_tokens_per_batch,
        read_env_u32(env, ENV_OM_MAX_TOKENS_PER_BATCH),
    );
    overlay(
        &mut om.observation.batch_mode,
        read_non_empty_env(env, ENV_OM_BATCH_MODE).and_then(|raw| BatchMode::parse(&raw)),
    );
    overlay(
        &mut om.observation.observe_future_only,
        read_env_bool(env, ENV_OM_OBSERVE_FUTURE_ONLY),
    );
    overlay(
        &mut om.observation.other_conversation_max_part_chars,
        read_env_usize(env, ENV_OM_OTHER_CONVERSATION_MAX_PART_CHARS),
    );
    overlay(
        &mut om.reflection.observation_tokens,
        read_env_u32(env, ENV_OM_REFLECTION_TOKENS).map(ThresholdInput::Fixed),
    );
    overlay(
        &mut om.reflection.compression_ratio,
        read_env_f64(env, ENV_OM_COMPRESSION_RATIO),
    );
    overlay(
        &mut om.reflection.backfill_headroom_ratio,
        read_env_f64(env, ENV_OM_BACKFILL_HEADROOM_RATIO),
    );
    overlay(
        &mut om.retry.max_attempts,
        read_env_u32(env, ENV_OM_RETRY_MAX_ATTEMPTS),
    );
    overlay(
        &mut om.retry.base_delay_ms,
        read_env_u64(env, ENV_OM_RETRY_BASE_DELAY_MS),
    );
}
