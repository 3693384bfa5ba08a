use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OmInferenceFailureKind, Result};
use crate::llm_io::{
    extract_llm_content, extract_llm_finish_reason, parse_llm_endpoint, parse_retry_after_ms,
    parse_u32_value,
};
use crate::om::failure::{om_inference_error, om_rate_limited_error, om_status_kind};

use super::{CompletionModel, CompletionRequest, CompletionResponse, OmInferenceUsage};

const CONTENT_POLICY_MARKERS: [&str; 3] = ["content_filter", "content_policy", "content policy"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCompletionModelConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_output_tokens: u32,
    pub temperature_milli: u16,
}

/// Blocking chat-completion client for OpenAI-compatible and Ollama-style
/// endpoints.
#[derive(Debug, Clone)]
pub struct HttpCompletionModel {
    client: Client,
    endpoint: Url,
    config: HttpCompletionModelConfig,
}

impl HttpCompletionModel {
    pub fn new(config: HttpCompletionModelConfig) -> Result<Self> {
        let endpoint = parse_llm_endpoint(&config.endpoint, "llm endpoint")
            .map_err(crate::error::ObsmemError::Validation)?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    fn payload(&self, request: &CompletionRequest) -> Value {
        let temperature = f64::from(self.config.temperature_milli) / 1000.0;
        serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt}
            ],
            "stream": false,
            "temperature": temperature,
            "max_tokens": self.config.max_output_tokens,
            "options": {
                "temperature": temperature,
                "num_predict": self.config.max_output_tokens
            }
        })
    }
}

fn mentions_content_policy(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    CONTENT_POLICY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

pub(super) fn parse_usage(value: &Value) -> OmInferenceUsage {
    let usage = value.get("usage");
    let field = |keys: &[&str], fallback: &str| {
        usage
            .and_then(|usage| keys.iter().find_map(|key| usage.get(*key)))
            .or_else(|| value.get(fallback))
            .and_then(parse_u32_value)
            .unwrap_or(0)
    };
    OmInferenceUsage::new(
        field(&["prompt_tokens", "input_tokens"], "prompt_eval_count"),
        field(&["completion_tokens", "output_tokens"], "eval_count"),
    )
}

impl CompletionModel for HttpCompletionModel {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let source = request.source;
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .json(&self.payload(request));
        if let Some(api_key) = self.config.api_key.as_deref().filter(|key| !key.is_empty()) {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder.send().map_err(|err| {
            om_inference_error(
                source,
                OmInferenceFailureKind::Transport,
                format!("request failed: {err}"),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| parse_retry_after_ms(raw, Utc::now()));
            let body = response.text().unwrap_or_default();
            let kind = om_status_kind(status);
            if kind == OmInferenceFailureKind::RateLimited {
                return Err(om_rate_limited_error(
                    source,
                    format!("rate limited: {status}"),
                    retry_after_ms,
                ));
            }
            if status.is_client_error() && mentions_content_policy(&body) {
                return Err(om_inference_error(
                    source,
                    OmInferenceFailureKind::ContentPolicy,
                    format!("rejected by content policy: {status}"),
                ));
            }
            return Err(om_inference_error(
                source,
                kind,
                format!("non-success status: {status}"),
            ));
        }

        let value = response.json::<Value>().map_err(|err| {
            om_inference_error(
                source,
                OmInferenceFailureKind::Schema,
                format!("invalid json response: {err}"),
            )
        })?;
        if extract_llm_finish_reason(&value).is_some_and(|reason| mentions_content_policy(&reason))
        {
            return Err(om_inference_error(
                source,
                OmInferenceFailureKind::ContentPolicy,
                "completion stopped by content filter",
            ));
        }
        let text = extract_llm_content(&value).ok_or_else(|| {
            om_inference_error(
                source,
                OmInferenceFailureKind::Schema,
                "response carries no completion text",
            )
        })?;
        Ok(CompletionResponse {
            text,
            usage: parse_usage(&value),
        })
    }
}
