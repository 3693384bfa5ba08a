use crate::error::{ObsmemError, OmInferenceFailureKind, OmInferenceSource};

pub fn om_inference_error(
    inference_source: OmInferenceSource,
    kind: OmInferenceFailureKind,
    message: impl Into<String>,
) -> ObsmemError {
    ObsmemError::OmInference {
        inference_source,
        kind,
        message: message.into(),
        retry_after_ms: None,
    }
}

pub fn om_rate_limited_error(
    inference_source: OmInferenceSource,
    message: impl Into<String>,
    retry_after_ms: Option<u64>,
) -> ObsmemError {
    ObsmemError::OmInference {
        inference_source,
        kind: OmInferenceFailureKind::RateLimited,
        message: message.into(),
        retry_after_ms,
    }
}

pub fn om_status_kind(status: reqwest::StatusCode) -> OmInferenceFailureKind {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        OmInferenceFailureKind::RateLimited
    } else if status.is_server_error() {
        OmInferenceFailureKind::Transport
    } else {
        OmInferenceFailureKind::Fatal
    }
}
