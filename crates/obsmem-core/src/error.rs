use serde::Serialize;
use thiserror::Error;

use crate::om::OmConfigError;

pub type Result<T> = std::result::Result<T, ObsmemError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OmInferenceSource {
    Observer,
    Reflector,
}

impl OmInferenceSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Reflector => "reflector",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OmInferenceFailureKind {
    RateLimited,
    ContentPolicy,
    Transport,
    Fatal,
    Schema,
}

impl OmInferenceFailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ContentPolicy => "content_policy",
            Self::Transport => "transport",
            Self::Fatal => "fatal",
            Self::Schema => "schema",
        }
    }
}

#[derive(Debug, Error)]
pub enum ObsmemError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] OmConfigError),

    #[error("{} inference failed ({}): {message}", inference_source.as_str(), kind.as_str())]
    OmInference {
        inference_source: OmInferenceSource,
        kind: OmInferenceFailureKind,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_key: Option<String>,
}

impl ObsmemError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Config(_) => "CONFIG_INVALID",
            Self::OmInference { kind, .. } => match kind {
                OmInferenceFailureKind::RateLimited => "OM_INFERENCE_RATE_LIMITED",
                OmInferenceFailureKind::ContentPolicy => "OM_INFERENCE_CONTENT_POLICY",
                OmInferenceFailureKind::Transport => "OM_INFERENCE_TRANSPORT",
                OmInferenceFailureKind::Fatal => "OM_INFERENCE_FATAL",
                OmInferenceFailureKind::Schema => "OM_INFERENCE_SCHEMA",
            },
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Toml(_) => "TOML_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Only provider rate limiting is retried by the compression adapters.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OmInference {
                kind: OmInferenceFailureKind::RateLimited,
                ..
            }
        )
    }

    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::OmInference { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    pub(crate) fn mutex_poisoned(label: &str) -> Self {
        Self::Internal(format!("{label} mutex poisoned"))
    }

    pub fn to_payload(
        &self,
        operation: impl Into<String>,
        scope_key: Option<String>,
    ) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            operation: operation.into(),
            scope_key,
        }
    }
}
