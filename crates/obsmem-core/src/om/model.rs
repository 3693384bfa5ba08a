use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named, ordered fact lists carried next to the free-text observations.
pub type OmPatterns = BTreeMap<String, Vec<String>>;

pub const THREAD_METADATA_NAMESPACE: &str = "observational_memory";
pub const THREAD_METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmScope {
    Thread,
    Resource,
}

impl OmScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Resource => "resource",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "thread" => Some(Self::Thread),
            "resource" => Some(Self::Resource),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmOriginType {
    Observation,
    Reflection,
}

impl OmOriginType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Reflection => "reflection",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "observation" => Some(Self::Observation),
            "reflection" => Some(Self::Reflection),
            _ => None,
        }
    }
}

/// Identity of one generation chain: `thread_id == None` means resource scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OmRecordKey {
    pub thread_id: Option<String>,
    pub resource_id: String,
}

impl OmRecordKey {
    #[must_use]
    pub fn thread(thread_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            resource_id: resource_id.into(),
        }
    }

    #[must_use]
    pub fn resource(resource_id: impl Into<String>) -> Self {
        Self {
            thread_id: None,
            resource_id: resource_id.into(),
        }
    }

    #[must_use]
    pub const fn scope(&self) -> OmScope {
        if self.thread_id.is_some() {
            OmScope::Thread
        } else {
            OmScope::Resource
        }
    }

    #[must_use]
    pub fn scope_key(&self) -> String {
        match self.thread_id.as_deref() {
            Some(thread_id) => format!("thread:{}:{}", self.resource_id, thread_id),
            None => format!("resource:{}", self.resource_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OmRecordMetadata {
    pub reflection_count: u32,
}

/// One generation of compressed memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmRecord {
    pub id: String,
    pub scope: OmScope,
    pub scope_key: String,
    pub thread_id: Option<String>,
    pub resource_id: String,
    pub generation_count: u32,
    pub previous_generation_id: Option<String>,
    pub origin_type: OmOriginType,
    pub active_observations: String,
    pub observation_token_count: u32,
    #[serde(default)]
    pub patterns: OmPatterns,
    #[serde(default)]
    pub observed_message_ids: Vec<String>,
    pub last_observed_at: Option<DateTime<Utc>>,
    pub pending_message_tokens: u32,
    // Reserved for asynchronous buffering; the synchronous engine never fills them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffered_observations: Option<String>,
    #[serde(default)]
    pub buffered_message_ids: Vec<String>,
    #[serde(default)]
    pub buffering_message_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffered_reflection: Option<String>,
    pub is_observing: bool,
    pub is_reflecting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_continuation: Option<String>,
    #[serde(default)]
    pub metadata: OmRecordMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OmRecord {
    #[must_use]
    pub fn key(&self) -> OmRecordKey {
        OmRecordKey {
            thread_id: self.thread_id.clone(),
            resource_id: self.resource_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmMessage {
    pub id: String,
    pub thread_id: String,
    pub resource_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl OmMessage {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        resource_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            resource_id: resource_id.into(),
            role: role.into(),
            content: content.into(),
            created_at,
        }
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role.trim().eq_ignore_ascii_case("user")
    }
}

/// OM-owned slice of a thread's metadata bag, stored under
/// [`THREAD_METADATA_NAMESPACE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadOmMetadata {
    pub version: u32,
    #[serde(default)]
    pub last_observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub suggested_response: Option<String>,
}

impl Default for ThreadOmMetadata {
    fn default() -> Self {
        Self {
            version: THREAD_METADATA_VERSION,
            last_observed_at: None,
            current_task: None,
            suggested_response: None,
        }
    }
}

/// Partial update; `None` leaves the stored field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadOmMetadataUpdate {
    pub last_observed_at: Option<DateTime<Utc>>,
    pub current_task: Option<String>,
    pub suggested_response: Option<String>,
}

impl ThreadOmMetadataUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.last_observed_at.is_none()
            && self.current_task.is_none()
            && self.suggested_response.is_none()
    }

    /// Applies the update; the per-thread watermark never moves backwards.
    pub fn apply_to(&self, metadata: &mut ThreadOmMetadata) {
        if let Some(next) = self.last_observed_at {
            metadata.last_observed_at = Some(
                metadata
                    .last_observed_at
                    .map_or(next, |current| current.max(next)),
            );
        }
        if let Some(task) = self.current_task.as_ref() {
            metadata.current_task = Some(task.clone());
        }
        if let Some(response) = self.suggested_response.as_ref() {
            metadata.suggested_response = Some(response.clone());
        }
        metadata.version = THREAD_METADATA_VERSION;
    }
}
