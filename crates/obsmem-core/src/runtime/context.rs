use serde::Serialize;

use crate::error::Result;
use crate::om::{
    OmMessage, OmPatterns, OmRecordKey, OmScope, build_other_conversation_blocks, escape_xml_text,
    filter_after_watermark, render_patterns_block,
};

use super::ObservationalMemory;
use super::cursor::validate_turn_messages;

const MEMORY_PREAMBLE: &str = "The following observations are your memory of earlier conversations with this user. Newer observations supersede older ones.";

/// Compressed memory to prepend to the next model call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ContextInjection {
    pub scope_key: String,
    pub observations: Option<String>,
    pub patterns: OmPatterns,
    pub current_task: Option<String>,
    pub suggested_continuation: Option<String>,
    /// `<other-conversation>` blocks for sibling threads (resource scope).
    pub other_conversations: Option<String>,
    /// Messages dropped from the caller's list because they are already
    /// folded into the observations.
    pub folded_message_count: usize,
}

impl ContextInjection {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_none()
            && self.patterns.is_empty()
            && self.current_task.is_none()
            && self.suggested_continuation.is_none()
            && self.other_conversations.is_none()
    }

    /// System-prompt block, or `None` when there is nothing to inject.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut parts = vec![MEMORY_PREAMBLE.to_string()];
        if let Some(observations) = self.observations.as_deref() {
            parts.push(format!("<observations>\n{observations}\n</observations>"));
        }
        if let Some(patterns) = render_patterns_block(&self.patterns) {
            parts.push(patterns);
        }
        if let Some(task) = self.current_task.as_deref() {
            parts.push(format!(
                "<current-task>\n{}\n</current-task>",
                escape_xml_text(task)
            ));
        }
        if let Some(continuation) = self.suggested_continuation.as_deref() {
            parts.push(format!(
                "<suggested-response>\n{}\n</suggested-response>",
                escape_xml_text(continuation)
            ));
        }
        if let Some(blocks) = self.other_conversations.as_deref() {
            parts.push(blocks.to_string());
        }
        Some(parts.join("\n\n"))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

impl ObservationalMemory {
    /// Builds the context injection for the next model call and drops from
    /// `messages` every message already folded into the observations.
    ///
    /// Read-only: no generation is created and nothing is stored.
    pub fn process_turn_input(
        &self,
        thread_id: &str,
        resource_id: &str,
        messages: &mut Vec<OmMessage>,
    ) -> Result<ContextInjection> {
        let key = self.record_key(Some(thread_id), resource_id)?;
        validate_turn_messages(thread_id, &key.resource_id, messages)?;
        let record = self.store.get_latest_generation(&key)?;
        let metadata = self.store.get_thread_metadata(thread_id)?;

        let watermark = self.thread_watermark(key.scope(), record.as_ref(), thread_id)?;
        let before = messages.len();
        *messages = filter_after_watermark(messages, watermark);
        let folded_message_count = before - messages.len();

        let other_conversations = match key.scope() {
            OmScope::Resource => self.other_conversation_context(&key, thread_id)?,
            OmScope::Thread => None,
        };
        let (observations, patterns, record_continuation) = match record {
            Some(record) => (
                non_blank(Some(record.active_observations)),
                record.patterns,
                record.suggested_continuation,
            ),
            None => (None, OmPatterns::new(), None),
        };
        let (current_task, thread_continuation) = metadata
            .map(|metadata| (metadata.current_task, metadata.suggested_response))
            .unwrap_or_default();

        let injection = ContextInjection {
            scope_key: key.scope_key(),
            observations,
            patterns,
            current_task: non_blank(current_task),
            suggested_continuation: non_blank(thread_continuation.or(record_continuation)),
            other_conversations,
            folded_message_count,
        };
        tracing::debug!(
            scope_key = %injection.scope_key,
            folded_message_count,
            has_observations = injection.observations.is_some(),
            has_other_conversations = injection.other_conversations.is_some(),
            "context injection built"
        );
        Ok(injection)
    }

    /// Unobserved messages of the resource's other threads, bounded per part.
    fn other_conversation_context(
        &self,
        key: &OmRecordKey,
        thread_id: &str,
    ) -> Result<Option<String>> {
        let max_part_chars = self.config.observation.other_conversation_max_part_chars;
        if max_part_chars == 0 {
            return Ok(None);
        }
        let siblings = self
            .load_thread_backlogs(&key.resource_id, Some(thread_id))?
            .into_iter()
            .flat_map(|backlog| backlog.messages)
            .collect::<Vec<_>>();
        Ok(build_other_conversation_blocks(
            &siblings,
            Some(thread_id),
            max_part_chars,
        ))
    }
}
