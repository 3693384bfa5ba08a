use chrono::{DateTime, Utc};

use crate::om::model::OmMessage;
use crate::om::xml::{escape_xml_attribute, escape_xml_text};

use super::OmObserverThreadMessages;

fn normalize_role(role: &str) -> String {
    let mut chars = role.trim().chars();
    let Some(first) = chars.next() else {
        return "Unknown".to_string();
    };
    let mut normalized = first.to_uppercase().collect::<String>();
    normalized.push_str(chars.as_str());
    normalized
}

fn format_timestamp_for_observer(at: DateTime<Utc>) -> String {
    at.format("%b %-d, %Y, %-I:%M %p").to_string()
}

#[must_use]
pub fn format_observer_messages_for_prompt(messages: &[OmMessage]) -> String {
    messages
        .iter()
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| {
            format!(
                "**{} ({}):**\n{}",
                normalize_role(&message.role),
                format_timestamp_for_observer(message.created_at),
                message.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[must_use]
pub fn format_multi_thread_observer_messages_for_prompt(
    threads: &[OmObserverThreadMessages<'_>],
) -> String {
    threads
        .iter()
        .filter_map(|thread| {
            let thread_id = thread.thread_id.trim();
            let history = format_observer_messages_for_prompt(thread.messages);
            if thread_id.is_empty() || history.is_empty() {
                return None;
            }
            Some(format!(
                "<thread id=\"{}\">\n{}\n</thread>",
                escape_xml_attribute(thread_id),
                escape_xml_text(&history)
            ))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
