use std::collections::BTreeMap;

use crate::om::model::OmMessage;
use crate::om::xml::{escape_xml_attribute, escape_xml_text};

#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Renders unobserved messages from sibling threads as
/// `<other-conversation id="...">` blocks, one per thread, each message
/// bounded to `max_part_chars` characters.
#[must_use]
pub fn build_other_conversation_blocks(
    messages: &[OmMessage],
    current_thread_id: Option<&str>,
    max_part_chars: usize,
) -> Option<String> {
    if max_part_chars == 0 {
        return None;
    }

    let mut groups = BTreeMap::<&str, Vec<&OmMessage>>::new();
    for message in messages {
        let thread_id = message.thread_id.trim();
        if thread_id.is_empty() || current_thread_id.is_some_and(|current| current == thread_id) {
            continue;
        }
        groups.entry(thread_id).or_default().push(message);
    }

    let blocks = groups
        .into_iter()
        .filter_map(|(thread_id, mut group)| {
            group.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            let lines = group
                .into_iter()
                .filter_map(|message| {
                    let text = normalize_whitespace(&message.content);
                    if text.is_empty() {
                        return None;
                    }
                    let bounded =
                        escape_xml_text(&text.chars().take(max_part_chars).collect::<String>());
                    let role = normalize_whitespace(&message.role);
                    Some(if role.is_empty() {
                        bounded
                    } else {
                        format!("[{}] {bounded}", escape_xml_text(&role))
                    })
                })
                .collect::<Vec<_>>();
            if lines.is_empty() {
                return None;
            }
            Some(format!(
                "<other-conversation id=\"{}\">\n{}\n</other-conversation>",
                escape_xml_attribute(thread_id),
                lines.join("\n")
            ))
        })
        .collect::<Vec<_>>();

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}
