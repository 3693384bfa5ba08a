use crate::om::model::OmPatterns;
use crate::om::xml::{escape_xml_attribute, escape_xml_text, unescape_xml};

use super::OmParseMode;
use super::lexer::tag_attribute;
use super::sections::{sections_for_tag, strip_sections};

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return rest.trim();
        }
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0
        && let Some(rest) = trimmed[digits..].strip_prefix(". ")
    {
        return rest.trim();
    }
    trimmed
}

fn collect_pattern_entries(content: &str, mode: OmParseMode, out: &mut OmPatterns) {
    for span in sections_for_tag(content, "pattern", mode) {
        let Some(name) = tag_attribute(span.open_tag(content), "name")
            .map(|name| unescape_xml(name.trim()))
            .filter(|name| !name.is_empty())
        else {
            continue;
        };
        let items = out.entry(name).or_default();
        for line in span.content(content).lines() {
            let item = unescape_xml(strip_list_marker(line));
            if !item.is_empty() && !items.contains(&item) {
                items.push(item);
            }
        }
    }
    out.retain(|_, items| !items.is_empty());
}

/// Removes `<patterns>` blocks from `text` and returns the parsed entries.
pub(super) fn take_patterns(text: &str, mode: OmParseMode) -> (String, OmPatterns) {
    let spans = sections_for_tag(text, "patterns", mode);
    let mut patterns = OmPatterns::new();
    if spans.is_empty() {
        return (text.trim().to_string(), patterns);
    }
    for span in &spans {
        collect_pattern_entries(span.content(text), mode, &mut patterns);
    }
    (strip_sections(text, &spans), patterns)
}

/// Serialized form used both for prompts and for token accounting.
#[must_use]
pub fn render_patterns_block(patterns: &OmPatterns) -> Option<String> {
    let entries = patterns
        .iter()
        .filter(|(name, items)| !name.trim().is_empty() && !items.is_empty())
        .map(|(name, items)| {
            let lines = items
                .iter()
                .map(|item| format!("* {}", escape_xml_text(item)))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "<pattern name=\"{}\">\n{lines}\n</pattern>",
                escape_xml_attribute(name)
            )
        })
        .collect::<Vec<_>>();
    if entries.is_empty() {
        None
    } else {
        Some(format!("<patterns>\n{}\n</patterns>", entries.join("\n")))
    }
}
