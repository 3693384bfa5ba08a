use crate::om::model::OmPatterns;
use crate::om::parse::thread_block_spans;
use crate::om::xml::{escape_xml_attribute, escape_xml_text};

const DATE_HEADER_PREFIX: &str = "Date:";

/// Additive merge deduplicated by exact string match within each key.
/// Merging the same delta twice is a no-op the second time.
#[must_use]
pub fn merge_patterns(existing: &OmPatterns, delta: &OmPatterns) -> OmPatterns {
    let mut merged = existing.clone();
    for (name, items) in delta {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let mut fresh = items
            .iter()
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .peekable();
        if fresh.peek().is_none() {
            continue;
        }
        let entry = merged.entry(name.to_string()).or_default();
        for item in fresh {
            if !entry.iter().any(|existing| existing == item) {
                entry.push(item.to_string());
            }
        }
    }
    merged
}

/// Thread-scope merge: new facts are appended after the existing ones.
#[must_use]
pub fn append_observations(existing: &str, new_observations: &str) -> String {
    let existing = existing.trim();
    let new_observations = new_observations.trim();
    match (existing.is_empty(), new_observations.is_empty()) {
        (true, _) => new_observations.to_string(),
        (false, true) => existing.to_string(),
        (false, false) => format!("{existing}\n\n{new_observations}"),
    }
}

fn date_headers(text: &str) -> impl DoubleEndedIterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with(DATE_HEADER_PREFIX))
}

#[must_use]
pub fn first_date_header(text: &str) -> Option<&str> {
    date_headers(text).next()
}

#[must_use]
pub fn latest_date_header(text: &str) -> Option<&str> {
    date_headers(text).next_back()
}

fn drop_leading_date_header<'a>(text: &'a str, header: &str) -> &'a str {
    let trimmed = text.trim_start();
    match trimmed.split_once('\n') {
        Some((first, rest)) if first.trim() == header => rest.trim(),
        None if trimmed.trim() == header => "",
        _ => text.trim(),
    }
}

/// Resource-scope merge. Observations are wrapped in a
/// `<thread id="...">` block; when the last block for the same thread ends
/// on the date the new observations start with, they extend that block
/// instead of opening a new one.
#[must_use]
pub fn merge_thread_observations(
    existing: &str,
    thread_id: &str,
    new_observations: &str,
) -> String {
    let new_observations = new_observations.trim();
    let existing = existing.trim();
    if new_observations.is_empty() {
        return existing.to_string();
    }

    let incoming_date = first_date_header(new_observations);
    let target = thread_block_spans(existing)
        .into_iter()
        .rev()
        .find(|block| block.thread_id == thread_id);
    if let Some(block) = target {
        let body = block.span.content(existing).trim();
        let same_date = match (latest_date_header(body), incoming_date) {
            (_, None) => true,
            (Some(current), Some(incoming)) => current == incoming,
            (None, Some(_)) => false,
        };
        if same_date {
            let addition = match incoming_date {
                Some(header) => drop_leading_date_header(new_observations, header),
                None => new_observations,
            };
            if addition.is_empty() {
                return existing.to_string();
            }
            let merged_body = if body.is_empty() {
                escape_xml_text(addition)
            } else {
                format!("{body}\n{}", escape_xml_text(addition))
            };
            return format!(
                "{}\n{merged_body}\n{}",
                &existing[..block.span.content_start],
                &existing[block.span.content_end..]
            );
        }
    }

    let block = format!(
        "<thread id=\"{}\">\n{}\n</thread>",
        escape_xml_attribute(thread_id),
        escape_xml_text(new_observations)
    );
    if existing.is_empty() {
        block
    } else {
        format!("{existing}\n\n{block}")
    }
}
