use crate::om::model::OmPatterns;

use super::lexer::{tag_attribute, tokenize};
use super::patterns::take_patterns;
use super::sections::{SectionSpan, match_sections, take_last_section};
use super::{OmMultiThreadObserverSection, OmParseMode};

/// A `<thread id="...">` block found in an observation blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ThreadBlockSpan {
    pub(crate) thread_id: String,
    pub(crate) span: SectionSpan,
}

pub(super) fn thread_spans(text: &str, mode: OmParseMode) -> Vec<ThreadBlockSpan> {
    let tokens = tokenize(text);
    match_sections(text, &tokens, "thread", mode)
        .into_iter()
        .map(|span| ThreadBlockSpan {
            thread_id: tag_attribute(span.open_tag(text), "id")
                .map(|id| id.trim().to_string())
                .unwrap_or_default(),
            span,
        })
        .collect()
}

/// Splits the continuation hints off a block: `(body, current_task, suggested)`.
pub(super) fn take_continuation_hints(
    content: &str,
    mode: OmParseMode,
) -> (String, Option<String>, Option<String>) {
    let (body, current_task) = take_last_section(content, "current-task", mode);
    let (body, suggested_response) = take_last_section(&body, "suggested-response", mode);
    let (body, suggested_continuation) = take_last_section(&body, "suggested-continuation", mode);
    (
        body,
        current_task,
        suggested_continuation.or(suggested_response),
    )
}

pub(super) fn parse_thread_observer_section(
    thread_id: &str,
    content: &str,
    mode: OmParseMode,
) -> Option<OmMultiThreadObserverSection> {
    let thread_id = thread_id.trim();
    if thread_id.is_empty() {
        return None;
    }
    let (without_patterns, patterns): (String, OmPatterns) = take_patterns(content, mode);
    let (observations, current_task, suggested_continuation) =
        take_continuation_hints(&without_patterns, mode);

    Some(OmMultiThreadObserverSection {
        thread_id: thread_id.to_string(),
        observations: observations.trim().to_string(),
        current_task,
        suggested_continuation,
        patterns,
    })
}
