//! Tolerant parser for Observer/Reflector completions.
//!
//! The completion grammar is XML-ish: an optional `<observations>` block
//! (bullet facts), optional `<current-task>`, `<suggested-response>` or
//! `<suggested-continuation>` hints, and an optional `<patterns>` block.
//! Multi-thread output wraps each thread in `<thread id="...">`. Missing
//! sections are ordinary input, never errors.

mod lexer;
mod patterns;
mod sections;
mod thread;

use crate::om::model::OmPatterns;
use crate::om::transform::merge_patterns;
use crate::om::xml::unescape_xml;
use patterns::take_patterns;
use sections::{join_section_contents, sections_for_tag};
use thread::{parse_thread_observer_section, take_continuation_hints, thread_spans};

pub use patterns::render_patterns_block;
pub(crate) use thread::ThreadBlockSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmParseMode {
    // Reject recovery heuristics where possible.
    Strict,
    // Recover from common malformed overlaps produced by model output.
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OmMemorySection {
    pub observations: String,
    pub current_task: Option<String>,
    pub suggested_continuation: Option<String>,
    pub patterns: OmPatterns,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmMultiThreadObserverSection {
    pub thread_id: String,
    pub observations: String,
    pub current_task: Option<String>,
    pub suggested_continuation: Option<String>,
    pub patterns: OmPatterns,
}

/// Per-thread result of demultiplexing a batched Observer completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmThreadObservation {
    pub thread_id: String,
    pub section: OmMemorySection,
    /// `false` when the completion had no block for this thread.
    pub addressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct MemoryParseQuality {
    observation_chars: usize,
    metadata_fields: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct MultiThreadParseQuality {
    section_count: usize,
    sections_with_observations: usize,
    sections_with_metadata: usize,
}

fn is_numbered_list_item(trimmed: &str) -> bool {
    let digit_count = trimmed.chars().take_while(char::is_ascii_digit).count();
    digit_count > 0 && trimmed[digit_count..].starts_with(". ")
}

fn non_empty(value: Option<&str>) -> bool {
    value.map(str::trim).is_some_and(|value| !value.is_empty())
}

fn memory_parse_quality(section: &OmMemorySection) -> MemoryParseQuality {
    MemoryParseQuality {
        observation_chars: section.observations.trim().len(),
        metadata_fields: u8::from(non_empty(section.current_task.as_deref()))
            + u8::from(non_empty(section.suggested_continuation.as_deref()))
            + u8::from(!section.patterns.is_empty()),
    }
}

fn multi_thread_parse_quality(
    sections: &[OmMultiThreadObserverSection],
) -> MultiThreadParseQuality {
    let mut quality = MultiThreadParseQuality {
        section_count: sections.len(),
        ..MultiThreadParseQuality::default()
    };
    for section in sections {
        if !section.observations.trim().is_empty() {
            quality.sections_with_observations += 1;
        }
        if non_empty(section.current_task.as_deref())
            || non_empty(section.suggested_continuation.as_deref())
        {
            quality.sections_with_metadata += 1;
        }
    }
    quality
}

const fn decide_memory_parse(
    strict: MemoryParseQuality,
    lenient: MemoryParseQuality,
) -> OmParseMode {
    if strict.observation_chars > 0 {
        OmParseMode::Strict
    } else if lenient.observation_chars > 0 {
        OmParseMode::Lenient
    } else if strict.metadata_fields >= lenient.metadata_fields {
        OmParseMode::Strict
    } else {
        OmParseMode::Lenient
    }
}

const fn decide_multi_thread_parse(
    strict: MultiThreadParseQuality,
    lenient: MultiThreadParseQuality,
) -> OmParseMode {
    if strict.sections_with_observations > 0 {
        OmParseMode::Strict
    } else if lenient.sections_with_observations > 0 {
        OmParseMode::Lenient
    } else if strict.sections_with_metadata > lenient.sections_with_metadata {
        OmParseMode::Strict
    } else if lenient.sections_with_metadata > strict.sections_with_metadata {
        OmParseMode::Lenient
    } else if strict.section_count >= lenient.section_count {
        OmParseMode::Strict
    } else {
        OmParseMode::Lenient
    }
}

fn parse_thread_sections(scope: &str, mode: OmParseMode) -> Vec<OmMultiThreadObserverSection> {
    thread_spans(scope, mode)
        .into_iter()
        .filter_map(|block| {
            let thread_id = unescape_xml(&block.thread_id);
            parse_thread_observer_section(&thread_id, block.span.content(scope), mode)
        })
        .collect()
}

#[must_use]
pub fn parse_memory_section_xml(content: &str, mode: OmParseMode) -> OmMemorySection {
    let (without_patterns, patterns) = take_patterns(content, mode);
    let (body, current_task, suggested_continuation) =
        take_continuation_hints(&without_patterns, mode);

    let observation_spans = sections_for_tag(&body, "observations", mode);
    let observations = if observation_spans.is_empty() {
        extract_list_items_only(&body)
    } else {
        join_section_contents(&body, &observation_spans)
    };

    OmMemorySection {
        observations: observations.trim().to_string(),
        current_task,
        suggested_continuation,
        patterns,
    }
}

/// Tries strict matching first and falls back to lenient only when it
/// recovers more content.
#[must_use]
pub fn parse_memory_section_xml_accuracy_first(content: &str) -> OmMemorySection {
    let strict = parse_memory_section_xml(content, OmParseMode::Strict);
    let strict_quality = memory_parse_quality(&strict);
    if strict_quality.observation_chars > 0 {
        return strict;
    }
    let lenient = parse_memory_section_xml(content, OmParseMode::Lenient);
    let lenient_quality = memory_parse_quality(&lenient);
    match decide_memory_parse(strict_quality, lenient_quality) {
        OmParseMode::Strict => strict,
        OmParseMode::Lenient => lenient,
    }
}

#[must_use]
pub fn parse_multi_thread_observer_output(
    content: &str,
    mode: OmParseMode,
) -> Vec<OmMultiThreadObserverSection> {
    let observation_spans = sections_for_tag(content, "observations", mode);
    if observation_spans.is_empty() {
        return parse_thread_sections(content, mode);
    }
    observation_spans
        .iter()
        .map(|span| span.content(content).trim())
        .filter(|section| !section.is_empty())
        .flat_map(|section| parse_thread_sections(section, mode))
        .collect()
}

#[must_use]
pub fn parse_multi_thread_observer_output_accuracy_first(
    content: &str,
) -> Vec<OmMultiThreadObserverSection> {
    let strict = parse_multi_thread_observer_output(content, OmParseMode::Strict);
    let strict_quality = multi_thread_parse_quality(&strict);
    if strict_quality.sections_with_observations > 0 {
        return strict;
    }
    let lenient = parse_multi_thread_observer_output(content, OmParseMode::Lenient);
    let lenient_quality = multi_thread_parse_quality(&lenient);
    match decide_multi_thread_parse(strict_quality, lenient_quality) {
        OmParseMode::Strict => strict,
        OmParseMode::Lenient => lenient,
    }
}

/// Returns exactly one result per requested thread id, in request order.
/// Repeated blocks for one thread are concatenated; ids that were not
/// requested are dropped.
#[must_use]
pub fn demultiplex_thread_sections(
    sections: &[OmMultiThreadObserverSection],
    thread_ids: &[String],
) -> Vec<OmThreadObservation> {
    thread_ids
        .iter()
        .map(|thread_id| {
            let mut section = OmMemorySection::default();
            let mut addressed = false;
            for candidate in sections
                .iter()
                .filter(|candidate| candidate.thread_id == *thread_id)
            {
                addressed = true;
                let observations = candidate.observations.trim();
                if !observations.is_empty() {
                    if !section.observations.is_empty() {
                        section.observations.push('\n');
                    }
                    section.observations.push_str(observations);
                }
                if non_empty(candidate.current_task.as_deref()) {
                    section.current_task.clone_from(&candidate.current_task);
                }
                if non_empty(candidate.suggested_continuation.as_deref()) {
                    section
                        .suggested_continuation
                        .clone_from(&candidate.suggested_continuation);
                }
                section.patterns = merge_patterns(&section.patterns, &candidate.patterns);
            }
            OmThreadObservation {
                thread_id: thread_id.clone(),
                section,
                addressed,
            }
        })
        .collect()
}

/// Thread blocks of an attributed observation blob, in document order.
pub(crate) fn thread_block_spans(text: &str) -> Vec<ThreadBlockSpan> {
    thread_spans(text, OmParseMode::Lenient)
        .into_iter()
        .map(|mut block| {
            block.thread_id = unescape_xml(&block.thread_id);
            block
        })
        .collect()
}

pub fn extract_list_items_only(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with("- ")
                || trimmed.starts_with("* ")
                || trimmed.starts_with("• ")
                || is_numbered_list_item(trimmed)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
