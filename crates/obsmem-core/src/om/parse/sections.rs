use super::OmParseMode;
use super::lexer::{TagKind, TagToken, tokenize};

/// Byte offsets of one matched `<tag>...</tag>` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SectionSpan {
    pub(crate) open_start: usize,
    pub(crate) content_start: usize,
    pub(crate) content_end: usize,
    pub(crate) close_end: usize,
}

impl SectionSpan {
    pub(crate) fn content<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.content_start..self.content_end)
            .unwrap_or_default()
    }

    pub(crate) fn open_tag<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.open_start..self.content_start)
            .unwrap_or_default()
    }
}

/// Matches open/close pairs for `tag`. Opening tags must start their line;
/// closing tags must too unless they sit on the opening line. Lenient mode
/// lets a later anchored open replace an unclosed one, strict mode discards
/// the overlapping block.
pub(super) fn match_sections(
    text: &str,
    tokens: &[TagToken],
    tag: &str,
    mode: OmParseMode,
) -> Vec<SectionSpan> {
    let tag = tag.trim().to_ascii_lowercase();
    if tag.is_empty() {
        return Vec::new();
    }

    let mut spans = Vec::<SectionSpan>::new();
    let mut current_open: Option<&TagToken> = None;
    let mut discard_next_close = false;

    for token in tokens.iter().filter(|token| token.name == tag) {
        match token.kind {
            TagKind::Open => {
                if !token.line_anchored {
                    continue;
                }
                if matches!(mode, OmParseMode::Strict) && current_open.is_some() {
                    current_open = None;
                    discard_next_close = true;
                    continue;
                }
                if matches!(mode, OmParseMode::Lenient) || current_open.is_none() {
                    current_open = Some(token);
                }
            }
            TagKind::Close => {
                if discard_next_close {
                    discard_next_close = false;
                    continue;
                }
                let Some(open) = current_open else {
                    continue;
                };
                if token.start < open.end {
                    continue;
                }
                let same_line_close = text
                    .get(open.end..token.start)
                    .is_some_and(|segment| !segment.contains('\n'));
                if !token.line_anchored && !same_line_close {
                    continue;
                }
                spans.push(SectionSpan {
                    open_start: open.start,
                    content_start: open.end,
                    content_end: token.start,
                    close_end: token.end,
                });
                current_open = None;
            }
        }
    }

    spans
}

pub(super) fn sections_for_tag(text: &str, tag: &str, mode: OmParseMode) -> Vec<SectionSpan> {
    match_sections(text, &tokenize(text), tag, mode)
}

pub(super) fn join_section_contents(text: &str, spans: &[SectionSpan]) -> String {
    spans
        .iter()
        .map(|span| span.content(text).trim())
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub(super) fn last_section_content(text: &str, spans: &[SectionSpan]) -> Option<String> {
    spans
        .iter()
        .rev()
        .map(|span| span.content(text).trim())
        .find(|content| !content.is_empty())
        .map(ToString::to_string)
}

/// Removes every span from `text`; overlapping spans are skipped.
pub(super) fn strip_sections(text: &str, spans: &[SectionSpan]) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for span in spans {
        if span.open_start < cursor {
            continue;
        }
        stripped.push_str(text.get(cursor..span.open_start).unwrap_or_default());
        cursor = span.close_end;
    }
    stripped.push_str(text.get(cursor..).unwrap_or_default());
    stripped.trim().to_string()
}

/// Removes all `tag` blocks and returns the last non-empty one.
pub(super) fn take_last_section(
    text: &str,
    tag: &str,
    mode: OmParseMode,
) -> (String, Option<String>) {
    let spans = sections_for_tag(text, tag, mode);
    if spans.is_empty() {
        return (text.trim().to_string(), None);
    }
    let last = last_section_content(text, &spans);
    (strip_sections(text, &spans), last)
}
