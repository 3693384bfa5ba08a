#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TagKind {
    Open,
    Close,
}

/// One `<name ...>` or `</name>` occurrence. Names are ASCII-lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct TagToken {
    pub(super) kind: TagKind,
    pub(super) name: String,
    pub(super) start: usize,
    pub(super) end: usize,
    /// Only whitespace precedes the tag on its line.
    pub(super) line_anchored: bool,
}

pub(super) const fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-'
}

pub(super) const fn is_attr_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

fn is_line_anchored(text: &str, tag_index: usize) -> bool {
    let line_start = text[..tag_index].rfind('\n').map_or(0, |idx| idx + 1);
    text[line_start..tag_index]
        .chars()
        .all(|ch| ch == ' ' || ch == '\t')
}

// Quoted attribute values may contain '>'.
fn find_tag_end(bytes: &[u8], mut cursor: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    while cursor < bytes.len() {
        let byte = bytes[cursor];
        match quote {
            Some(active) if byte == active => quote = None,
            Some(_) => {}
            None if byte == b'\'' || byte == b'"' => quote = Some(byte),
            None if byte == b'>' => return Some(cursor),
            None => {}
        }
        cursor += 1;
    }
    None
}

fn skip_ascii_whitespace(bytes: &[u8], mut cursor: usize) -> usize {
    while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
        cursor += 1;
    }
    cursor
}

pub(super) fn tokenize(text: &str) -> Vec<TagToken> {
    let bytes = text.as_bytes();
    let mut offset = 0usize;
    let mut tokens = Vec::<TagToken>::new();

    while offset < bytes.len() {
        if bytes[offset] != b'<' {
            offset += 1;
            continue;
        }
        let Some(end) = find_tag_end(bytes, offset + 1) else {
            break;
        };
        let inner = &text[offset + 1..end];
        let inner_bytes = inner.as_bytes();

        let mut cursor = skip_ascii_whitespace(inner_bytes, 0);
        if cursor >= inner_bytes.len() {
            offset = end + 1;
            continue;
        }
        let kind = if inner_bytes[cursor] == b'/' {
            cursor = skip_ascii_whitespace(inner_bytes, cursor + 1);
            TagKind::Close
        } else {
            TagKind::Open
        };

        let name_start = cursor;
        while cursor < inner_bytes.len() && is_tag_name_char(inner_bytes[cursor]) {
            cursor += 1;
        }
        if cursor > name_start {
            tokens.push(TagToken {
                kind,
                name: inner[name_start..cursor].to_ascii_lowercase(),
                start: offset,
                end: end + 1,
                line_anchored: is_line_anchored(text, offset),
            });
        }
        offset = end + 1;
    }

    tokens
}

/// Reads one attribute value from an open tag such as `<thread id="t-1">`.
pub(super) fn tag_attribute(open_tag: &str, key: &str) -> Option<String> {
    let inner = open_tag.strip_prefix('<')?.strip_suffix('>')?;
    let bytes = inner.as_bytes();
    let mut cursor = skip_ascii_whitespace(bytes, 0);
    while cursor < bytes.len() && is_tag_name_char(bytes[cursor]) {
        cursor += 1;
    }

    while cursor < bytes.len() {
        cursor = skip_ascii_whitespace(bytes, cursor);
        if cursor >= bytes.len() {
            break;
        }
        let name_start = cursor;
        while cursor < bytes.len() && is_attr_name_char(bytes[cursor]) {
            cursor += 1;
        }
        if cursor == name_start {
            cursor += 1;
            continue;
        }
        let name = inner[name_start..cursor].to_ascii_lowercase();

        cursor = skip_ascii_whitespace(bytes, cursor);
        if cursor >= bytes.len() || bytes[cursor] != b'=' {
            continue;
        }
        cursor = skip_ascii_whitespace(bytes, cursor + 1);
        if cursor >= bytes.len() {
            break;
        }

        let value = if bytes[cursor] == b'"' || bytes[cursor] == b'\'' {
            let quote = bytes[cursor];
            let value_start = cursor + 1;
            cursor = value_start;
            while cursor < bytes.len() && bytes[cursor] != quote {
                cursor += 1;
            }
            let value = inner.get(value_start..cursor).unwrap_or_default();
            cursor = (cursor + 1).min(bytes.len());
            value
        } else {
            let value_start = cursor;
            while cursor < bytes.len() && !bytes[cursor].is_ascii_whitespace() {
                cursor += 1;
            }
            inner.get(value_start..cursor).unwrap_or_default()
        };

        if name == key {
            return Some(value.to_string());
        }
    }

    None
}
