//! Minimal CSS tokenizer for locating `url(...)` references.
//!
//! Only what is needed to find resource references reliably: comments and
//! strings are skipped as whole tokens, so `url(` inside either is never
//! reported, and escapes inside quoted or unquoted urls are honoured.

use std::ops::Range;

/// One `url(...)` reference found in stylesheet text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssUrlRef {
    /// Reference with CSS escapes decoded, surrounding whitespace trimmed.
    pub value: String,
    /// Byte range of the raw reference inside the source text, excluding
    /// quotes and surrounding whitespace. Replacing this range rewrites the
    /// reference in place.
    pub span: Range<usize>,
}

/// Find all `url(...)` references in `css`, in source order.
pub fn find_url_refs(css: &str) -> Vec<CssUrlRef> {
    let bytes = css.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_comment(bytes, i + 2);
            }
            quote @ (b'"' | b'\'') => {
                i = skip_string(bytes, i + 1, quote).end;
            }
            b'\\' => {
                // Escaped code point outside a string; never starts a token.
                i = skip_escape(bytes, i);
            }
            b'u' | b'U' if starts_url_function(bytes, i) => {
                let (found, next) = read_url_function(css, i + 4);
                refs.extend(found);
                i = next;
            }
            _ => i += 1,
        }
    }

    refs
}

/// Replace each reference for which `rewrite` returns `Some`, leaving the
/// rest of the text byte-for-byte intact.
pub fn rewrite_url_refs<F>(css: &str, mut rewrite: F) -> String
where
    F: FnMut(&CssUrlRef) -> Option<String>,
{
    let mut out = String::with_capacity(css.len());
    let mut cursor = 0;
    for url_ref in find_url_refs(css) {
        if let Some(replacement) = rewrite(&url_ref) {
            out.push_str(&css[cursor..url_ref.span.start]);
            out.push_str(&replacement);
            cursor = url_ref.span.end;
        }
    }
    out.push_str(&css[cursor..]);
    out
}

fn starts_url_function(bytes: &[u8], i: usize) -> bool {
    let Some(word) = bytes.get(i..i + 4) else {
        return false;
    };
    if !word.eq_ignore_ascii_case(b"url(") {
        return false;
    }
    // `url(` must start an identifier, not end one (`myurl(` is a different function).
    i == 0 || !is_name_byte(bytes[i - 1])
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b >= 0x80
}

fn skip_comment(bytes: &[u8], mut i: usize) -> usize {
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Skip a string body starting just after the opening quote. Returns the
/// range of the body; `end` is the index after the closing quote (or the
/// newline / end of input that terminated a bad string).
fn skip_string(bytes: &[u8], start: usize, quote: u8) -> StringBody {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i = skip_escape(bytes, i),
            b'\n' => {
                return StringBody {
                    body: start..i,
                    end: i,
                    closed: false,
                }
            }
            b if b == quote => {
                return StringBody {
                    body: start..i,
                    end: i + 1,
                    closed: true,
                }
            }
            _ => i += 1,
        }
    }
    let end = bytes.len();
    StringBody {
        body: start..end.max(start),
        end,
        closed: false,
    }
}

struct StringBody {
    body: Range<usize>,
    end: usize,
    closed: bool,
}

/// Skip an escape starting at the backslash at `i`: up to six hex digits
/// plus one optional whitespace, or a single (possibly multi-byte) character.
fn skip_escape(bytes: &[u8], i: usize) -> usize {
    let hex_start = i + 1;
    let mut j = hex_start;
    while j < bytes.len() && j - hex_start < 6 && bytes[j].is_ascii_hexdigit() {
        j += 1;
    }
    if j == hex_start {
        let width = bytes.get(hex_start).map_or(0, |b| utf8_width(*b));
        return (hex_start + width).min(bytes.len());
    }
    if j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    j
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xFF => 4,
        // Continuation byte; step over it alone.
        _ => 1,
    }
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Read the argument of a `url(` function whose body starts at `start`.
fn read_url_function(css: &str, start: usize) -> (Option<CssUrlRef>, usize) {
    let bytes = css.as_bytes();
    let i = skip_whitespace(bytes, start);
    if i >= bytes.len() {
        return (None, i);
    }

    if bytes[i] == b'"' || bytes[i] == b'\'' {
        let string = skip_string(bytes, i + 1, bytes[i]);
        let after = skip_whitespace(bytes, string.end);
        if !string.closed || bytes.get(after) != Some(&b')') {
            // Malformed; resume scanning after the string.
            return (None, string.end);
        }
        let raw = &css[string.body.clone()];
        let found = Some(CssUrlRef {
            value: unescape(raw),
            span: string.body,
        });
        return (found, after + 1);
    }

    let body_start = i;
    let mut j = i;
    while j < bytes.len() {
        match bytes[j] {
            b')' => break,
            b'\\' => j = skip_escape(bytes, j),
            b'"' | b'\'' | b'(' => return (None, j),
            b if b.is_ascii_whitespace() => {
                let after = skip_whitespace(bytes, j);
                if bytes.get(after) != Some(&b')') {
                    return (None, after);
                }
                let found = unquoted(css, body_start, j);
                return (found, after + 1);
            }
            _ => j += 1,
        }
    }
    let end = j.min(bytes.len());
    let found = unquoted(css, body_start, end);
    (found, (end + 1).min(bytes.len()))
}

fn unquoted(css: &str, start: usize, end: usize) -> Option<CssUrlRef> {
    if end <= start || !css.is_char_boundary(end) {
        return None;
    }
    let raw = &css[start..end];
    Some(CssUrlRef {
        value: unescape(raw),
        span: start..end,
    })
}

/// Decode CSS escapes: `\` + hex digits (optionally followed by one space),
/// or `\` + any other character, which stands for itself. Escaped newlines
/// are dropped.
fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.trim().to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let mut hex = String::new();
        while hex.len() < 6 {
            match chars.peek() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(*h);
                    chars.next();
                }
                _ => break,
            }
        }
        if hex.is_empty() {
            match chars.next() {
                Some('\n') | None => {}
                Some(other) => out.push(other),
            }
            continue;
        }
        if chars.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            chars.next();
        }
        let decoded = u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .filter(|c| *c != '\0')
            .unwrap_or('\u{FFFD}');
        out.push(decoded);
    }
    out.trim().to_string()
}
