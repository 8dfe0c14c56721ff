//! Partial JSON parsing
//!
//! Structured output arrives as text deltas of one JSON document. After
//! every delta the accumulated prefix is completed with
//! `partial_json_fixer` and parsed into the value it already determines.
//! Before completion the unfinished tail is cut back so that:
//!
//! - an unterminated string value keeps the characters seen so far
//! - an object member whose value has not started is dropped with its key
//! - unfinished `true`/`false`/`null` literals are dropped
//! - a trailing number is kept once it ends in a digit
//! - a truncated escape sequence is dropped from its string

use partial_json_fixer::fix_json;
use serde_json::Value;

/// Parse the longest meaningful value out of a JSON prefix
///
/// Returns `None` when the prefix does not yet determine any value, or
/// when it is not a JSON prefix at all. Text before the first `{` or `[`
/// (such as a code fence) is skipped, and so is anything after the
/// top-level value closes.
pub fn parse_partial(text: &str) -> Option<Value> {
    let start = text.find(['{', '['])?;
    let prefix = complete_prefix(&text[start..]);
    serde_json::from_str(&fix_json(prefix)).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Expecting an object key or the end of the container
    Key,
    /// Object key read, its value not started
    AfterKey,
    /// Expecting an array element, or an object value after `:`
    Value,
    /// Value read, expecting `,` or the end of the container
    AfterValue,
}

/// Open container while scanning
struct Frame {
    object: bool,
    slot: Slot,
    /// Start of the current object member (its key's opening quote)
    member: usize,
}

/// String being scanned
struct Str {
    key: bool,
    /// Start of an escape not yet complete; a high surrogate stays open
    /// until its low half is read
    escape: Option<usize>,
    /// Hex digits of a `\u` escape still to read
    hex_left: u8,
    hex: u32,
    /// Backslash just read
    after_backslash: bool,
}

/// Cut a JSON prefix back to the part that should survive completion
fn complete_prefix(text: &str) -> &str {
    let mut stack: Vec<Frame> = Vec::new();
    let mut string: Option<Str> = None;
    let mut scalar: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if let Some(s) = string.as_mut() {
            if scan_string_char(s, i, c) {
                let key = s.key;
                string = None;
                if let Some(frame) = stack.last_mut() {
                    frame.slot = if key { Slot::AfterKey } else { Slot::AfterValue };
                }
            }
            continue;
        }

        if scalar.is_some() && !matches!(c, ',' | '}' | ']' | ':') && !c.is_whitespace() {
            continue;
        }
        scalar = None;

        match c {
            '{' | '[' => stack.push(Frame {
                object: c == '{',
                slot: if c == '{' { Slot::Key } else { Slot::Value },
                member: i,
            }),
            '}' | ']' => {
                stack.pop();
                match stack.last_mut() {
                    Some(frame) => frame.slot = Slot::AfterValue,
                    None => return &text[..i + c.len_utf8()],
                }
            }
            '"' => {
                let key = stack.last().is_some_and(|f| f.object && f.slot == Slot::Key);
                if key && let Some(frame) = stack.last_mut() {
                    frame.member = i;
                }
                string = Some(Str {
                    key,
                    escape: None,
                    hex_left: 0,
                    hex: 0,
                    after_backslash: false,
                });
            }
            ':' => {
                if let Some(frame) = stack.last_mut() {
                    frame.slot = Slot::Value;
                }
            }
            ',' => {
                if let Some(frame) = stack.last_mut() {
                    frame.slot = if frame.object { Slot::Key } else { Slot::Value };
                }
            }
            c if c.is_whitespace() => {}
            _ => {
                scalar = Some(i);
                if let Some(frame) = stack.last_mut() {
                    frame.slot = Slot::AfterValue;
                }
            }
        }
    }

    let Some(frame) = stack.last() else {
        return text;
    };

    if let Some(s) = &string {
        return match (s.key, s.escape) {
            (true, _) => &text[..frame.member],
            (false, Some(at)) => &text[..at],
            (false, None) => text,
        };
    }
    if let Some(at) = scalar
        && !is_complete_scalar(&text[at..])
    {
        // Cutting an object member also cuts its key
        let cut = if frame.object { frame.member } else { at };
        return &text[..cut];
    }
    if frame.object && matches!(frame.slot, Slot::AfterKey | Slot::Value) {
        return &text[..frame.member];
    }
    text
}

/// Feed one character of a string body; `true` when it closes the string
fn scan_string_char(s: &mut Str, i: usize, c: char) -> bool {
    if s.hex_left > 0 {
        s.hex = s.hex * 16 + c.to_digit(16).unwrap_or(0);
        s.hex_left -= 1;
        if s.hex_left == 0 && !(0xD800..0xDC00).contains(&s.hex) {
            s.escape = None;
        }
        return false;
    }
    if s.after_backslash {
        s.after_backslash = false;
        if c == 'u' {
            s.hex_left = 4;
            s.hex = 0;
        } else {
            s.escape = None;
        }
        return false;
    }
    match c {
        '\\' => {
            s.after_backslash = true;
            // The low half of a surrogate pair extends the open escape
            s.escape.get_or_insert(i);
            false
        }
        '"' => true,
        _ => {
            // A high surrogate not followed by an escape stays as written
            s.escape = None;
            false
        }
    }
}

fn is_complete_scalar(token: &str) -> bool {
    matches!(token, "true" | "false" | "null") || token.ends_with(|c: char| c.is_ascii_digit())
}
