//! Command records parsed from recovered history content

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{decode_first, TextCodec, HISTORY_CANDIDATES};

/// One non-empty history line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// 1-based position of the line in the decoded text, blank lines included
    pub line_number: usize,
    pub command: String,
}

/// Decode history bytes with the default candidate order
pub fn decode(bytes: &[u8]) -> (Vec<CommandRecord>, Option<TextCodec>) {
    decode_with(bytes, &HISTORY_CANDIDATES)
}

/// Decode with an explicit candidate list; `None` when no candidate fits
pub fn decode_with(bytes: &[u8], candidates: &[TextCodec]) -> (Vec<CommandRecord>, Option<TextCodec>) {
    let Some((text, codec)) = decode_first(bytes, candidates) else {
        debug!(len = bytes.len(), "No candidate encoding accepted the content");
        return (Vec::new(), None);
    };
    (parse_records(&text), Some(codec))
}

/// Split into lines, trim, drop blanks, keep original positions
pub fn parse_records(text: &str) -> Vec<CommandRecord> {
    split_lines(text)
        .into_iter()
        .enumerate()
        .filter_map(|(idx, line)| {
            let command = line.trim_matches(is_space);
            (!command.is_empty()).then(|| CommandRecord {
                line_number: idx + 1,
                command: command.to_string(),
            })
        })
        .collect()
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Unicode whitespace plus the ASCII information separators
fn is_space(c: char) -> bool {
    c.is_whitespace() || ('\x1c'..='\x1f').contains(&c)
}

/// Universal-newline split; a trailing terminator does not add an empty line
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        lines.push(&text[start..i]);
        let mut end = i + c.len_utf8();
        if c == '\r' {
            if let Some(&(_, '\n')) = chars.peek() {
                chars.next();
                end += 1;
            }
        }
        start = end;
    }

    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}
