//! Text decoding with an ordered list of candidate encodings
//!
//! The first encoding that decodes the whole input without errors wins.
//! Used for file content and for on-disk names that are not already Unicode.

use encoding_rs::{EUC_KR, UTF_8};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

use crate::fs::EntryName;

/// A text encoding tried by [`decode_first`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TextCodec {
    /// Strict UTF-8; a byte order mark stays in the text
    #[serde(rename = "utf-8")]
    Utf8,
    /// Strict UTF-8 with a leading byte order mark removed
    #[serde(rename = "utf-8-sig")]
    Utf8Sig,
    /// Windows code page 949 (Unified Hangul Code)
    #[serde(rename = "cp949")]
    Cp949,
    /// KS X 1001 two-byte EUC-KR only
    #[serde(rename = "euc-kr")]
    EucKr,
    /// ISO-8859-1; accepts every byte sequence
    #[serde(rename = "latin-1")]
    Latin1,
}

/// Priority order for recovered history content
pub const HISTORY_CANDIDATES: [TextCodec; 5] = [
    TextCodec::Utf8,
    TextCodec::Utf8Sig,
    TextCodec::Cp949,
    TextCodec::EucKr,
    TextCodec::Latin1,
];

/// Priority order for legacy byte names (FAT 8.3 entries)
pub const NAME_CANDIDATES: [TextCodec; 2] = [TextCodec::Utf8, TextCodec::Cp949];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

impl TextCodec {
    pub fn name(&self) -> &'static str {
        match self {
            TextCodec::Utf8 => "utf-8",
            TextCodec::Utf8Sig => "utf-8-sig",
            TextCodec::Cp949 => "cp949",
            TextCodec::EucKr => "euc-kr",
            TextCodec::Latin1 => "latin-1",
        }
    }

    /// Decode all of `bytes`, or `None` on the first malformed sequence
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self {
            TextCodec::Utf8 => UTF_8.decode_without_bom_handling_and_without_replacement(bytes),
            TextCodec::Utf8Sig => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                UTF_8.decode_without_bom_handling_and_without_replacement(body)
            }
            // encoding_rs implements EUC-KR as the windows-949 superset
            TextCodec::Cp949 => EUC_KR.decode_without_bom_handling_and_without_replacement(bytes),
            TextCodec::EucKr => {
                if is_strict_euc_kr(bytes) {
                    EUC_KR.decode_without_bom_handling_and_without_replacement(bytes)
                } else {
                    None
                }
            }
            TextCodec::Latin1 => Some(encoding_rs::mem::decode_latin1(bytes)),
        }
    }
}

impl fmt::Display for TextCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Plain EUC-KR: ASCII plus byte pairs in 0xA1..=0xFE
fn is_strict_euc_kr(bytes: &[u8]) -> bool {
    let mut iter = bytes.iter();
    while let Some(&b) = iter.next() {
        if b < 0x80 {
            continue;
        }
        if !(0xA1..=0xFE).contains(&b) {
            return false;
        }
        match iter.next() {
            Some(&trail) if (0xA1..=0xFE).contains(&trail) => {}
            _ => return false,
        }
    }
    true
}

/// Decode with the first candidate that accepts the whole input
pub fn decode_first<'a>(bytes: &'a [u8], candidates: &[TextCodec]) -> Option<(Cow<'a, str>, TextCodec)> {
    candidates
        .iter()
        .find_map(|codec| codec.decode(bytes).map(|text| (text, *codec)))
}

/// Display form of an on-disk name; never fails
pub fn decode_name(name: &EntryName) -> String {
    match name {
        EntryName::Text(text) => text.clone(),
        EntryName::Utf16(units) => String::from_utf16_lossy(units),
        EntryName::Bytes(bytes) => match decode_first(bytes, &NAME_CANDIDATES) {
            Some((text, _)) => text.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}
