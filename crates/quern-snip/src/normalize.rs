//! Normalization shadow text.
//!
//! Matching under `NORMALIZE` runs against a folded copy of the text:
//! ASCII letters lowercase, full-width ASCII compatibility forms fold to
//! their ASCII counterparts, and whitespace disappears entirely (so a
//! keyword can match across a line break). Every shadow byte remembers
//! the original character it came from, so match offsets map back to
//! spans of the original bytes.

use quern_types::Encoding;

/// Folded text plus the per-byte offset map back into the original.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Folded bytes to run the match against.
    pub bytes: Vec<u8>,
    // (original char start, original char length) per shadow byte.
    spans: Vec<(u32, u32)>,
}

impl Normalized {
    /// Map a shadow-byte range back to an original-byte span.
    #[must_use]
    pub fn original_span(&self, start: usize, end: usize) -> (usize, usize) {
        if start >= end || end > self.spans.len() {
            return (0, 0);
        }
        let from = self.spans[start].0 as usize;
        let (last_start, last_len) = self.spans[end - 1];
        (from, last_start as usize + last_len as usize)
    }
}

/// Build the normalization shadow of `text`.
#[must_use]
pub fn normalize(encoding: Encoding, text: &[u8]) -> Normalized {
    let mut bytes = Vec::with_capacity(text.len());
    let mut spans = Vec::with_capacity(text.len());
    let mut at = 0;
    while at < text.len() {
        let len = encoding.char_len(text, at).max(1);
        let ch = &text[at..at + len];
        let emitted = fold_char(encoding, ch);
        for &b in &emitted {
            bytes.push(b);
            spans.push((at as u32, len as u32));
        }
        at += len;
    }
    Normalized { bytes, spans }
}

/// Folded bytes of one character; empty for whitespace.
fn fold_char(encoding: Encoding, ch: &[u8]) -> Vec<u8> {
    if ch.len() == 1 {
        let b = ch[0];
        if b.is_ascii_whitespace() {
            return Vec::new();
        }
        return vec![b.to_ascii_lowercase()];
    }
    if encoding == Encoding::Utf8 {
        // Ideographic space.
        if ch == [0xe3, 0x80, 0x80] {
            return Vec::new();
        }
        // Full-width ASCII block U+FF01..=U+FF5E folds to ASCII.
        if ch.len() == 3 && ch[0] == 0xef && (ch[1] == 0xbc || ch[1] == 0xbd) {
            let code = 0xf000 | (u32::from(ch[1] & 0x3f) << 6) | u32::from(ch[2] & 0x3f);
            if (0xff01..=0xff5e).contains(&code) {
                let ascii = (code - 0xff00 + 0x20) as u8;
                return vec![ascii.to_ascii_lowercase()];
            }
        }
    }
    ch.to_vec()
}
