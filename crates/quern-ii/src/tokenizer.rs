//! Term extraction.
//!
//! The tokenizer implied by a lexicon's encoding: ASCII alphanumeric runs
//! fold to lowercase word tokens; any other run of characters emits
//! character bigrams (a lone character emits itself). Token positions are
//! the token indices of the scan.

use quern_types::Encoding;

/// One extracted term occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Term bytes as they enter the lexicon.
    pub term: Vec<u8>,
    /// Token index within the tokenized text.
    pub position: u32,
}

/// Tokenize `text`, continuing the position counter from `base`.
#[must_use]
pub fn tokenize_from(encoding: Encoding, text: &[u8], base: u32) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut position = base;
    let mut at = 0;
    while at < text.len() {
        let byte = text[at];
        if byte.is_ascii_alphanumeric() {
            let start = at;
            while at < text.len() && text[at].is_ascii_alphanumeric() {
                at += 1;
            }
            tokens.push(Token {
                term: text[start..at].to_ascii_lowercase(),
                position,
            });
            position += 1;
        } else if byte.is_ascii() {
            // Separator.
            at += 1;
        } else {
            // A run of multibyte characters becomes bigrams.
            let mut chars = Vec::new();
            while at < text.len() && !text[at].is_ascii() {
                let len = encoding.char_len(text, at).max(1);
                chars.push(&text[at..at + len]);
                at += len;
            }
            if chars.len() == 1 {
                tokens.push(Token {
                    term: chars[0].to_vec(),
                    position,
                });
                position += 1;
            } else {
                for pair in chars.windows(2) {
                    let mut term = pair[0].to_vec();
                    term.extend_from_slice(pair[1]);
                    tokens.push(Token { term, position });
                    position += 1;
                }
            }
        }
    }
    tokens
}

/// Tokenize `text` with positions starting at 0.
#[must_use]
pub fn tokenize(encoding: Encoding, text: &[u8]) -> Vec<Token> {
    tokenize_from(encoding, text, 0)
}
