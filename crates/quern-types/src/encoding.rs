//! Text encodings understood by the engine.
//!
//! The encoding tag selects tokenization and character-boundary rules; no
//! conversion between encodings happens inside the engine.

use quern_error::{QuernError, Result};

/// Character encoding of keys, documents, and snippets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Encoding {
    /// Raw bytes; every byte is its own character.
    None = 0,
    /// EUC-JP.
    EucJp = 1,
    /// UTF-8 (the default).
    #[default]
    Utf8 = 2,
    /// Shift-JIS.
    Sjis = 3,
    /// ISO-8859-1.
    Latin1 = 4,
    /// KOI8-R.
    Koi8r = 5,
}

impl Encoding {
    /// Parse the single-letter selector used on the command line.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for any letter outside `n/e/u/s/l/k`.
    pub fn from_letter(letter: char) -> Result<Self> {
        match letter.to_ascii_lowercase() {
            'n' => Ok(Self::None),
            'e' => Ok(Self::EucJp),
            'u' => Ok(Self::Utf8),
            's' => Ok(Self::Sjis),
            'l' => Ok(Self::Latin1),
            'k' => Ok(Self::Koi8r),
            other => Err(QuernError::invalid_argument(format!(
                "unknown encoding letter '{other}'"
            ))),
        }
    }

    /// Decode the persisted tag byte.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the byte is outside the known range.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::EucJp),
            2 => Ok(Self::Utf8),
            3 => Ok(Self::Sjis),
            4 => Ok(Self::Latin1),
            5 => Ok(Self::Koi8r),
            other => Err(QuernError::invalid_argument(format!(
                "unknown encoding tag {other}"
            ))),
        }
    }

    /// Byte length of the character starting at `text[at]`.
    ///
    /// Single-byte encodings always answer 1. For UTF-8 the answer follows
    /// the lead byte; for EUC-JP and Shift-JIS the lead-byte ranges of the
    /// two-byte forms are honored. Malformed input degrades to 1 so that a
    /// scan always advances.
    #[must_use]
    pub fn char_len(self, text: &[u8], at: usize) -> usize {
        let Some(&b) = text.get(at) else { return 0 };
        let len = match self {
            Self::None | Self::Latin1 | Self::Koi8r => 1,
            Self::Utf8 => match b {
                0x00..=0x7f => 1,
                0xc0..=0xdf => 2,
                0xe0..=0xef => 3,
                0xf0..=0xf7 => 4,
                _ => 1,
            },
            Self::EucJp => match b {
                0x8f => 3,
                0x8e | 0xa1..=0xfe => 2,
                _ => 1,
            },
            Self::Sjis => match b {
                0x81..=0x9f | 0xe0..=0xfc => 2,
                _ => 1,
            },
        };
        len.min(text.len() - at)
    }

    /// True when `at` is the start of a character (or the end of text).
    #[must_use]
    pub fn is_char_boundary(self, text: &[u8], at: usize) -> bool {
        if at >= text.len() {
            return true;
        }
        match self {
            Self::None | Self::Latin1 | Self::Koi8r => true,
            Self::Utf8 => !matches!(text[at], 0x80..=0xbf),
            // Stateful encodings need a scan from the start.
            Self::EucJp | Self::Sjis => {
                let mut pos = 0;
                while pos < at {
                    pos += self.char_len(text, pos);
                }
                pos == at
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_round_trip() {
        for (letter, enc) in [
            ('n', Encoding::None),
            ('e', Encoding::EucJp),
            ('u', Encoding::Utf8),
            ('s', Encoding::Sjis),
            ('l', Encoding::Latin1),
            ('k', Encoding::Koi8r),
        ] {
            assert_eq!(Encoding::from_letter(letter).unwrap(), enc);
            assert_eq!(
                Encoding::from_letter(letter.to_ascii_uppercase()).unwrap(),
                enc
            );
        }
        assert!(Encoding::from_letter('x').is_err());
    }

    #[test]
    fn utf8_char_len() {
        let text = "aセ".as_bytes();
        assert_eq!(Encoding::Utf8.char_len(text, 0), 1);
        assert_eq!(Encoding::Utf8.char_len(text, 1), 3);
        assert!(Encoding::Utf8.is_char_boundary(text, 1));
        assert!(!Encoding::Utf8.is_char_boundary(text, 2));
    }
}
