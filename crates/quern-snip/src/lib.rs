//! Keyword-conditioned windowed snippet extraction.
//!
//! A [`Snip`] holds up to [`MAX_CONDS`] keyword conditions, each with its
//! own highlight tags. [`Snip::exec`] makes a single pass over the text,
//! proposes a window of at most `width` original bytes around each match
//! (clipped against the previous window and snapped to character
//! boundaries), folds matches that land inside an open window into it, and
//! caps the number of windows at `max_results`. [`Snip::get_result`]
//! renders a window with every match wrapped in its tags, passing
//! non-keyword bytes through the optional output mapping.

mod normalize;

pub use normalize::{normalize, Normalized};

use memchr::memmem;
use quern_error::{QuernError, Result};
use quern_types::Encoding;
use tracing::trace;

/// Upper bound on `max_results`.
pub const MAX_RESULTS: u32 = 16;

/// Upper bound on the number of conditions.
pub const MAX_CONDS: usize = 32;

bitflags::bitflags! {
    /// Behavior flags for [`Snip`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SnipFlags: u32 {
        /// Match on a case/width-folded, whitespace-stripped shadow of
        /// the text.
        const NORMALIZE = 1 << 0;
        /// Take owned copies of the tag bytes (always the case here; the
        /// flag is kept for API compatibility).
        const COPY_TAG = 1 << 1;
        /// Advance a window start past leading blanks.
        const SKIP_LEADING_SPACES = 1 << 2;
    }
}

/// Output byte mapping applied outside keyword spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnipMapping {
    /// Bytes pass through verbatim.
    #[default]
    None,
    /// `& < > "` become HTML entities.
    Html,
}

#[derive(Debug, Clone)]
struct Cond {
    keyword: Vec<u8>,
    open_tag: Vec<u8>,
    close_tag: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct Match {
    start: usize,
    end: usize,
    cond: usize,
}

#[derive(Debug, Clone)]
struct Window {
    start: usize,
    end: usize,
    matches: Vec<Match>,
}

/// Snippet extractor.
#[derive(Debug)]
pub struct Snip {
    encoding: Encoding,
    flags: SnipFlags,
    width: u32,
    max_results: u32,
    default_open: Vec<u8>,
    default_close: Vec<u8>,
    mapping: SnipMapping,
    conds: Vec<Cond>,
    text: Vec<u8>,
    windows: Vec<Window>,
    max_tagged_len: u32,
}

impl Snip {
    /// Build an extractor.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero `width` or a `max_results` outside
    /// `[1, MAX_RESULTS]`.
    pub fn new(
        encoding: Encoding,
        flags: SnipFlags,
        width: u32,
        max_results: u32,
        default_open: &[u8],
        default_close: &[u8],
        mapping: SnipMapping,
    ) -> Result<Self> {
        if width == 0 {
            return Err(QuernError::invalid_argument("zero width"));
        }
        if max_results == 0 || max_results > MAX_RESULTS {
            return Err(QuernError::invalid_argument(format!(
                "max_results {max_results} outside [1, {MAX_RESULTS}]"
            )));
        }
        Ok(Self {
            encoding,
            flags,
            width,
            max_results,
            default_open: default_open.to_vec(),
            default_close: default_close.to_vec(),
            mapping,
            conds: Vec::new(),
            text: Vec::new(),
            windows: Vec::new(),
            max_tagged_len: 0,
        })
    }

    /// Add a keyword condition; empty tags fall back to the defaults.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty keyword, a keyword longer than the
    /// window width, or a full condition table.
    pub fn add_cond(&mut self, keyword: &[u8], open_tag: &[u8], close_tag: &[u8]) -> Result<()> {
        if keyword.is_empty() {
            return Err(QuernError::invalid_argument("empty keyword"));
        }
        if keyword.len() > self.width as usize {
            return Err(QuernError::invalid_argument(format!(
                "keyword length {} exceeds width {}",
                keyword.len(),
                self.width
            )));
        }
        if self.conds.len() >= MAX_CONDS {
            return Err(QuernError::invalid_argument(format!(
                "more than {MAX_CONDS} conditions"
            )));
        }
        let open = if open_tag.is_empty() {
            self.default_open.clone()
        } else {
            open_tag.to_vec()
        };
        let close = if close_tag.is_empty() {
            self.default_close.clone()
        } else {
            close_tag.to_vec()
        };
        self.conds.push(Cond {
            keyword: keyword.to_vec(),
            open_tag: open,
            close_tag: close,
        });
        Ok(())
    }

    /// Scan `text` and lay out the result windows.
    ///
    /// Returns `(n_results, max_tagged_len)`; `max_tagged_len` includes
    /// one byte for a terminator, so every rendered result is strictly
    /// shorter.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for empty text.
    pub fn exec(&mut self, text: &[u8]) -> Result<(u32, u32)> {
        if text.is_empty() {
            return Err(QuernError::invalid_argument("empty text"));
        }
        self.text = text.to_vec();
        self.windows.clear();
        self.max_tagged_len = 0;

        let matches = self.find_matches(text);
        trace!(n_matches = matches.len(), "snip scan complete");

        let width = self.width as usize;
        let mut prev_end = 0usize;
        for m in matches {
            if let Some(window) = self.windows.last_mut() {
                if m.start < window.end {
                    // Inside (or straddling) the open window.
                    let clear_of_last = window
                        .matches
                        .last()
                        .is_none_or(|last| m.start >= last.end);
                    if m.end <= window.end && clear_of_last {
                        window.matches.push(m);
                    }
                    continue;
                }
            }
            if self.windows.len() as u32 >= self.max_results {
                break;
            }
            let desired = m.start.saturating_sub((width - (m.end - m.start)) / 2);
            let mut start = desired.max(prev_end);
            while !self.encoding.is_char_boundary(text, start) {
                start += 1;
            }
            if self.flags.contains(SnipFlags::SKIP_LEADING_SPACES) {
                while start < m.start && text[start].is_ascii_whitespace() {
                    start += self.encoding.char_len(text, start).max(1);
                }
            }
            let mut end = (start + width).min(text.len());
            while end > m.end && !self.encoding.is_char_boundary(text, end) {
                end -= 1;
            }
            prev_end = end;
            self.windows.push(Window {
                start,
                end,
                matches: vec![m],
            });
        }

        // Rendered length of each window, mapping expansion included,
        // plus one byte for a terminator.
        for window in &self.windows {
            let mut rendered = 0usize;
            let mut cursor = window.start;
            for m in &window.matches {
                rendered += self.mapped_len(&text[cursor..m.start]);
                let cond = &self.conds[m.cond];
                rendered += cond.open_tag.len() + (m.end - m.start) + cond.close_tag.len();
                cursor = m.end;
            }
            rendered += self.mapped_len(&text[cursor..window.end]);
            self.max_tagged_len = self.max_tagged_len.max(rendered as u32 + 1);
        }
        Ok((self.windows.len() as u32, self.max_tagged_len))
    }

    /// Number of result windows from the last [`Snip::exec`].
    #[must_use]
    pub fn n_results(&self) -> u32 {
        self.windows.len() as u32
    }

    /// Largest rendered result length plus one, from the last exec.
    #[must_use]
    pub const fn max_tagged_len(&self) -> u32 {
        self.max_tagged_len
    }

    /// Render result `index`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `index` is not below `n_results`.
    pub fn get_result(&self, index: u32) -> Result<Vec<u8>> {
        let window = self.windows.get(index as usize).ok_or_else(|| {
            QuernError::invalid_argument(format!(
                "result index {index} outside [0, {})",
                self.windows.len()
            ))
        })?;
        let mut out = Vec::with_capacity(self.max_tagged_len as usize);
        let mut cursor = window.start;
        for m in &window.matches {
            self.map_into(&mut out, &self.text[cursor..m.start]);
            let cond = &self.conds[m.cond];
            out.extend_from_slice(&cond.open_tag);
            out.extend_from_slice(&self.text[m.start..m.end]);
            out.extend_from_slice(&cond.close_tag);
            cursor = m.end;
        }
        self.map_into(&mut out, &self.text[cursor..window.end]);
        Ok(out)
    }

    fn find_matches(&self, text: &[u8]) -> Vec<Match> {
        let mut matches = Vec::new();
        if self.flags.contains(SnipFlags::NORMALIZE) {
            let shadow = normalize(self.encoding, text);
            for (cond_idx, cond) in self.conds.iter().enumerate() {
                let folded = normalize(self.encoding, &cond.keyword);
                if folded.bytes.is_empty() {
                    continue;
                }
                let finder = memmem::Finder::new(&folded.bytes);
                for at in finder.find_iter(&shadow.bytes) {
                    let (start, end) = shadow.original_span(at, at + folded.bytes.len());
                    matches.push(Match {
                        start,
                        end,
                        cond: cond_idx,
                    });
                }
            }
        } else {
            for (cond_idx, cond) in self.conds.iter().enumerate() {
                let finder = memmem::Finder::new(&cond.keyword);
                for at in finder.find_iter(text) {
                    matches.push(Match {
                        start: at,
                        end: at + cond.keyword.len(),
                        cond: cond_idx,
                    });
                }
            }
        }
        matches.sort_by_key(|m| (m.start, m.cond));
        matches
    }

    fn mapped_len(&self, bytes: &[u8]) -> usize {
        match self.mapping {
            SnipMapping::None => bytes.len(),
            SnipMapping::Html => bytes
                .iter()
                .map(|&b| match b {
                    b'&' => 5,
                    b'<' | b'>' => 4,
                    b'"' => 6,
                    _ => 1,
                })
                .sum(),
        }
    }

    fn map_into(&self, out: &mut Vec<u8>, bytes: &[u8]) {
        match self.mapping {
            SnipMapping::None => out.extend_from_slice(bytes),
            SnipMapping::Html => {
                for &b in bytes {
                    match b {
                        b'&' => out.extend_from_slice(b"&amp;"),
                        b'<' => out.extend_from_slice(b"&lt;"),
                        b'>' => out.extend_from_slice(b"&gt;"),
                        b'"' => out.extend_from_slice(b"&quot;"),
                        other => out.push(other),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
