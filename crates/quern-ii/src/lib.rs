//! Inverted index over a trie lexicon.
//!
//! For every term id the index stores a postings list of
//! `(rid, section, positions, tf, weight)`, kept sorted by
//! `(rid, section)`. Persistent state spans two segment files: the
//! directory file (`<path>`, short postings inline) and the chunk file
//! (`<path>.c`, spill-over postings blocks).
//!
//! Updates stage the whole diff of a call in memory and apply it only
//! once every term has resolved, so a failed call leaves no visible
//! mutation. The index never verifies that a referenced record is live;
//! removal is the caller's duty.

pub mod tokenizer;

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use quern_error::{QuernError, Result};
use quern_io::stream::{MetaReader, MetaWriter, read_stream, write_stream};
use quern_io::SegFile;
use quern_pat::PatTrie;
use quern_types::{Encoding, Id, SearchFlags, Values};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use tokenizer::tokenize_from;

/// Identifier string checked on open; mirrors the on-disk `ii_idstr`.
pub const II_MAGIC: &[u8; 8] = b"QUERNII1";

const SEG_SIZE: u32 = 4096;
const MAX_SEGS: u32 = 1 << 16;
const META_LEN: u32 = 64;
/// Encoded postings blocks up to this size stay inline in the directory.
const INLINE_MAX: usize = 64;

/// One posting: a term occurrence summary for `(rid, section)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// Record id.
    pub rid: Id,
    /// Section within the record.
    pub section: u32,
    /// Term frequency in the section.
    pub tf: u32,
    /// Scoring weight.
    pub weight: u32,
    /// Token positions of the occurrences.
    pub positions: SmallVec<[u32; 4]>,
}

/// Inverted index bound to a lexicon trie.
#[derive(Debug)]
pub struct InvIndex {
    encoding: Encoding,
    path: PathBuf,
    seg: SegFile,
    chunk: SegFile,
    postings: HashMap<u32, Vec<Posting>>,
}

impl InvIndex {
    /// Create the index files beside the given lexicon.
    ///
    /// # Errors
    ///
    /// `Syscall` on file creation failure.
    pub fn create(path: &Path, lexicon: &PatTrie) -> Result<Self> {
        let seg = SegFile::create(path, META_LEN, SEG_SIZE, MAX_SEGS)?;
        let chunk_path = chunk_path(path);
        let chunk = SegFile::create(&chunk_path, META_LEN, SEG_SIZE, MAX_SEGS)?;
        let mut this = Self {
            encoding: lexicon.encoding(),
            path: path.to_path_buf(),
            seg,
            chunk,
            postings: HashMap::new(),
        };
        this.persist()?;
        debug!(path = %path.display(), "inverted index created");
        Ok(this)
    }

    /// Open an existing index.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` with the observed id string on a magic mismatch;
    /// `Syscall` when either file is missing.
    pub fn open(path: &Path, lexicon: &PatTrie) -> Result<Self> {
        let mut seg = SegFile::open(path)?;
        let chunk_path = chunk_path(path);
        let mut chunk = SegFile::open(&chunk_path)?;

        let meta = seg.meta().to_vec();
        let mut r = MetaReader::new(&meta);
        let magic = r.bytes(8);
        if magic != II_MAGIC {
            return Err(QuernError::invalid_argument(format!(
                "invalid ii file. ii_idstr ({})",
                String::from_utf8_lossy(&magic)
                    .trim_end_matches('\0')
                    .escape_default()
            )));
        }
        let encoding = Encoding::from_tag(r.u8())?;
        if encoding != lexicon.encoding() {
            return Err(QuernError::invalid_argument(
                "lexicon encoding does not match the index",
            ));
        }
        let n_terms = r.u32();
        let dir_len = r.u64();
        let chunk_len = r.u64();

        let dir = read_stream(&mut seg, 0, dir_len)?;
        let chunk_stream = read_stream(&mut chunk, 0, chunk_len)?;

        let mut postings = HashMap::with_capacity(n_terms as usize);
        let mut dr = MetaReader::new(&dir);
        for _ in 0..n_terms {
            let term_id = dr.u32();
            let spilled = dr.u8() == 1;
            let block = if spilled {
                let off = dr.u64() as usize;
                let len = dr.u64() as usize;
                chunk_stream
                    .get(off..off + len)
                    .ok_or_else(|| QuernError::FileCorrupt {
                        path: chunk_path.clone(),
                        detail: format!("postings block for term {term_id} out of bounds"),
                    })?
                    .to_vec()
            } else {
                let len = dr.u32() as usize;
                dr.bytes(len)
            };
            postings.insert(term_id, decode_block(&block));
        }

        trace!(terms = postings.len(), "inverted index opened");
        Ok(Self {
            encoding,
            path: path.to_path_buf(),
            seg,
            chunk,
            postings,
        })
    }

    /// Delete both files of an index.
    ///
    /// # Errors
    ///
    /// `Syscall` when an unlink fails.
    pub fn remove(path: &Path) -> Result<()> {
        SegFile::remove(path)?;
        SegFile::remove(&chunk_path(path))
    }

    /// Flush the directory and chunk files.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn flush(&mut self) -> Result<()> {
        self.persist()
    }

    /// Close the index, flushing both files.
    ///
    /// # Errors
    ///
    /// Propagates flush failures.
    pub fn close(mut self) -> Result<()> {
        self.persist()
    }

    /// Diff `old` against `new` for `(rid, section)` and apply the
    /// resulting inserts, removals, and rewrites.
    ///
    /// A missing side is the empty value set, so adding a record is
    /// `update(rid, section, None, Some(v))` and removing it is the
    /// mirror image.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a nil `rid`; lexicon failures propagate.
    pub fn update(
        &mut self,
        lexicon: &mut PatTrie,
        rid: Id,
        section: u32,
        old: Option<&Values>,
        new: Option<&Values>,
    ) -> Result<()> {
        if rid.is_nil() {
            return Err(QuernError::invalid_argument("nil record id"));
        }
        let old_terms = self.extract(lexicon, section, old, false)?;
        let new_terms = self.extract(lexicon, section, new, true)?;

        // Stage the whole diff before touching the postings map.
        enum Op {
            Remove { term: u32, section: u32 },
            Upsert { term: u32, posting: Posting },
        }
        let mut ops = Vec::new();
        for (&(term, sect), occurrence) in &new_terms {
            if old_terms.get(&(term, sect)) == Some(occurrence) {
                continue;
            }
            ops.push(Op::Upsert {
                term,
                posting: Posting {
                    rid,
                    section: sect,
                    tf: occurrence.positions.len() as u32,
                    weight: occurrence.weight,
                    positions: occurrence.positions.iter().copied().collect(),
                },
            });
        }
        for &(term, sect) in old_terms.keys() {
            if !new_terms.contains_key(&(term, sect)) {
                ops.push(Op::Remove { term, section: sect });
            }
        }

        for op in ops {
            match op {
                Op::Remove { term, section } => {
                    // The emptied list stays allocated for the term.
                    let list = self.postings.entry(term).or_default();
                    list.retain(|p| !(p.rid == rid && p.section == section));
                }
                Op::Upsert { term, posting } => {
                    let list = self.postings.entry(term).or_default();
                    match list
                        .binary_search_by_key(&(posting.rid, posting.section), |p| {
                            (p.rid, p.section)
                        }) {
                        Ok(at) => list[at] = posting,
                        Err(at) => list.insert(at, posting),
                    }
                }
            }
        }
        trace!(rid = rid.get(), section, "index updated");
        Ok(())
    }

    /// Open a cursor over one term's postings within `[rid_min, rid_max]`.
    ///
    /// At most `max_positions` positions survive per posting; 0 keeps
    /// them all.
    #[must_use]
    pub fn cursor(
        &self,
        term_id: Id,
        rid_min: Id,
        rid_max: Id,
        max_positions: u32,
    ) -> IiCursor {
        let postings = self
            .postings
            .get(&term_id.get())
            .map(|list| {
                list.iter()
                    .filter(|p| p.rid >= rid_min.max(Id(1)) && p.rid <= rid_max)
                    .map(|p| {
                        let mut posting = p.clone();
                        if max_positions > 0 && posting.positions.len() > max_positions as usize
                        {
                            posting.positions.truncate(max_positions as usize);
                        }
                        posting
                    })
                    .collect()
            })
            .unwrap_or_default();
        IiCursor { postings, at: 0 }
    }

    /// Term occurrences of one side of an update, grouped by
    /// `(term_id, effective section)`.
    fn extract(
        &self,
        lexicon: &mut PatTrie,
        call_section: u32,
        values: Option<&Values>,
        add_terms: bool,
    ) -> Result<HashMap<(u32, u32), Occurrence>> {
        let mut out: HashMap<(u32, u32), Occurrence> = HashMap::new();
        let Some(values) = values else {
            return Ok(out);
        };
        let mut position = 0;
        for value in values {
            let section = if value.section == 0 {
                call_section
            } else {
                value.section
            };
            let tokens = tokenize_from(self.encoding, &value.bytes, position);
            position += tokens.len() as u32;
            for token in tokens {
                let term_id = if add_terms {
                    lexicon.lookup(&token.term, SearchFlags::ADD)?
                } else {
                    lexicon.lookup(&token.term, SearchFlags::EXACT)?
                };
                if term_id.is_nil() {
                    warn!(
                        term = %String::from_utf8_lossy(&token.term),
                        "removing occurrences of a term absent from the lexicon"
                    );
                    continue;
                }
                let entry = out.entry((term_id.get(), section)).or_insert_with(|| {
                    Occurrence {
                        positions: Vec::new(),
                        weight: value.weight,
                    }
                });
                entry.positions.push(token.position);
                entry.weight = entry.weight.max(value.weight);
            }
        }
        Ok(out)
    }

    fn persist(&mut self) -> Result<()> {
        let mut dir = MetaWriter::new();
        let mut chunk_stream = Vec::new();
        let mut term_ids: Vec<u32> = self.postings.keys().copied().collect();
        term_ids.sort_unstable();
        for term_id in &term_ids {
            let list = &self.postings[term_id];
            let block = encode_block(list);
            dir.u32(*term_id);
            if block.len() <= INLINE_MAX {
                dir.u8(0).u32(block.len() as u32).bytes(&block);
            } else {
                dir.u8(1)
                    .u64(chunk_stream.len() as u64)
                    .u64(block.len() as u64);
                chunk_stream.extend_from_slice(&block);
            }
        }
        let dir = dir.finish();

        let mut w = MetaWriter::new();
        w.bytes(II_MAGIC)
            .u8(self.encoding as u8)
            .u32(term_ids.len() as u32)
            .u64(dir.len() as u64)
            .u64(chunk_stream.len() as u64);
        self.seg.write_meta(&w.finish())?;
        write_stream(&mut self.seg, 0, &dir)?;

        let mut cw = MetaWriter::new();
        cw.bytes(II_MAGIC).u8(self.encoding as u8);
        self.chunk.write_meta(&cw.finish())?;
        write_stream(&mut self.chunk, 0, &chunk_stream)?;

        self.seg.flush()?;
        self.chunk.flush()
    }

    /// The directory file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Occurrence {
    positions: Vec<u32>,
    weight: u32,
}

/// Cursor over one term's postings, ascending `(rid, section)`.
#[derive(Debug)]
pub struct IiCursor {
    postings: Vec<Posting>,
    at: usize,
}

impl IiCursor {
    /// Next posting, or `None` at end of stream.
    pub fn next(&mut self) -> Option<&Posting> {
        let posting = self.postings.get(self.at)?;
        self.at += 1;
        Some(posting)
    }
}

fn chunk_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".c");
    PathBuf::from(os)
}

fn encode_block(list: &[Posting]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, list.len() as u32);
    let mut last_rid = 0;
    for posting in list {
        write_varint(&mut out, posting.rid.get() - last_rid);
        last_rid = posting.rid.get();
        write_varint(&mut out, posting.section);
        write_varint(&mut out, posting.tf);
        write_varint(&mut out, posting.weight);
        write_varint(&mut out, posting.positions.len() as u32);
        let mut last_pos = 0;
        for &pos in &posting.positions {
            write_varint(&mut out, pos.wrapping_sub(last_pos));
            last_pos = pos;
        }
    }
    out
}

fn decode_block(block: &[u8]) -> Vec<Posting> {
    let mut at = 0;
    let count = read_varint(block, &mut at);
    let mut out = Vec::with_capacity(count as usize);
    let mut last_rid = 0;
    for _ in 0..count {
        let rid = last_rid + read_varint(block, &mut at);
        last_rid = rid;
        let section = read_varint(block, &mut at);
        let tf = read_varint(block, &mut at);
        let weight = read_varint(block, &mut at);
        let n_positions = read_varint(block, &mut at);
        let mut positions = SmallVec::new();
        let mut last_pos: u32 = 0;
        for _ in 0..n_positions {
            let pos = last_pos.wrapping_add(read_varint(block, &mut at));
            positions.push(pos);
            last_pos = pos;
        }
        out.push(Posting {
            rid: Id(rid),
            section,
            tf,
            weight,
            positions,
        });
    }
    out
}

fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8], at: &mut usize) -> u32 {
    let mut value = 0u32;
    let mut shift = 0;
    while let Some(&byte) = bytes.get(*at) {
        *at += 1;
        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    value
}
