//! Ordered key store over a patricia (crit-bit) trie.
//!
//! Keys are arbitrary byte strings bounded by [`MAX_KEY_SIZE`]. The trie
//! tests bit positions over a 9-bit symbol expansion of the key: each byte
//! is preceded by a 1 "continuation" bit and the key ends with a 0
//! "terminator" symbol. Under this expansion no key's bit string is a
//! prefix of another's, and symbol order is byte-lexicographic order, so
//! cursors walk keys in sorted order and longest-common-prefix queries
//! resolve without special cases.
//!
//! In "sis" mode (suffix-indexed strings) every inserted key also inserts
//! its proper suffixes at character boundaries, each suffix entry carrying
//! its own id plus a child/sibling link to the entry one character
//! shorter; suffix search walks those links.

mod cursor;
mod node;

pub use cursor::PatCursor;

use std::path::Path;

use quern_error::{QuernError, Result};
use quern_hash::Hash;
use quern_io::stream::{MetaReader, MetaWriter, read_stream, write_stream};
use quern_io::SegFile;
use quern_types::{CursorFlags, Encoding, Id, SearchFlags};
use tracing::{debug, trace};

use node::{Inner, Leaf, NodeRef};

/// Largest key accepted, in bytes.
pub const MAX_KEY_SIZE: usize = 8192;

/// File magic stored in the metadata area.
pub const PAT_MAGIC: &[u8; 8] = b"QUERNPAT";

const SEG_SIZE: u32 = 4096;
const MAX_SEGS: u32 = 1 << 16;
const META_LEN: u32 = 96;

bitflags::bitflags! {
    /// Creation flags for [`PatTrie`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PatFlags: u32 {
        /// Suffix-index every inserted key ("sis" mode).
        const WITH_SIS = 1 << 0;
    }
}

/// Ordered dictionary of byte keys with dense ids.
#[derive(Debug)]
pub struct PatTrie {
    encoding: Encoding,
    flags: PatFlags,
    key_max: u32,
    root: NodeRef,
    // Slot i holds the leaf with id i+1.
    leaves: Vec<Option<Leaf>>,
    leaf_garbage: Vec<u32>,
    inners: Vec<Option<Inner>>,
    inner_garbage: Vec<u32>,
    keys: Vec<u8>,
    n_entries: u32,
    file: Option<SegFile>,
    read_only: bool,
}

impl PatTrie {
    /// Create a trie; `path = None` keeps it memory-only.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero or oversize `key_max`; `Syscall` on
    /// file creation failure.
    pub fn create(
        path: Option<&Path>,
        key_max: u32,
        flags: PatFlags,
        encoding: Encoding,
    ) -> Result<Self> {
        if key_max == 0 || key_max as usize > MAX_KEY_SIZE {
            return Err(QuernError::invalid_argument(format!(
                "key_max {key_max} outside [1, {MAX_KEY_SIZE}]"
            )));
        }
        let file = match path {
            Some(p) => Some(SegFile::create(p, META_LEN, SEG_SIZE, MAX_SEGS)?),
            None => None,
        };
        let mut this = Self {
            encoding,
            flags,
            key_max,
            root: NodeRef::NONE,
            leaves: Vec::new(),
            leaf_garbage: Vec::new(),
            inners: Vec::new(),
            inner_garbage: Vec::new(),
            keys: Vec::new(),
            n_entries: 0,
            file,
            read_only: false,
        };
        this.persist()?;
        debug!(?flags, key_max, "pat trie created");
        Ok(this)
    }

    /// Open a persistent trie read-write.
    ///
    /// # Errors
    ///
    /// `FileCorrupt` on a magic mismatch; `Syscall` on I/O failure.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_mode(path, false)
    }

    /// Open a persistent trie read-only; mutations fail `InvalidArgument`.
    ///
    /// # Errors
    ///
    /// As [`PatTrie::open`].
    pub fn open_read_only(path: &Path) -> Result<Self> {
        Self::open_mode(path, true)
    }

    fn open_mode(path: &Path, read_only: bool) -> Result<Self> {
        let mut file = if read_only {
            SegFile::open_read_only(path)?
        } else {
            SegFile::open(path)?
        };
        let meta = file.meta().to_vec();
        let mut r = MetaReader::new(&meta);
        let magic = r.bytes(8);
        if magic != PAT_MAGIC {
            return Err(QuernError::FileCorrupt {
                path: path.to_path_buf(),
                detail: format!(
                    "bad pat magic ({})",
                    String::from_utf8_lossy(&magic).escape_default()
                ),
            });
        }
        let encoding = Encoding::from_tag(r.u8())?;
        let flags = PatFlags::from_bits_truncate(r.u32());
        let key_max = r.u32();
        let root = NodeRef(r.u32());
        let n_entries = r.u32();
        let leaf_count = r.u32();
        let inner_count = r.u32();
        let leaf_len = r.u64();
        let inner_len = r.u64();
        let key_len = r.u64();

        let stream = read_stream(&mut file, 0, leaf_len + inner_len + key_len)?;
        let (leaf_bytes, rest) = stream.split_at(leaf_len as usize);
        let (inner_bytes, key_bytes) = rest.split_at(inner_len as usize);

        let mut leaves = Vec::with_capacity(leaf_count as usize);
        let mut lr = MetaReader::new(leaf_bytes);
        for _ in 0..leaf_count {
            if lr.u8() == 0 {
                leaves.push(None);
                continue;
            }
            leaves.push(Some(Leaf {
                key_off: lr.u32(),
                key_len: lr.u32(),
                sis_child: NodeRef(lr.u32()),
                sis_sibling: NodeRef(lr.u32()),
            }));
        }
        let mut inners = Vec::with_capacity(inner_count as usize);
        let mut ir = MetaReader::new(inner_bytes);
        for _ in 0..inner_count {
            if ir.u8() == 0 {
                inners.push(None);
                continue;
            }
            inners.push(Some(Inner {
                bit: ir.u32(),
                left: NodeRef(ir.u32()),
                right: NodeRef(ir.u32()),
            }));
        }

        let leaf_garbage = leaves
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.is_none().then_some(i as u32 + 1))
            .collect();
        let inner_garbage = inners
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.is_none().then_some(i as u32))
            .collect();

        trace!(entries = n_entries, "pat trie opened");
        Ok(Self {
            encoding,
            flags,
            key_max,
            root,
            leaves,
            leaf_garbage,
            inners,
            inner_garbage,
            keys: key_bytes.to_vec(),
            n_entries,
            file: Some(file),
            read_only,
        })
    }

    /// Delete the file behind a persistent trie.
    ///
    /// # Errors
    ///
    /// `Syscall` when the unlink fails.
    pub fn remove(path: &Path) -> Result<()> {
        SegFile::remove(path)
    }

    /// Flush pending state to disk.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn flush(&mut self) -> Result<()> {
        self.persist()
    }

    /// Close the trie, flushing persistent state.
    ///
    /// # Errors
    ///
    /// Propagates flush failures.
    pub fn close(mut self) -> Result<()> {
        self.persist()
    }

    /// The trie's encoding.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Number of live entries (suffix entries included in sis mode).
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.n_entries
    }

    /// True when the trie holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.n_entries == 0
    }

    /// Key bytes for a live id.
    #[must_use]
    pub fn get_key(&self, id: Id) -> Option<&[u8]> {
        let leaf = self.leaf(id)?;
        Some(&self.keys[leaf.key_off as usize..(leaf.key_off + leaf.key_len) as usize])
    }

    /// Look a key up.
    ///
    /// `ADD` inserts when absent (suffix chain included in sis mode);
    /// `LCP` behaves as [`PatTrie::lcp_search`]; otherwise the match is
    /// exact. Returns [`Id::NIL`] when nothing matches.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for empty/oversize keys or `ADD` on a read-only
    /// trie.
    pub fn lookup(&mut self, key: &[u8], flags: SearchFlags) -> Result<Id> {
        self.check_key(key)?;
        if flags.contains(SearchFlags::LCP) {
            return self.lcp_search(key);
        }
        if flags.contains(SearchFlags::ADD) {
            if self.read_only {
                return Err(QuernError::invalid_argument("trie is read-only"));
            }
            if self.flags.contains(PatFlags::WITH_SIS) {
                return self.insert_with_suffixes(key);
            }
            return self.insert(key);
        }
        Ok(self.find_exact(key))
    }

    /// Longest stored key that is a prefix of `query`, or [`Id::NIL`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty or oversize query.
    pub fn lcp_search(&self, query: &[u8]) -> Result<Id> {
        self.check_key(query)?;
        if self.root.is_none() {
            return Ok(Id::NIL);
        }
        // Walk guided by the query's bits, remembering every terminator
        // test we passed on the continuation side: the left subtree there
        // holds the lone key that ends at that symbol.
        let mut candidates: Vec<(u32, NodeRef)> = Vec::new();
        let mut cur = self.root;
        while let Some(inner) = self.inner(cur) {
            let taken_right = bit_at(query, inner.bit);
            if taken_right && inner.bit % 9 == 0 {
                let sym = (inner.bit / 9) as usize;
                if sym <= query.len() {
                    candidates.push((sym as u32, inner.left));
                }
            }
            cur = if taken_right { inner.right } else { inner.left };
        }
        let leaf_id = cur.leaf_id();
        if let Some(key) = self.get_key(leaf_id) {
            if query.starts_with(key) {
                return Ok(leaf_id);
            }
        }
        while let Some((sym, subtree)) = candidates.pop() {
            let id = self.min_leaf(subtree);
            if let Some(key) = self.get_key(id) {
                if key.len() == sym as usize && query.starts_with(key) {
                    return Ok(id);
                }
            }
        }
        Ok(Id::NIL)
    }

    /// Insert the id of every stored key beginning with `prefix` into
    /// `out` (keys are the 4-byte little-endian ids).
    ///
    /// # Errors
    ///
    /// `EndOfData` when no stored key has the prefix; `InvalidArgument`
    /// for an empty or oversize prefix.
    pub fn prefix_search(&self, prefix: &[u8], out: &mut Hash) -> Result<()> {
        self.check_key(prefix)?;
        if self.root.is_none() {
            return Err(QuernError::EndOfData);
        }
        let limit = (prefix.len() * 9) as u32;
        let mut cur = self.root;
        while let Some(inner) = self.inner(cur) {
            if inner.bit >= limit {
                break;
            }
            cur = if bit_at(prefix, inner.bit) {
                inner.right
            } else {
                inner.left
            };
        }
        let probe = self.min_leaf(cur);
        let matched = self
            .get_key(probe)
            .is_some_and(|key| key.starts_with(prefix));
        if !matched {
            return Err(QuernError::EndOfData);
        }
        self.collect_leaves(cur, out)
    }

    /// Insert the id of every stored key having `suffix` as a suffix into
    /// `out` (keys are the 4-byte little-endian ids).
    ///
    /// Without sis mode only an exact match can answer.
    ///
    /// # Errors
    ///
    /// `EndOfData` when nothing matches; `InvalidArgument` for an empty or
    /// oversize suffix.
    pub fn suffix_search(&self, suffix: &[u8], out: &mut Hash) -> Result<()> {
        self.check_key(suffix)?;
        let id = self.find_exact(suffix);
        if id.is_nil() {
            return Err(QuernError::EndOfData);
        }
        if !self.flags.contains(PatFlags::WITH_SIS) {
            out.lookup(&id.get().to_le_bytes(), SearchFlags::ADD)?;
            return Ok(());
        }
        // DFS over the one-character-longer links.
        let mut pending = vec![id];
        while let Some(entry) = pending.pop() {
            out.lookup(&entry.get().to_le_bytes(), SearchFlags::ADD)?;
            let Some(leaf) = self.leaf(entry) else { continue };
            let mut child = leaf.sis_child;
            while !child.is_none() {
                let child_id = child.leaf_id();
                pending.push(child_id);
                child = match self.leaf(child_id) {
                    Some(c) => c.sis_sibling,
                    None => NodeRef::NONE,
                };
            }
        }
        Ok(())
    }

    /// Remove the entry for `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` when absent; `InvalidArgument` on a read-only trie.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        if self.read_only {
            return Err(QuernError::invalid_argument("trie is read-only"));
        }
        let id = self.find_exact(key);
        if id.is_nil() {
            return Err(QuernError::NotFound("pat key".to_owned()));
        }
        if self.flags.contains(PatFlags::WITH_SIS) {
            self.sis_unlink(key, id);
        }
        self.unsplice(key);
        self.leaves[id.get() as usize - 1] = None;
        self.leaf_garbage.push(id.get());
        self.n_entries -= 1;
        Ok(())
    }

    /// Open a range cursor over `[min, max]`.
    ///
    /// `GT`/`LT` open the endpoints; `DESCENDING` reverses the walk.
    #[must_use]
    pub fn cursor<'a>(
        &'a self,
        min: Option<&'a [u8]>,
        max: Option<&'a [u8]>,
        flags: CursorFlags,
    ) -> PatCursor<'a> {
        PatCursor::new(self, min, max, flags)
    }

    // ------------------------------------------------------------------
    // Tree internals
    // ------------------------------------------------------------------

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(QuernError::invalid_argument("empty key"));
        }
        if key.len() > self.key_max as usize {
            return Err(QuernError::invalid_argument(format!(
                "key length {} exceeds {}",
                key.len(),
                self.key_max
            )));
        }
        Ok(())
    }

    pub(crate) fn leaf(&self, id: Id) -> Option<&Leaf> {
        if id.is_nil() {
            return None;
        }
        self.leaves.get(id.get() as usize - 1)?.as_ref()
    }

    fn leaf_mut(&mut self, id: Id) -> Option<&mut Leaf> {
        if id.is_nil() {
            return None;
        }
        self.leaves.get_mut(id.get() as usize - 1)?.as_mut()
    }

    pub(crate) fn inner(&self, node: NodeRef) -> Option<&Inner> {
        if !node.is_inner() {
            return None;
        }
        self.inners.get(node.inner_index())?.as_ref()
    }

    pub(crate) const fn root(&self) -> NodeRef {
        self.root
    }

    fn find_exact(&self, key: &[u8]) -> Id {
        if self.root.is_none() {
            return Id::NIL;
        }
        let mut cur = self.root;
        while let Some(inner) = self.inner(cur) {
            cur = if bit_at(key, inner.bit) {
                inner.right
            } else {
                inner.left
            };
        }
        let id = cur.leaf_id();
        match self.get_key(id) {
            Some(stored) if stored == key => id,
            _ => Id::NIL,
        }
    }

    fn insert(&mut self, key: &[u8]) -> Result<Id> {
        if self.root.is_none() {
            let id = self.alloc_leaf(key);
            self.root = NodeRef::leaf(id);
            self.n_entries += 1;
            return Ok(id);
        }
        // Find the closest existing leaf, then the first differing bit.
        let mut cur = self.root;
        while let Some(inner) = self.inner(cur) {
            cur = if bit_at(key, inner.bit) {
                inner.right
            } else {
                inner.left
            };
        }
        let near = cur.leaf_id();
        let near_key = self
            .get_key(near)
            .ok_or_else(|| QuernError::internal("dangling leaf reference"))?;
        let Some(diff) = first_diff_bit(key, near_key) else {
            return Ok(near);
        };

        let new_id = self.alloc_leaf(key);
        let new_ref = NodeRef::leaf(new_id);
        let goes_right = bit_at(key, diff);

        // Splice a new inner node at the first position whose test bit
        // exceeds the differing bit.
        let mut at = self.root;
        let mut parent: Option<(NodeRef, bool)> = None;
        while let Some(inner) = self.inner(at) {
            if inner.bit > diff {
                break;
            }
            let right = bit_at(key, inner.bit);
            parent = Some((at, right));
            at = if right { inner.right } else { inner.left };
        }
        let (left, right) = if goes_right {
            (at, new_ref)
        } else {
            (new_ref, at)
        };
        let inner_ref = self.alloc_inner(Inner { bit: diff, left, right });
        match parent {
            None => self.root = inner_ref,
            Some((parent_ref, went_right)) => {
                let idx = parent_ref.inner_index();
                if let Some(Some(parent_inner)) = self.inners.get_mut(idx) {
                    if went_right {
                        parent_inner.right = inner_ref;
                    } else {
                        parent_inner.left = inner_ref;
                    }
                }
            }
        }
        self.n_entries += 1;
        Ok(new_id)
    }

    fn insert_with_suffixes(&mut self, key: &[u8]) -> Result<Id> {
        // Shortest suffix first so each new entry can link to its
        // one-character-shorter parent.
        let starts = char_starts(self.encoding, key);
        let mut parent = Id::NIL;
        let mut full = Id::NIL;
        for &start in starts.iter().rev() {
            let suffix = &key[start..];
            let existing = self.find_exact(suffix);
            let id = if existing.is_nil() {
                let id = self.insert(suffix)?;
                if !parent.is_nil() {
                    self.sis_link(parent, id);
                }
                id
            } else {
                existing
            };
            parent = id;
            full = id;
        }
        Ok(full)
    }

    fn sis_link(&mut self, parent: Id, child: Id) {
        let first = match self.leaf(parent) {
            Some(p) => p.sis_child,
            None => return,
        };
        if let Some(child_leaf) = self.leaf_mut(child) {
            child_leaf.sis_sibling = first;
        }
        if let Some(parent_leaf) = self.leaf_mut(parent) {
            parent_leaf.sis_child = NodeRef::leaf(child);
        }
    }

    fn sis_unlink(&mut self, key: &[u8], id: Id) {
        let starts = char_starts(self.encoding, key);
        let Some(&second) = starts.get(1) else { return };
        let parent = self.find_exact(&key[second..]);
        let Some(parent_leaf) = self.leaf(parent) else { return };
        let target = NodeRef::leaf(id);
        let mut prev: Option<Id> = None;
        let mut cur = parent_leaf.sis_child;
        while !cur.is_none() {
            let cur_id = cur.leaf_id();
            let next = match self.leaf(cur_id) {
                Some(l) => l.sis_sibling,
                None => NodeRef::NONE,
            };
            if cur == target {
                match prev {
                    None => {
                        if let Some(p) = self.leaf_mut(parent) {
                            p.sis_child = next;
                        }
                    }
                    Some(prev_id) => {
                        if let Some(p) = self.leaf_mut(prev_id) {
                            p.sis_sibling = next;
                        }
                    }
                }
                return;
            }
            prev = Some(cur_id);
            cur = next;
        }
    }

    fn unsplice(&mut self, key: &[u8]) {
        // Walk with one level of grandparent tracking, then route the
        // sibling subtree around the removed inner node.
        let mut grand: Option<(NodeRef, bool)> = None;
        let mut parent: Option<(NodeRef, bool)> = None;
        let mut cur = self.root;
        while let Some(inner) = self.inner(cur) {
            let right = bit_at(key, inner.bit);
            grand = parent;
            parent = Some((cur, right));
            cur = if right { inner.right } else { inner.left };
        }
        match parent {
            None => {
                self.root = NodeRef::NONE;
            }
            Some((parent_ref, went_right)) => {
                let sibling = {
                    let idx = parent_ref.inner_index();
                    let inner = self.inners[idx].as_ref().map_or(NodeRef::NONE, |n| {
                        if went_right { n.left } else { n.right }
                    });
                    self.inners[idx] = None;
                    self.inner_garbage.push(idx as u32);
                    inner
                };
                match grand {
                    None => self.root = sibling,
                    Some((grand_ref, grand_right)) => {
                        let idx = grand_ref.inner_index();
                        if let Some(Some(grand_inner)) = self.inners.get_mut(idx) {
                            if grand_right {
                                grand_inner.right = sibling;
                            } else {
                                grand_inner.left = sibling;
                            }
                        }
                    }
                }
            }
        }
    }

    fn alloc_leaf(&mut self, key: &[u8]) -> Id {
        let key_off = self.keys.len() as u32;
        self.keys.extend_from_slice(key);
        let leaf = Leaf {
            key_off,
            key_len: key.len() as u32,
            sis_child: NodeRef::NONE,
            sis_sibling: NodeRef::NONE,
        };
        match self.leaf_garbage.pop() {
            Some(recycled) => {
                self.leaves[recycled as usize - 1] = Some(leaf);
                Id(recycled)
            }
            None => {
                self.leaves.push(Some(leaf));
                Id(self.leaves.len() as u32)
            }
        }
    }

    fn alloc_inner(&mut self, inner: Inner) -> NodeRef {
        match self.inner_garbage.pop() {
            Some(recycled) => {
                self.inners[recycled as usize] = Some(inner);
                NodeRef::inner(recycled as usize)
            }
            None => {
                self.inners.push(Some(inner));
                NodeRef::inner(self.inners.len() - 1)
            }
        }
    }

    /// Leftmost (smallest) leaf of a subtree.
    fn min_leaf(&self, mut node: NodeRef) -> Id {
        while let Some(inner) = self.inner(node) {
            node = inner.left;
        }
        node.leaf_id()
    }

    fn collect_leaves(&self, top: NodeRef, out: &mut Hash) -> Result<()> {
        let mut pending = vec![top];
        while let Some(node) = pending.pop() {
            if let Some(inner) = self.inner(node) {
                pending.push(inner.right);
                pending.push(inner.left);
            } else {
                let id = node.leaf_id();
                if !id.is_nil() {
                    out.lookup(&id.get().to_le_bytes(), SearchFlags::ADD)?;
                }
            }
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        if self.file.is_none() || self.read_only {
            return Ok(());
        }
        let mut lw = MetaWriter::new();
        for slot in &self.leaves {
            match slot {
                None => {
                    lw.u8(0);
                }
                Some(leaf) => {
                    lw.u8(1)
                        .u32(leaf.key_off)
                        .u32(leaf.key_len)
                        .u32(leaf.sis_child.0)
                        .u32(leaf.sis_sibling.0);
                }
            }
        }
        let leaf_bytes = lw.finish();
        let mut iw = MetaWriter::new();
        for slot in &self.inners {
            match slot {
                None => {
                    iw.u8(0);
                }
                Some(inner) => {
                    iw.u8(1).u32(inner.bit).u32(inner.left.0).u32(inner.right.0);
                }
            }
        }
        let inner_bytes = iw.finish();

        let mut w = MetaWriter::new();
        w.bytes(PAT_MAGIC)
            .u8(self.encoding as u8)
            .u32(self.flags.bits())
            .u32(self.key_max)
            .u32(self.root.0)
            .u32(self.n_entries)
            .u32(self.leaves.len() as u32)
            .u32(self.inners.len() as u32)
            .u64(leaf_bytes.len() as u64)
            .u64(inner_bytes.len() as u64)
            .u64(self.keys.len() as u64);

        let mut stream = leaf_bytes;
        stream.extend_from_slice(&inner_bytes);
        stream.extend_from_slice(&self.keys);

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| QuernError::internal("persist on a memory-only trie"))?;
        file.write_meta(&w.finish())?;
        write_stream(file, 0, &stream)?;
        file.flush()
    }
}

/// Bit of `key` at 9-bit-symbol position `pos`; positions past the end of
/// the key read 0.
pub(crate) fn bit_at(key: &[u8], pos: u32) -> bool {
    let sym = (pos / 9) as usize;
    let off = pos % 9;
    if sym >= key.len() {
        return false;
    }
    if off == 0 {
        return true;
    }
    (key[sym] >> (8 - off)) & 1 == 1
}

/// First differing bit position of two distinct keys; `None` when equal.
fn first_diff_bit(a: &[u8], b: &[u8]) -> Option<u32> {
    let common = a.len().min(b.len());
    for i in 0..common {
        let xor = a[i] ^ b[i];
        if xor != 0 {
            return Some(i as u32 * 9 + 1 + xor.leading_zeros());
        }
    }
    if a.len() == b.len() {
        None
    } else {
        // The shorter key's terminator flag is where they part ways.
        Some(common as u32 * 9)
    }
}

/// Character start offsets of `key` under `encoding` (always includes 0).
fn char_starts(encoding: Encoding, key: &[u8]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut pos = 0;
    while pos < key.len() {
        starts.push(pos);
        let step = encoding.char_len(key, pos).max(1);
        pos += step;
    }
    starts
}

#[cfg(test)]
mod tests;
