//! Unordered key→value store with dense ids.
//!
//! Entries are `(key, value, id)` with ids allocated densely from 1 and
//! reused only after deletion. Buckets are a power-of-two open-addressing
//! table (linear probing over xxh3-64); the table doubles and rehashes all
//! live entries when the load factor passes 0.5. Cursors walk ids in
//! insertion order (or its reverse) and tolerate deletion mid-walk.
//!
//! The store has no internal locking; callers serialize access.

use std::path::Path;

use quern_error::{QuernError, Result};
use quern_io::stream::{MetaReader, MetaWriter, read_stream, write_stream};
use quern_io::SegFile;
use quern_types::{CursorFlags, Encoding, Id, SearchFlags, SetMode};
use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;

/// Largest variable-size key accepted.
pub const MAX_VAR_KEY_SIZE: usize = 4096;

/// File magic stored in the metadata area.
pub const HASH_MAGIC: &[u8; 8] = b"QUERNHSH";

const SEG_SIZE: u32 = 4096;
const MAX_SEGS: u32 = 1 << 16;
const META_LEN: u32 = 64;
const BUCKET_EMPTY: u32 = 0;
const BUCKET_TOMB: u32 = u32::MAX;
const MIN_BUCKETS: usize = 16;

bitflags::bitflags! {
    /// Creation flags for [`Hash`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HashFlags: u32 {
        /// Keys are variable-size (capped at [`MAX_VAR_KEY_SIZE`]).
        const VAR_KEY = 1 << 0;
        /// Compact in-memory layout; never persisted.
        const TINY = 1 << 1;
    }
}

#[derive(Debug, Clone)]
struct Entry {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Unordered keyed store with cursor iteration.
#[derive(Debug)]
pub struct Hash {
    encoding: Encoding,
    flags: HashFlags,
    key_size: u32,
    value_size: u32,
    // Slot i holds the entry with id i+1; None marks a recycled id.
    entries: Vec<Option<Entry>>,
    buckets: Vec<u32>,
    n_entries: u32,
    n_garbage: u32,
    garbage: Vec<u32>,
    // Buckets holding a live id or a tombstone.
    n_used_buckets: usize,
    file: Option<SegFile>,
}

impl Hash {
    /// Create a store.
    ///
    /// `key_size` is the fixed key length in bytes, ignored under
    /// [`HashFlags::VAR_KEY`]. `value_size` of 0 means variable-size
    /// values; otherwise cells are padded/truncated to `value_size`.
    /// With [`HashFlags::TINY`] the store is memory-only and `path` must
    /// be `None`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero fixed key size, a `TINY`+path
    /// combination, or a missing path on a persistent store.
    pub fn create(
        path: Option<&Path>,
        key_size: u32,
        value_size: u32,
        flags: HashFlags,
        encoding: Encoding,
    ) -> Result<Self> {
        if !flags.contains(HashFlags::VAR_KEY) && key_size == 0 {
            return Err(QuernError::invalid_argument("fixed key size must be non-zero"));
        }
        let file = match (flags.contains(HashFlags::TINY), path) {
            (true, Some(_)) => {
                return Err(QuernError::invalid_argument("tiny hash cannot be persistent"));
            }
            (true, None) | (false, None) => None,
            (false, Some(p)) => Some(SegFile::create(p, META_LEN, SEG_SIZE, MAX_SEGS)?),
        };
        let mut this = Self {
            encoding,
            flags,
            key_size,
            value_size,
            entries: Vec::new(),
            buckets: vec![BUCKET_EMPTY; MIN_BUCKETS],
            n_entries: 0,
            n_garbage: 0,
            garbage: Vec::new(),
            n_used_buckets: 0,
            file,
        };
        this.persist_meta()?;
        debug!(?flags, key_size, value_size, "hash created");
        Ok(this)
    }

    /// Open a persistent store.
    ///
    /// # Errors
    ///
    /// `FileCorrupt` when the magic does not read back; `Syscall` on I/O
    /// failure.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = SegFile::open(path)?;
        let meta = file.meta().to_vec();
        let mut r = MetaReader::new(&meta);
        let magic = r.bytes(8);
        if magic != HASH_MAGIC {
            return Err(QuernError::FileCorrupt {
                path: path.to_path_buf(),
                detail: format!(
                    "bad hash magic ({})",
                    String::from_utf8_lossy(&magic).escape_default()
                ),
            });
        }
        let encoding = Encoding::from_tag(r.u8())?;
        let flags = HashFlags::from_bits_truncate(r.u32());
        let key_size = r.u32();
        let value_size = r.u32();
        let slot_count = r.u32();
        let stream_len = r.u64();

        let stream = read_stream(&mut file, 0, stream_len)?;
        let mut entries: Vec<Option<Entry>> = Vec::with_capacity(slot_count as usize);
        let mut sr = MetaReader::new(&stream);
        for _ in 0..slot_count {
            if sr.u8() == 0 {
                entries.push(None);
                continue;
            }
            let key_len = sr.u32() as usize;
            let key = sr.bytes(key_len);
            let value_len = sr.u32() as usize;
            let value = sr.bytes(value_len);
            entries.push(Some(Entry { key, value }));
        }

        let mut this = Self {
            encoding,
            flags,
            key_size,
            value_size,
            entries,
            buckets: Vec::new(),
            n_entries: 0,
            n_garbage: 0,
            garbage: Vec::new(),
            n_used_buckets: 0,
            file: Some(file),
        };
        this.rebuild_index();
        trace!(entries = this.n_entries, "hash opened");
        Ok(this)
    }

    /// Delete the files behind a persistent store.
    ///
    /// # Errors
    ///
    /// `Syscall` when the unlink fails.
    pub fn remove(path: &Path) -> Result<()> {
        SegFile::remove(path)
    }

    /// Flush pending state to disk (no-op for memory-only stores).
    ///
    /// # Errors
    ///
    /// Propagates serialization and write failures.
    pub fn flush(&mut self) -> Result<()> {
        self.persist_all()
    }

    /// Close the store, flushing persistent state.
    ///
    /// # Errors
    ///
    /// Propagates flush failures.
    pub fn close(mut self) -> Result<()> {
        self.persist_all()
    }

    /// The store's encoding.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.n_entries
    }

    /// True when no entries are live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.n_entries == 0
    }

    /// Look a key up, inserting it under [`SearchFlags::ADD`].
    ///
    /// Returns [`Id::NIL`] when the key is absent and `ADD` is not set.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key or one violating the store's key
    /// sizing.
    pub fn lookup(&mut self, key: &[u8], flags: SearchFlags) -> Result<Id> {
        self.check_key(key)?;
        if let Some(id) = self.find(key) {
            return Ok(id);
        }
        if !flags.contains(SearchFlags::ADD) {
            return Ok(Id::NIL);
        }
        self.maybe_grow();
        let id = match self.garbage.pop() {
            Some(recycled) => {
                self.n_garbage -= 1;
                self.entries[recycled as usize - 1] = Some(Entry {
                    key: key.to_vec(),
                    value: self.fresh_value(),
                });
                recycled
            }
            None => {
                self.entries.push(Some(Entry {
                    key: key.to_vec(),
                    value: self.fresh_value(),
                }));
                self.entries.len() as u32
            }
        };
        self.bucket_insert(key, id);
        self.n_entries += 1;
        Ok(Id(id))
    }

    /// Key bytes for a live id.
    #[must_use]
    pub fn get_key(&self, id: Id) -> Option<&[u8]> {
        self.entry(id).map(|e| e.key.as_slice())
    }

    /// Value bytes for a live id.
    #[must_use]
    pub fn get_value(&self, id: Id) -> Option<&[u8]> {
        self.entry(id).map(|e| e.value.as_slice())
    }

    /// Store `bytes` into the value cell of `id`.
    ///
    /// `Incr` on a 4- or 8-byte cell performs a little-endian numeric
    /// increment by the numeric value of `bytes`; on any other sizing it
    /// appends. `Append` concatenates.
    ///
    /// # Errors
    ///
    /// `NotFound` for a dead id.
    pub fn set_value(&mut self, id: Id, bytes: &[u8], mode: SetMode) -> Result<()> {
        let value_size = self.value_size;
        let entry = self
            .entry_mut(id)
            .ok_or_else(|| QuernError::NotFound(format!("hash id {id}")))?;
        match mode {
            SetMode::Set => {
                entry.value.clear();
                entry.value.extend_from_slice(bytes);
            }
            SetMode::Append => entry.value.extend_from_slice(bytes),
            SetMode::Incr => {
                if let Some(incremented) = int_incr(&entry.value, bytes) {
                    entry.value = incremented;
                } else {
                    entry.value.extend_from_slice(bytes);
                }
            }
        }
        if value_size > 0 {
            entry.value.resize(value_size as usize, 0);
        }
        Ok(())
    }

    /// Remove the entry for `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the key is absent.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        let id = self
            .find(key)
            .ok_or_else(|| QuernError::NotFound("hash key".to_owned()))?;
        self.delete_id(id)
    }

    /// Remove the entry with `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` for a dead id.
    pub fn delete_id(&mut self, id: Id) -> Result<()> {
        let key = self
            .entry(id)
            .map(|e| e.key.clone())
            .ok_or_else(|| QuernError::NotFound(format!("hash id {id}")))?;
        self.bucket_remove(&key);
        self.entries[id.get() as usize - 1] = None;
        self.garbage.push(id.get());
        self.n_garbage += 1;
        self.n_entries -= 1;
        Ok(())
    }

    /// Open a cursor over the live ids.
    #[must_use]
    pub fn cursor(&mut self, flags: CursorFlags) -> HashCursor<'_> {
        let descending = flags.is_descending();
        let pos = if descending {
            self.entries.len() as i64
        } else {
            0
        };
        HashCursor {
            hash: self,
            descending,
            pos,
            current: Id::NIL,
        }
    }

    fn entry(&self, id: Id) -> Option<&Entry> {
        if id.is_nil() {
            return None;
        }
        self.entries.get(id.get() as usize - 1)?.as_ref()
    }

    fn entry_mut(&mut self, id: Id) -> Option<&mut Entry> {
        if id.is_nil() {
            return None;
        }
        self.entries.get_mut(id.get() as usize - 1)?.as_mut()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(QuernError::invalid_argument("empty key"));
        }
        if self.flags.contains(HashFlags::VAR_KEY) {
            if key.len() > MAX_VAR_KEY_SIZE {
                return Err(QuernError::invalid_argument(format!(
                    "key length {} exceeds {MAX_VAR_KEY_SIZE}",
                    key.len()
                )));
            }
        } else if key.len() != self.key_size as usize {
            return Err(QuernError::invalid_argument(format!(
                "key length {} does not match fixed size {}",
                key.len(),
                self.key_size
            )));
        }
        Ok(())
    }

    fn fresh_value(&self) -> Vec<u8> {
        vec![0; self.value_size as usize]
    }

    fn find(&self, key: &[u8]) -> Option<Id> {
        let mask = self.buckets.len() - 1;
        let mut slot = xxh3_64(key) as usize & mask;
        loop {
            match self.buckets[slot] {
                BUCKET_EMPTY => return None,
                BUCKET_TOMB => {}
                id => {
                    if self.entries[id as usize - 1]
                        .as_ref()
                        .is_some_and(|e| e.key == key)
                    {
                        return Some(Id(id));
                    }
                }
            }
            slot = (slot + 1) & mask;
        }
    }

    fn bucket_insert(&mut self, key: &[u8], id: u32) {
        let mask = self.buckets.len() - 1;
        let mut slot = xxh3_64(key) as usize & mask;
        while !matches!(self.buckets[slot], BUCKET_EMPTY | BUCKET_TOMB) {
            slot = (slot + 1) & mask;
        }
        if self.buckets[slot] == BUCKET_EMPTY {
            self.n_used_buckets += 1;
        }
        self.buckets[slot] = id;
    }

    fn bucket_remove(&mut self, key: &[u8]) {
        let mask = self.buckets.len() - 1;
        let mut slot = xxh3_64(key) as usize & mask;
        loop {
            match self.buckets[slot] {
                BUCKET_EMPTY => return,
                BUCKET_TOMB => {}
                id => {
                    if self.entries[id as usize - 1]
                        .as_ref()
                        .is_some_and(|e| e.key == key)
                    {
                        self.buckets[slot] = BUCKET_TOMB;
                        return;
                    }
                }
            }
            slot = (slot + 1) & mask;
        }
    }

    fn maybe_grow(&mut self) {
        // Tombstones count toward occupancy until the next rebuild.
        if self.n_used_buckets * 2 >= self.buckets.len() {
            let new_len = (self.buckets.len() * 2).max(MIN_BUCKETS);
            self.rebuild_buckets(new_len);
        }
    }

    fn rebuild_index(&mut self) {
        self.n_entries = self.entries.iter().flatten().count() as u32;
        self.garbage = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.is_none().then_some(i as u32 + 1))
            .collect();
        self.n_garbage = self.garbage.len() as u32;
        let want = (self.n_entries as usize * 2 + 1)
            .next_power_of_two()
            .max(MIN_BUCKETS);
        self.rebuild_buckets(want);
    }

    fn rebuild_buckets(&mut self, new_len: usize) {
        self.buckets = vec![BUCKET_EMPTY; new_len];
        self.n_used_buckets = 0;
        let live: Vec<(Vec<u8>, u32)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (e.key.clone(), i as u32 + 1)))
            .collect();
        for (key, id) in live {
            self.bucket_insert(&key, id);
        }
    }

    fn persist_meta(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let mut w = MetaWriter::new();
        w.bytes(HASH_MAGIC)
            .u8(self.encoding as u8)
            .u32(self.flags.bits())
            .u32(self.key_size)
            .u32(self.value_size)
            .u32(self.entries.len() as u32)
            .u64(0);
        file.write_meta(&w.finish())
    }

    fn persist_all(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let mut sw = MetaWriter::new();
        for slot in &self.entries {
            match slot {
                None => {
                    sw.u8(0);
                }
                Some(e) => {
                    sw.u8(1)
                        .u32(e.key.len() as u32)
                        .bytes(&e.key)
                        .u32(e.value.len() as u32)
                        .bytes(&e.value);
                }
            }
        }
        let stream = sw.finish();
        let mut w = MetaWriter::new();
        w.bytes(HASH_MAGIC)
            .u8(self.encoding as u8)
            .u32(self.flags.bits())
            .u32(self.key_size)
            .u32(self.value_size)
            .u32(self.entries.len() as u32)
            .u64(stream.len() as u64);
        let file = self.file.as_mut().ok_or_else(|| {
            QuernError::internal("persist_all on a memory-only hash")
        })?;
        file.write_meta(&w.finish())?;
        write_stream(file, 0, &stream)?;
        file.flush()
    }
}

/// Cursor over a [`Hash`], yielding live ids in insertion order
/// (ascending) or its reverse.
#[derive(Debug)]
pub struct HashCursor<'a> {
    hash: &'a mut Hash,
    descending: bool,
    // 1-based id of the next candidate slot (ascending) or one past it
    // (descending).
    pos: i64,
    current: Id,
}

impl HashCursor<'_> {
    /// Advance to the next live entry; [`Id::NIL`] at the end.
    pub fn next(&mut self) -> Id {
        loop {
            if self.descending {
                self.pos -= 1;
                if self.pos < 0 {
                    self.current = Id::NIL;
                    return Id::NIL;
                }
            } else {
                self.pos += 1;
                if self.pos as usize > self.hash.entries.len() {
                    self.current = Id::NIL;
                    return Id::NIL;
                }
            }
            let candidate = if self.descending {
                Id(self.pos as u32 + 1)
            } else {
                Id(self.pos as u32)
            };
            if self.hash.entry(candidate).is_some() {
                self.current = candidate;
                return candidate;
            }
        }
    }

    /// Id of the current entry; [`Id::NIL`] before the first `next` or
    /// at the end.
    #[must_use]
    pub const fn id(&self) -> Id {
        self.current
    }

    /// Key of the current entry.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.hash.get_key(self.current)
    }

    /// Value of the current entry.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.hash.get_value(self.current)
    }

    /// Delete the current entry; iteration progress is unaffected.
    ///
    /// # Errors
    ///
    /// `NotFound` when the cursor is not on a live entry.
    pub fn delete(&mut self) -> Result<()> {
        let id = self.current;
        self.current = Id::NIL;
        self.hash.delete_id(id)
    }
}

/// Little-endian increment for integer-sized cells.
fn int_incr(value: &[u8], operand: &[u8]) -> Option<Vec<u8>> {
    match value.len() {
        4 => {
            let mut cell = [0u8; 4];
            cell.copy_from_slice(value);
            let delta = operand_to_u64(operand)? as u32;
            Some(u32::from_le_bytes(cell).wrapping_add(delta).to_le_bytes().to_vec())
        }
        8 => {
            let mut cell = [0u8; 8];
            cell.copy_from_slice(value);
            let delta = operand_to_u64(operand)?;
            Some(u64::from_le_bytes(cell).wrapping_add(delta).to_le_bytes().to_vec())
        }
        _ => None,
    }
}

fn operand_to_u64(operand: &[u8]) -> Option<u64> {
    match operand.len() {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(operand);
            Some(u64::from(u32::from_le_bytes(buf)))
        }
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(operand);
            Some(u64::from_le_bytes(buf))
        }
        _ => std::str::from_utf8(operand).ok()?.trim().parse().ok(),
    }
}
