//! Database directory: a named space of persistent objects.
//!
//! A [`Db`] is a directory holding a registry (a persistent hash of
//! object names) plus one file per object. Objects are addressed by
//! short names for creation/lookup and by their stable registry id
//! afterwards. Tables are pat- or hash-keyed record sets; columns hang
//! off a table and store one typed cell per record id.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use quern_error::{QuernError, Result};
use quern_hash::{Hash, HashFlags};
use quern_ii::InvIndex;
use quern_pat::{PatFlags, PatTrie};
use quern_types::{Encoding, Id, SearchFlags, SetMode, Values};
use tracing::{debug, info};

/// Longest accepted object name.
pub const MAX_NAME_LEN: usize = 255;

const REGISTRY_FILE: &str = "db.reg";

bitflags::bitflags! {
    /// Table creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TableFlags: u32 {
        /// Keys live in a patricia trie (ordered).
        const PAT_KEY = 1 << 0;
        /// Keys live in a hash (unordered).
        const HASH_KEY = 1 << 1;
        /// Suffix-index the keys (pat only).
        const WITH_SIS = 1 << 2;
    }
}

/// Cell type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnType {
    /// Variable-length byte string.
    ShortText = 1,
    /// Little-endian `u32`.
    UInt32 = 2,
    /// Little-endian `i64`.
    Int64 = 3,
}

impl ColumnType {
    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Self::ShortText),
            2 => Ok(Self::UInt32),
            3 => Ok(Self::Int64),
            other => Err(QuernError::invalid_argument(format!(
                "unknown column type {other}"
            ))),
        }
    }

    /// Fixed cell size; 0 for variable.
    #[must_use]
    pub const fn cell_size(self) -> u32 {
        match self {
            Self::ShortText => 0,
            Self::UInt32 => 4,
            Self::Int64 => 8,
        }
    }
}

/// A keyed record set.
#[derive(Debug)]
pub enum TableKeys {
    /// Ordered pat-trie keys.
    Pat(PatTrie),
    /// Unordered hash keys.
    Hash(Hash),
}

/// A registered object.
#[derive(Debug)]
pub enum DbObject {
    /// A table: record keys.
    Table(TableKeys),
    /// A column: per-record cells of one type.
    Column { ctype: ColumnType, cells: Hash },
    /// An inverted index whose lexicon is a pat-keyed table.
    Index { index: InvIndex, lexicon: u32 },
}

impl DbObject {
    /// Look a record key up in a table object.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the object is not a table.
    pub fn table_lookup(&mut self, key: &[u8], flags: SearchFlags) -> Result<Id> {
        match self {
            Self::Table(TableKeys::Pat(pat)) => pat.lookup(key, flags),
            Self::Table(TableKeys::Hash(hash)) => hash.lookup(key, flags),
            Self::Column { .. } | Self::Index { .. } => {
                Err(QuernError::invalid_argument("object is not a table"))
            }
        }
    }

    /// Read a column cell.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the object is not a column.
    pub fn column_get(&mut self, rid: Id) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Column { cells, .. } => {
                let cell = cells.lookup(&rid.get().to_le_bytes(), SearchFlags::EXACT)?;
                if cell.is_nil() {
                    return Ok(None);
                }
                Ok(cells.get_value(cell).map(<[u8]>::to_vec))
            }
            Self::Table(_) | Self::Index { .. } => {
                Err(QuernError::invalid_argument("object is not a column"))
            }
        }
    }

    /// Write a column cell.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the object is not a column.
    pub fn column_set(&mut self, rid: Id, bytes: &[u8], mode: SetMode) -> Result<()> {
        match self {
            Self::Column { cells, .. } => {
                let cell = cells.lookup(&rid.get().to_le_bytes(), SearchFlags::ADD)?;
                cells.set_value(cell, bytes, mode)
            }
            Self::Table(_) | Self::Index { .. } => {
                Err(QuernError::invalid_argument("object is not a column"))
            }
        }
    }
}

/// A named space of persistent objects.
#[derive(Debug)]
pub struct Db {
    dir: PathBuf,
    encoding: Encoding,
    registry: Hash,
    objects: HashMap<u32, DbObject>,
}

impl Db {
    /// Create a database directory.
    ///
    /// # Errors
    ///
    /// `Syscall` when the directory cannot be created.
    pub fn create(dir: &Path, encoding: Encoding) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| QuernError::syscall(format!("mkdir '{}'", dir.display()), e))?;
        let registry = Hash::create(
            Some(&dir.join(REGISTRY_FILE)),
            0,
            0,
            HashFlags::VAR_KEY,
            encoding,
        )?;
        info!(dir = %dir.display(), "database created");
        Ok(Self {
            dir: dir.to_path_buf(),
            encoding,
            registry,
            objects: HashMap::new(),
        })
    }

    /// Open an existing database directory, loading every object.
    ///
    /// # Errors
    ///
    /// `Syscall`/`FileCorrupt` when the registry or an object file fails
    /// to load.
    pub fn open(dir: &Path) -> Result<Self> {
        let registry = Hash::open(&dir.join(REGISTRY_FILE))?;
        let encoding = registry.encoding();
        let mut this = Self {
            dir: dir.to_path_buf(),
            encoding,
            registry,
            objects: HashMap::new(),
        };
        let metas: Vec<(u32, Vec<u8>)> = {
            let mut out = Vec::new();
            let mut cursor = this.registry.cursor(quern_types::CursorFlags::ASCENDING);
            while !cursor.next().is_nil() {
                let value = cursor.value().unwrap_or_default().to_vec();
                out.push((cursor.id().get(), value));
            }
            out
        };
        // Tables and columns first; indexes need their lexicon open.
        for (id, meta) in &metas {
            if meta.first() != Some(&3) {
                let object = this.load_object(*id, meta)?;
                this.objects.insert(*id, object);
            }
        }
        for (id, meta) in &metas {
            if meta.first() == Some(&3) {
                let object = this.load_object(*id, meta)?;
                this.objects.insert(*id, object);
            }
        }
        info!(dir = %dir.display(), objects = this.objects.len(), "database opened");
        Ok(this)
    }

    /// Open when present, otherwise create.
    ///
    /// # Errors
    ///
    /// As [`Db::open`] / [`Db::create`].
    pub fn open_or_create(dir: &Path, encoding: Encoding) -> Result<Self> {
        if dir.join(REGISTRY_FILE).is_file() {
            Self::open(dir)
        } else {
            Self::create(dir, encoding)
        }
    }

    /// The database's encoding.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The backing directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of registered objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Resolve an object name to its id.
    pub fn lookup(&mut self, name: &[u8]) -> Option<Id> {
        let id = self.registry.lookup(name, SearchFlags::EXACT).ok()?;
        (!id.is_nil()).then_some(id)
    }

    /// Borrow an object by id.
    pub fn get(&mut self, id: Id) -> Option<&mut DbObject> {
        self.objects.get_mut(&id.get())
    }

    /// Create and register a table.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` for a duplicate name; `InvalidArgument` for a bad
    /// name or flag set.
    pub fn create_table(&mut self, name: &[u8], flags: TableFlags) -> Result<Id> {
        self.check_name(name)?;
        if self.lookup(name).is_some() {
            return Err(QuernError::AlreadyExists(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        let id = self.registry.lookup(name, SearchFlags::ADD)?;
        let path = self.object_path(id);
        let keys = if flags.contains(TableFlags::HASH_KEY) {
            TableKeys::Hash(Hash::create(
                Some(&path),
                0,
                0,
                HashFlags::VAR_KEY,
                self.encoding,
            )?)
        } else {
            let pat_flags = if flags.contains(TableFlags::WITH_SIS) {
                PatFlags::WITH_SIS
            } else {
                PatFlags::empty()
            };
            TableKeys::Pat(PatTrie::create(
                Some(&path),
                quern_pat::MAX_KEY_SIZE as u32,
                pat_flags,
                self.encoding,
            )?)
        };
        let meta = [1u8, flags.bits() as u8];
        self.registry.set_value(id, &meta, SetMode::Set)?;
        self.objects.insert(id.get(), DbObject::Table(keys));
        debug!(name = %String::from_utf8_lossy(name), id = id.get(), "table created");
        Ok(id)
    }

    /// Create and register a column as `<table>.<column>`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` for a duplicate name; `InvalidArgument` for a bad
    /// name.
    pub fn create_column(&mut self, name: &[u8], ctype: ColumnType) -> Result<Id> {
        self.check_name(name)?;
        if self.lookup(name).is_some() {
            return Err(QuernError::AlreadyExists(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        let id = self.registry.lookup(name, SearchFlags::ADD)?;
        let path = self.object_path(id);
        let cells = Hash::create(
            Some(&path),
            4,
            ctype.cell_size(),
            HashFlags::empty(),
            self.encoding,
        )?;
        let meta = [2u8, ctype as u8];
        self.registry.set_value(id, &meta, SetMode::Set)?;
        self.objects.insert(id.get(), DbObject::Column { ctype, cells });
        debug!(name = %String::from_utf8_lossy(name), id = id.get(), "column created");
        Ok(id)
    }

    /// Create and register an inverted index over a pat-keyed lexicon
    /// table.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` for a duplicate name; `InvalidArgument` when
    /// `lexicon` is not a pat-keyed table.
    pub fn create_index(&mut self, name: &[u8], lexicon: Id) -> Result<Id> {
        self.check_name(name)?;
        if self.lookup(name).is_some() {
            return Err(QuernError::AlreadyExists(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        let Some(DbObject::Table(TableKeys::Pat(pat))) = self.objects.get(&lexicon.get()) else {
            return Err(QuernError::invalid_argument(
                "index lexicon must be a pat-keyed table",
            ));
        };
        let id = self.registry.lookup(name, SearchFlags::ADD)?;
        let index = InvIndex::create(&self.dir.join(format!("obj{:08}", id.get())), pat)?;
        let mut meta = vec![3u8, 0];
        meta.extend_from_slice(&lexicon.get().to_le_bytes());
        self.registry.set_value(id, &meta, SetMode::Set)?;
        self.objects.insert(
            id.get(),
            DbObject::Index {
                index,
                lexicon: lexicon.get(),
            },
        );
        debug!(name = %String::from_utf8_lossy(name), id = id.get(), "index created");
        Ok(id)
    }

    /// Run an index update: diff `old` against `new` for `(rid, section)`.
    ///
    /// # Errors
    ///
    /// `NotFound` for a dead index id; propagates index failures.
    pub fn index_update(
        &mut self,
        index_id: Id,
        rid: Id,
        section: u32,
        old: Option<&Values>,
        new: Option<&Values>,
    ) -> Result<()> {
        let lexicon = match self.objects.get(&index_id.get()) {
            Some(DbObject::Index { lexicon, .. }) => *lexicon,
            _ => return Err(QuernError::NotFound(format!("index {index_id}"))),
        };
        let Some([index_obj, lexicon_obj]) =
            self.objects.get_many_mut([&index_id.get(), &lexicon])
        else {
            return Err(QuernError::NotFound(format!("index lexicon {lexicon}")));
        };
        let (DbObject::Index { index, .. }, DbObject::Table(TableKeys::Pat(pat))) =
            (index_obj, lexicon_obj)
        else {
            return Err(QuernError::internal("index/lexicon object mismatch"));
        };
        index.update(pat, rid, section, old, new)
    }

    /// Record ids holding `term`, ascending.
    ///
    /// # Errors
    ///
    /// `NotFound` for a dead index id.
    pub fn index_search(&mut self, index_id: Id, term: &[u8]) -> Result<Vec<Id>> {
        let lexicon = match self.objects.get(&index_id.get()) {
            Some(DbObject::Index { lexicon, .. }) => *lexicon,
            _ => return Err(QuernError::NotFound(format!("index {index_id}"))),
        };
        let term_id = match self.objects.get_mut(&lexicon) {
            Some(DbObject::Table(TableKeys::Pat(pat))) => {
                pat.lookup(term, SearchFlags::EXACT)?
            }
            _ => return Err(QuernError::NotFound(format!("index lexicon {lexicon}"))),
        };
        if term_id.is_nil() {
            return Ok(Vec::new());
        }
        let Some(DbObject::Index { index, .. }) = self.objects.get(&index_id.get()) else {
            return Err(QuernError::NotFound(format!("index {index_id}")));
        };
        let mut cursor = index.cursor(term_id, Id::NIL, Id::MAX, 0);
        let mut rids = Vec::new();
        while let Some(posting) = cursor.next() {
            rids.push(posting.rid);
        }
        Ok(rids)
    }

    /// Flush the registry and every object.
    ///
    /// # Errors
    ///
    /// Propagates the first flush failure.
    pub fn flush(&mut self) -> Result<()> {
        for object in self.objects.values_mut() {
            match object {
                DbObject::Table(TableKeys::Pat(pat)) => pat.flush()?,
                DbObject::Table(TableKeys::Hash(hash)) => hash.flush()?,
                DbObject::Column { cells, .. } => cells.flush()?,
                DbObject::Index { index, .. } => index.flush()?,
            }
        }
        self.registry.flush()
    }

    /// Close the database, flushing everything.
    ///
    /// # Errors
    ///
    /// Propagates flush failures.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn check_name(&self, name: &[u8]) -> Result<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(QuernError::invalid_argument(format!(
                "object name length {} outside [1, {MAX_NAME_LEN}]",
                name.len()
            )));
        }
        Ok(())
    }

    fn object_path(&self, id: Id) -> PathBuf {
        self.dir.join(format!("obj{:08}", id.get()))
    }

    fn load_object(&self, id: u32, meta: &[u8]) -> Result<DbObject> {
        let path = self.object_path(Id(id));
        match meta.first().copied() {
            Some(1) => {
                let flags = TableFlags::from_bits_truncate(u32::from(
                    meta.get(1).copied().unwrap_or(0),
                ));
                let keys = if flags.contains(TableFlags::HASH_KEY) {
                    TableKeys::Hash(Hash::open(&path)?)
                } else {
                    TableKeys::Pat(PatTrie::open(&path)?)
                };
                Ok(DbObject::Table(keys))
            }
            Some(2) => {
                let ctype = ColumnType::from_tag(meta.get(1).copied().unwrap_or(0))?;
                Ok(DbObject::Column {
                    ctype,
                    cells: Hash::open(&path)?,
                })
            }
            Some(3) => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(meta.get(2..6).unwrap_or(&[0, 0, 0, 0]));
                let lexicon = u32::from_le_bytes(raw);
                let Some(DbObject::Table(TableKeys::Pat(pat))) = self.objects.get(&lexicon)
                else {
                    return Err(QuernError::FileCorrupt {
                        path,
                        detail: format!("index lexicon {lexicon} is not a pat table"),
                    });
                };
                Ok(DbObject::Index {
                    index: InvIndex::open(&path, pat)?,
                    lexicon,
                })
            }
            other => Err(QuernError::FileCorrupt {
                path,
                detail: format!("unknown object kind {other:?}"),
            }),
        }
    }
}
