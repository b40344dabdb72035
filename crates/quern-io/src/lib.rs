//! Segmented persistent files.
//!
//! A [`SegFile`] is a named file holding a small built-in header, a
//! caller-owned metadata area, and a run of fixed-size segments. The keyed
//! stores (hash, trie, inverted index) keep their node/key/postings streams
//! in segments and their structure headers in the metadata area.
//!
//! Writes are buffered per segment and persisted by [`SegFile::flush`]
//! (also run best-effort on drop). Each persisted segment carries a crc32c
//! trailer checked on load; the built-in header carries an xxh3 checksum.

pub mod stream;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use quern_error::{QuernError, Result};
use tracing::{debug, error, trace};
use xxhash_rust::xxh3::xxh3_64;

/// File magic; the first eight bytes of every segment file.
pub const SEGFILE_MAGIC: &[u8; 8] = b"QUERNIO1";

/// Size of the built-in header preceding the metadata area.
pub const HEADER_LEN: usize = 64;

const CHECKSUM_OFFSET: usize = 56;
const TRAILER_LEN: usize = 4;

struct CachedSeg {
    data: Vec<u8>,
    dirty: bool,
}

/// A named persistent file with a header area and fixed-size segments.
pub struct SegFile {
    path: PathBuf,
    file: File,
    seg_size: u32,
    max_segs: u32,
    seg_count: u32,
    meta: Vec<u8>,
    meta_dirty: bool,
    cache: HashMap<u32, CachedSeg>,
    read_only: bool,
}

impl std::fmt::Debug for SegFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegFile")
            .field("path", &self.path)
            .field("seg_size", &self.seg_size)
            .field("seg_count", &self.seg_count)
            .field("max_segs", &self.max_segs)
            .finish_non_exhaustive()
    }
}

impl SegFile {
    /// Create (or truncate) a segment file.
    ///
    /// `meta_len` bytes of zeroed caller metadata follow the built-in
    /// header; up to `max_segs` segments of `seg_size` bytes each follow
    /// the metadata.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero `seg_size` or `max_segs`; `Syscall` on
    /// OS failure.
    pub fn create(
        path: impl AsRef<Path>,
        meta_len: u32,
        seg_size: u32,
        max_segs: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        if seg_size == 0 || max_segs == 0 {
            return Err(QuernError::invalid_argument(
                "segment size and count must be non-zero",
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| QuernError::syscall(format!("create '{}'", path.display()), e))?;
        let mut this = Self {
            path: path.to_path_buf(),
            file,
            seg_size,
            max_segs,
            seg_count: 0,
            meta: vec![0; meta_len as usize],
            meta_dirty: true,
            cache: HashMap::new(),
            read_only: false,
        };
        this.write_header()?;
        this.write_meta_area()?;
        debug!(path = %this.path.display(), seg_size, max_segs, "segment file created");
        Ok(this)
    }

    /// Open an existing segment file read-write.
    ///
    /// # Errors
    ///
    /// `Syscall` when the file cannot be opened or is short;
    /// `FileCorrupt` on magic or header-checksum mismatch.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_mode(path, false)
    }

    /// Open an existing segment file without write access.
    ///
    /// # Errors
    ///
    /// As [`SegFile::open`].
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_mode(path, true)
    }

    fn open_mode(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|e| QuernError::syscall(format!("open '{}'", path.display()), e))?;

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|e| QuernError::syscall(format!("read header '{}'", path.display()), e))?;
        if &header[..8] != SEGFILE_MAGIC {
            return Err(QuernError::FileCorrupt {
                path: path.to_path_buf(),
                detail: format!(
                    "bad magic ({})",
                    String::from_utf8_lossy(&header[..8]).escape_default()
                ),
            });
        }
        let stored_sum = read_u64(&header, CHECKSUM_OFFSET);
        if stored_sum != xxh3_64(&header[..CHECKSUM_OFFSET]) {
            return Err(QuernError::FileCorrupt {
                path: path.to_path_buf(),
                detail: "header checksum mismatch".to_owned(),
            });
        }
        let seg_size = read_u32(&header, 8);
        let max_segs = read_u32(&header, 12);
        let seg_count = read_u32(&header, 16);
        let meta_len = read_u32(&header, 20);

        let mut meta = vec![0; meta_len as usize];
        file.read_exact(&mut meta)
            .map_err(|e| QuernError::syscall(format!("read meta '{}'", path.display()), e))?;

        trace!(path = %path.display(), seg_count, "segment file opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            seg_size,
            max_segs,
            seg_count,
            meta,
            meta_dirty: false,
            cache: HashMap::new(),
            read_only,
        })
    }

    /// Delete the file at `path`.
    ///
    /// # Errors
    ///
    /// `Syscall` when the unlink fails.
    pub fn remove(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::remove_file(path)
            .map_err(|e| QuernError::syscall(format!("remove '{}'", path.display()), e))
    }

    /// Segment size in bytes.
    #[must_use]
    pub const fn seg_size(&self) -> u32 {
        self.seg_size
    }

    /// Number of segments written so far.
    #[must_use]
    pub const fn seg_count(&self) -> u32 {
        self.seg_count
    }

    /// True when the file was opened without write access.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Caller metadata area.
    #[must_use]
    pub fn meta(&self) -> &[u8] {
        &self.meta
    }

    /// Replace the caller metadata area.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on a read-only handle or when `bytes` exceeds the
    /// area established at creation.
    pub fn write_meta(&mut self, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(QuernError::invalid_argument("file is read-only"));
        }
        if bytes.len() > self.meta.len() {
            return Err(QuernError::invalid_argument(format!(
                "meta overflow ({} > {})",
                bytes.len(),
                self.meta.len()
            )));
        }
        self.meta[..bytes.len()].copy_from_slice(bytes);
        self.meta[bytes.len()..].fill(0);
        self.meta_dirty = true;
        Ok(())
    }

    /// Load segment `seg`, zero-filled when it has never been written.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` past `max_segs`; `FileCorrupt` on a trailer
    /// mismatch; `Syscall` on read failure.
    pub fn read_segment(&mut self, seg: u32) -> Result<Vec<u8>> {
        if seg >= self.max_segs {
            return Err(QuernError::invalid_argument(format!(
                "segment {seg} out of range (max {})",
                self.max_segs
            )));
        }
        if let Some(cached) = self.cache.get(&seg) {
            return Ok(cached.data.clone());
        }
        if seg >= self.seg_count {
            return Ok(vec![0; self.seg_size as usize]);
        }
        let mut raw = vec![0; self.seg_size as usize + TRAILER_LEN];
        self.file
            .seek(SeekFrom::Start(self.seg_offset(seg)))
            .and_then(|_| self.file.read_exact(&mut raw))
            .map_err(|e| {
                QuernError::syscall(format!("read segment {seg} '{}'", self.path.display()), e)
            })?;
        let data = raw[..self.seg_size as usize].to_vec();
        let stored = read_u32(&raw, self.seg_size as usize);
        if stored != crc32c::crc32c(&data) {
            return Err(QuernError::FileCorrupt {
                path: self.path.clone(),
                detail: format!("segment {seg} checksum mismatch"),
            });
        }
        self.cache.insert(
            seg,
            CachedSeg {
                data: data.clone(),
                dirty: false,
            },
        );
        Ok(data)
    }

    /// Buffer `data` as the new contents of segment `seg`.
    ///
    /// Shorter payloads are zero-padded to the segment size. The write
    /// reaches disk at the next [`SegFile::flush`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on read-only handles, oversize payloads, or a
    /// segment number past `max_segs`; `NoMemory` when the file is full.
    pub fn write_segment(&mut self, seg: u32, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(QuernError::invalid_argument("file is read-only"));
        }
        if seg >= self.max_segs {
            return Err(QuernError::NoMemory(format!(
                "segment file '{}' is full ({} segments)",
                self.path.display(),
                self.max_segs
            )));
        }
        if data.len() > self.seg_size as usize {
            return Err(QuernError::invalid_argument(format!(
                "segment payload {} exceeds segment size {}",
                data.len(),
                self.seg_size
            )));
        }
        let mut buf = vec![0; self.seg_size as usize];
        buf[..data.len()].copy_from_slice(data);
        self.cache.insert(seg, CachedSeg { data: buf, dirty: true });
        if seg >= self.seg_count {
            self.seg_count = seg + 1;
        }
        Ok(())
    }

    /// Persist the header, metadata, and every dirty segment.
    ///
    /// # Errors
    ///
    /// `Syscall` on any write failure.
    pub fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.write_header()?;
        if self.meta_dirty {
            self.write_meta_area()?;
            self.meta_dirty = false;
        }
        let base = HEADER_LEN as u64 + self.meta.len() as u64;
        let stride = u64::from(self.seg_size) + TRAILER_LEN as u64;
        for (&seg, cached) in &mut self.cache {
            if !cached.dirty {
                continue;
            }
            let offset = base + u64::from(seg) * stride;
            let sum = crc32c::crc32c(&cached.data);
            self.file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| self.file.write_all(&cached.data))
                .and_then(|_| self.file.write_all(&sum.to_le_bytes()))
                .map_err(|e| {
                    QuernError::syscall(
                        format!("write segment {seg} '{}'", self.path.display()),
                        e,
                    )
                })?;
            cached.dirty = false;
        }
        self.file
            .sync_data()
            .map_err(|e| QuernError::syscall(format!("sync '{}'", self.path.display()), e))?;
        Ok(())
    }

    fn seg_offset(&self, seg: u32) -> u64 {
        HEADER_LEN as u64
            + self.meta.len() as u64
            + u64::from(seg) * (u64::from(self.seg_size) + TRAILER_LEN as u64)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        header[..8].copy_from_slice(SEGFILE_MAGIC);
        header[8..12].copy_from_slice(&self.seg_size.to_le_bytes());
        header[12..16].copy_from_slice(&self.max_segs.to_le_bytes());
        header[16..20].copy_from_slice(&self.seg_count.to_le_bytes());
        header[20..24].copy_from_slice(&(self.meta.len() as u32).to_le_bytes());
        let sum = xxh3_64(&header[..CHECKSUM_OFFSET]);
        header[CHECKSUM_OFFSET..].copy_from_slice(&sum.to_le_bytes());
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&header))
            .map_err(|e| QuernError::syscall(format!("write header '{}'", self.path.display()), e))
    }

    fn write_meta_area(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(HEADER_LEN as u64))
            .and_then(|_| self.file.write_all(&self.meta))
            .map_err(|e| QuernError::syscall(format!("write meta '{}'", self.path.display()), e))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

impl Drop for SegFile {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!(path = %self.path.display(), %err, "segment file flush failed on drop");
        }
    }
}
