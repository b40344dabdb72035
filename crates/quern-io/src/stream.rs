//! Byte-stream helpers over segment regions.
//!
//! The stores keep variable-length streams (node records, key bytes,
//! postings) inside a [`SegFile`]; a stream occupies a contiguous run of
//! segments starting at a fixed region base. Stream lengths live in the
//! caller's metadata area.

use quern_error::Result;

use crate::SegFile;

/// Write `bytes` across the segments starting at `first_seg`.
///
/// # Errors
///
/// Propagates segment write failures, including `NoMemory` when the region
/// runs past the file's segment capacity.
pub fn write_stream(file: &mut SegFile, first_seg: u32, bytes: &[u8]) -> Result<()> {
    let seg_size = file.seg_size() as usize;
    for (i, chunk) in bytes.chunks(seg_size).enumerate() {
        file.write_segment(first_seg + i as u32, chunk)?;
    }
    if bytes.is_empty() {
        // Keep the region present so reopening an empty stream succeeds.
        file.write_segment(first_seg, &[])?;
    }
    Ok(())
}

/// Read back `len` bytes from the segments starting at `first_seg`.
///
/// # Errors
///
/// Propagates segment read failures.
pub fn read_stream(file: &mut SegFile, first_seg: u32, len: u64) -> Result<Vec<u8>> {
    let seg_size = file.seg_size() as usize;
    let mut out = Vec::with_capacity(len as usize);
    let mut seg = first_seg;
    while (out.len() as u64) < len {
        let data = file.read_segment(seg)?;
        let want = (len as usize - out.len()).min(seg_size);
        out.extend_from_slice(&data[..want]);
        seg += 1;
    }
    Ok(out)
}

/// Little-endian encoder for structure headers kept in the metadata area.
#[derive(Debug, Default)]
pub struct MetaWriter {
    buf: Vec<u8>,
}

impl MetaWriter {
    /// Fresh writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a `u8`.
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    /// Append a little-endian `u32`.
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append a little-endian `u64`.
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Finished bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian decoder over a metadata area.
#[derive(Debug)]
pub struct MetaReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MetaReader<'a> {
    /// Read from the start of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Next `len` raw bytes (zero-filled past the end).
    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        let end = (self.pos + len).min(self.buf.len());
        let mut out = self.buf[self.pos.min(self.buf.len())..end].to_vec();
        out.resize(len, 0);
        self.pos += len;
        out
    }

    /// Next `u8`.
    pub fn u8(&mut self) -> u8 {
        let v = self.buf.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        v
    }

    /// Next little-endian `u32`.
    pub fn u32(&mut self) -> u32 {
        let bytes = self.bytes(4);
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&bytes);
        u32::from_le_bytes(arr)
    }

    /// Next little-endian `u64`.
    pub fn u64(&mut self) -> u64 {
        let bytes = self.bytes(8);
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes);
        u64::from_le_bytes(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_spans_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = SegFile::create(dir.path().join("s"), 0, 16, 64).unwrap();
        let payload: Vec<u8> = (0..100u8).collect();
        write_stream(&mut file, 4, &payload).unwrap();
        assert_eq!(read_stream(&mut file, 4, 100).unwrap(), payload);
    }

    #[test]
    fn meta_codec_round_trip() {
        let mut w = MetaWriter::new();
        w.bytes(b"QUERNHSH").u8(2).u32(77).u64(1 << 40);
        let bytes = w.finish();
        let mut r = MetaReader::new(&bytes);
        assert_eq!(r.bytes(8), b"QUERNHSH");
        assert_eq!(r.u8(), 2);
        assert_eq!(r.u32(), 77);
        assert_eq!(r.u64(), 1 << 40);
    }
}
