//! Wire frames.
//!
//! Both surfaces share one 24-byte header; the first byte tells them
//! apart. `0xc7` opens a GQTP frame (query lines and their framed
//! replies); `0x80`/`0x81` open a memcached binary request/response.
//! `keylen`, `status`, and `size` travel big-endian; `cas` is big-endian
//! on the wire in both directions.

use quern_types::ReplyFlags;

/// GQTP protocol byte.
pub const GQTP_PROTO: u8 = 0xc7;
/// memcached binary request magic.
pub const MBREQ_MAGIC: u8 = 0x80;
/// memcached binary response magic.
pub const MBRES_MAGIC: u8 = 0x81;

/// Fixed header length shared by both protocols.
pub const HEADER_LEN: usize = 24;

/// memcached binary opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    GetQ = 0x09,
    Noop = 0x0a,
    Version = 0x0b,
    GetK = 0x0c,
    GetKQ = 0x0d,
    Append = 0x0e,
    Prepend = 0x0f,
}

impl Opcode {
    /// Decode a request opcode byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        (byte <= 0x0f).then(|| match byte {
            0x00 => Self::Get,
            0x01 => Self::Set,
            0x02 => Self::Add,
            0x03 => Self::Replace,
            0x04 => Self::Delete,
            0x05 => Self::Increment,
            0x06 => Self::Decrement,
            0x07 => Self::Quit,
            0x08 => Self::Flush,
            0x09 => Self::GetQ,
            0x0a => Self::Noop,
            0x0b => Self::Version,
            0x0c => Self::GetK,
            0x0d => Self::GetKQ,
            0x0e => Self::Append,
            _ => Self::Prepend,
        })
    }
}

/// memcached binary response statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MbStatus {
    Success = 0x00,
    KeyEnoent = 0x01,
    KeyEexists = 0x02,
    E2big = 0x03,
    Einval = 0x04,
    NotStored = 0x05,
    UnknownCommand = 0x81,
    Enomem = 0x82,
}

/// The shared 24-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol/magic byte.
    pub proto: u8,
    /// Query type (GQTP) or opcode (memcached).
    pub qtype: u8,
    /// Key length (memcached).
    pub keylen: u16,
    /// Extras length (memcached).
    pub extralen: u8,
    /// `MORE`/`TAIL` flags (GQTP); data type (memcached).
    pub flags: u8,
    /// Response status.
    pub status: u16,
    /// Total body length.
    pub size: u32,
    /// Opaque token echoed back to the client.
    pub opaque: u32,
    /// Compare-and-swap token, network byte order on the wire.
    pub cas: u64,
}

impl Header {
    /// Decode a header from its wire form.
    #[must_use]
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            proto: bytes[0],
            qtype: bytes[1],
            keylen: u16::from_be_bytes([bytes[2], bytes[3]]),
            extralen: bytes[4],
            flags: bytes[5],
            status: u16::from_be_bytes([bytes[6], bytes[7]]),
            size: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            opaque: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            cas: u64::from_be_bytes([
                bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22],
                bytes[23],
            ]),
        }
    }

    /// Encode the header into its wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.proto;
        out[1] = self.qtype;
        out[2..4].copy_from_slice(&self.keylen.to_be_bytes());
        out[4] = self.extralen;
        out[5] = self.flags;
        out[6..8].copy_from_slice(&self.status.to_be_bytes());
        out[8..12].copy_from_slice(&self.size.to_be_bytes());
        out[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        out[16..24].copy_from_slice(&self.cas.to_be_bytes());
        out
    }

    /// A GQTP request frame for `size` body bytes.
    #[must_use]
    pub fn gqtp_request(size: u32) -> Self {
        Self {
            proto: GQTP_PROTO,
            qtype: 0,
            keylen: 0,
            extralen: 0,
            flags: 0,
            status: 0,
            size,
            opaque: 0,
            cas: 0,
        }
    }

    /// A GQTP response frame carrying `flags` and `size` body bytes.
    #[must_use]
    pub fn gqtp_response(flags: ReplyFlags, size: u32) -> Self {
        Self {
            proto: GQTP_PROTO,
            qtype: 1,
            keylen: 0,
            extralen: 0,
            flags: flags.bits(),
            status: 0,
            size,
            opaque: 0,
            cas: 0,
        }
    }

    /// True when the frame is a memcached binary request.
    #[must_use]
    pub const fn is_mbreq(&self) -> bool {
        self.proto == MBREQ_MAGIC
    }
}
