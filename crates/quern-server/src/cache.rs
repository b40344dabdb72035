//! The memcached-mode cache table.
//!
//! A process-wide pat-keyed table `<cache>` with persistent columns
//! `value: shorttext`, `flags: uint32`, `expire: uint32`, `cas: int64`,
//! created lazily under the server's cache mutex on the first binary
//! request. All opcode handlers run on a worker thread with the shared
//! database locked.

use std::time::{SystemTime, UNIX_EPOCH};

use quern_core::{ColumnType, Db, TableFlags};
use quern_error::Result;
use quern_types::{Id, SearchFlags, SetMode};
use tracing::{debug, warn};

use crate::proto::{Header, MbStatus, Opcode};

/// Registry ids of the cache table and its columns.
#[derive(Debug, Clone, Copy)]
pub struct CacheIds {
    table: Id,
    value: Id,
    flags: Id,
    expire: Id,
    cas: Id,
}

/// Response of one binary opcode.
#[derive(Debug)]
pub struct MbReply {
    /// Response status.
    pub status: MbStatus,
    /// Extras bytes (flags on GET paths).
    pub extras: Vec<u8>,
    /// Key bytes (GETK only).
    pub key: Vec<u8>,
    /// Value bytes.
    pub value: Vec<u8>,
    /// True when the connection should close after the reply.
    pub close: bool,
}

impl MbReply {
    fn status(status: MbStatus) -> Self {
        Self {
            status,
            extras: Vec::new(),
            key: Vec::new(),
            value: Vec::new(),
            close: false,
        }
    }
}

/// Look the cache objects up, creating them on first use.
///
/// # Errors
///
/// Propagates table/column creation failures.
pub fn ensure_cache(db: &mut Db) -> Result<CacheIds> {
    if let Some(table) = db.lookup(b"<cache>") {
        let value = db.lookup(b"<cache>.value");
        let flags = db.lookup(b"<cache>.flags");
        let expire = db.lookup(b"<cache>.expire");
        let cas = db.lookup(b"<cache>.cas");
        if let (Some(value), Some(flags), Some(expire), Some(cas)) = (value, flags, expire, cas)
        {
            return Ok(CacheIds {
                table,
                value,
                flags,
                expire,
                cas,
            });
        }
    }
    let table = db.create_table(b"<cache>", TableFlags::PAT_KEY)?;
    let value = db.create_column(b"<cache>.value", ColumnType::ShortText)?;
    let flags = db.create_column(b"<cache>.flags", ColumnType::UInt32)?;
    let expire = db.create_column(b"<cache>.expire", ColumnType::UInt32)?;
    let cas = db.create_column(b"<cache>.cas", ColumnType::Int64)?;
    debug!("cache table created");
    Ok(CacheIds {
        table,
        value,
        flags,
        expire,
        cas,
    })
}

/// Execute one binary opcode against the cache table.
#[must_use]
pub fn execute(db: &mut Db, ids: CacheIds, header: &Header, body: &[u8]) -> MbReply {
    let Some(opcode) = Opcode::from_byte(header.qtype) else {
        return MbReply::status(MbStatus::UnknownCommand);
    };
    match opcode {
        Opcode::Get | Opcode::GetK => do_get(db, ids, header, body, opcode == Opcode::GetK),
        Opcode::Set | Opcode::Add | Opcode::Replace => do_store(db, ids, header, body, opcode),
        Opcode::Quit => {
            let mut reply = MbReply::status(MbStatus::Success);
            reply.close = true;
            reply
        }
        _ => MbReply::status(MbStatus::UnknownCommand),
    }
}

fn do_get(db: &mut Db, ids: CacheIds, header: &Header, body: &[u8], with_key: bool) -> MbReply {
    let keylen = header.keylen as usize;
    let extralen = header.extralen as usize;
    let Some(key) = body.get(extralen..extralen + keylen) else {
        return MbReply::status(MbStatus::Einval);
    };
    let rid = match db
        .get(ids.table)
        .map(|t| t.table_lookup(key, SearchFlags::EXACT))
    {
        Some(Ok(rid)) => rid,
        _ => Id::NIL,
    };
    if rid.is_nil() {
        return MbReply::status(MbStatus::KeyEnoent);
    }
    // An entry past its expiry answers like a miss, but stays stored.
    let expire = column_u32(db, ids.expire, rid);
    if expire != 0 && u64::from(expire) < now_seconds() {
        return MbReply::status(MbStatus::KeyEnoent);
    }
    let flags = column_bytes(db, ids.flags, rid);
    let value = column_bytes(db, ids.value, rid);
    MbReply {
        status: MbStatus::Success,
        extras: flags,
        key: if with_key { key.to_vec() } else { Vec::new() },
        value,
        close: false,
    }
}

fn do_store(
    db: &mut Db,
    ids: CacheIds,
    header: &Header,
    body: &[u8],
    opcode: Opcode,
) -> MbReply {
    let keylen = header.keylen as usize;
    let extralen = header.extralen as usize;
    let size = header.size as usize;
    if extralen != 8 || body.len() < size || size < extralen + keylen {
        return MbReply::status(MbStatus::Einval);
    }
    let flags = &body[..4];
    let expire = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
    let key = &body[extralen..extralen + keylen];
    let value = &body[extralen + keylen..size];

    let existing = match db
        .get(ids.table)
        .map(|t| t.table_lookup(key, SearchFlags::EXACT))
    {
        Some(Ok(rid)) => rid,
        _ => Id::NIL,
    };
    match opcode {
        Opcode::Add if !existing.is_nil() => {
            return MbReply::status(MbStatus::KeyEexists);
        }
        Opcode::Replace if existing.is_nil() => {
            return MbReply::status(MbStatus::KeyEnoent);
        }
        _ => {}
    }
    let rid = if existing.is_nil() {
        match db
            .get(ids.table)
            .map(|t| t.table_lookup(key, SearchFlags::ADD))
        {
            Some(Ok(rid)) if !rid.is_nil() => rid,
            _ => return MbReply::status(MbStatus::Enomem),
        }
    } else {
        existing
    };

    let stores: [(Id, Vec<u8>); 4] = [
        (ids.value, value.to_vec()),
        (ids.flags, flags.to_vec()),
        (ids.expire, expire.to_le_bytes().to_vec()),
        (ids.cas, header.cas.to_le_bytes().to_vec()),
    ];
    for (column, bytes) in stores {
        let outcome = db
            .get(column)
            .map(|c| c.column_set(rid, &bytes, SetMode::Set));
        if !matches!(outcome, Some(Ok(()))) {
            warn!(column = column.get(), "cache column store failed");
            return MbReply::status(MbStatus::Enomem);
        }
    }
    MbReply::status(MbStatus::Success)
}

fn column_bytes(db: &mut Db, column: Id, rid: Id) -> Vec<u8> {
    db.get(column)
        .and_then(|c| c.column_get(rid).ok().flatten())
        .unwrap_or_default()
}

fn column_u32(db: &mut Db, column: Id, rid: Id) -> u32 {
    let bytes = column_bytes(db, column, rid);
    if bytes.len() < 4 {
        return 0;
    }
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
