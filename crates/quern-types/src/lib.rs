//! Core type definitions shared across the Quern workspace.
//!
//! Everything here is deliberately dependency-light: ids, encodings, flag
//! sets, the append-only [`Bulk`] buffer, multi-section [`Values`], and the
//! per-task [`Context`] handle that every engine operation takes.

pub mod bulk;
pub mod context;
pub mod encoding;
pub mod flags;
pub mod id;
pub mod values;

pub use bulk::Bulk;
pub use context::{Context, CtxStatus, ReplyFlags, ReplyHandler, WriterReply};
pub use encoding::Encoding;
pub use flags::{CtxFlags, CursorFlags, SearchFlags, SetMode};
pub use id::Id;
pub use values::Values;
