//! Per-task execution context.
//!
//! A [`Context`] is the handle every engine operation runs under: it holds
//! the task's encoding, mode flags, lifecycle status, a scratch output
//! buffer, and the reply sink. A context is owned by exactly one task and
//! is never shared between threads; the server multiplexes many contexts
//! over a small worker pool, touching each from at most one thread at a
//! time.

use std::io::Write;

use quern_error::{QuernError, Result};

use crate::bulk::Bulk;
use crate::encoding::Encoding;
use crate::flags::CtxFlags;

bitflags::bitflags! {
    /// Framing flags attached to each reply chunk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReplyFlags: u8 {
        /// More chunks follow for the current request.
        const MORE = 1 << 0;
        /// Final chunk of the current request.
        const TAIL = 1 << 1;
    }
}

/// Lifecycle status of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CtxStatus {
    /// Processing a request.
    #[default]
    Running = 0,
    /// Mid-reply; more chunks pending.
    More = 1,
    /// Reply complete.
    Tail = 2,
    /// The task asked to terminate.
    Quit = 3,
}

/// Capability for delivering reply bytes to whoever issued the request.
///
/// Two implementations ship: [`WriterReply`] (REPL over stdout) and the
/// server's framed socket writer.
pub trait ReplyHandler: Send {
    /// Deliver one reply chunk.
    ///
    /// # Errors
    ///
    /// Any error aborts the surrounding request; the caller decides whether
    /// the connection survives.
    fn reply(&mut self, chunk: &[u8], flags: ReplyFlags) -> Result<()>;
}

/// Reply sink that writes chunks to an [`std::io::Write`], newline
/// terminated, flushing on `TAIL`.
#[derive(Debug)]
pub struct WriterReply<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> WriterReply<W> {
    /// Wrap a writer.
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> ReplyHandler for WriterReply<W> {
    fn reply(&mut self, chunk: &[u8], flags: ReplyFlags) -> Result<()> {
        if !chunk.is_empty() {
            self.out
                .write_all(chunk)
                .and_then(|()| self.out.write_all(b"\n"))
                .map_err(|e| QuernError::syscall("write reply", e))?;
        }
        if flags.contains(ReplyFlags::TAIL) {
            self.out
                .flush()
                .map_err(|e| QuernError::syscall("flush reply", e))?;
        }
        Ok(())
    }
}

/// Per-task handle carrying encoding, flags, status, scratch buffer, and
/// the reply sink.
pub struct Context {
    /// Text encoding for this task.
    pub encoding: Encoding,
    /// Mode flags.
    pub flags: CtxFlags,
    /// Lifecycle status.
    pub status: CtxStatus,
    /// Scratch output buffer reused across requests.
    pub outbuf: Bulk,
    handler: Option<Box<dyn ReplyHandler>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("encoding", &self.encoding)
            .field("flags", &self.flags)
            .field("status", &self.status)
            .field("outbuf_len", &self.outbuf.len())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl Context {
    /// New context with no reply sink installed.
    #[must_use]
    pub fn new(flags: CtxFlags, encoding: Encoding) -> Self {
        Self {
            encoding,
            flags,
            status: CtxStatus::Running,
            outbuf: Bulk::with_capacity(4096),
            handler: None,
        }
    }

    /// Install (or replace) the reply sink.
    pub fn set_reply_handler(&mut self, handler: Box<dyn ReplyHandler>) {
        self.handler = Some(handler);
    }

    /// Flush the scratch buffer through the reply sink with `flags`.
    ///
    /// The buffer is rewound afterwards. Without a sink this is a silent
    /// drop, which is what a detached context wants.
    ///
    /// # Errors
    ///
    /// Propagates sink failures.
    pub fn emit(&mut self, flags: ReplyFlags) -> Result<()> {
        self.status = if flags.contains(ReplyFlags::MORE) {
            CtxStatus::More
        } else {
            CtxStatus::Tail
        };
        let chunk = self.outbuf.take();
        if let Some(handler) = self.handler.as_mut() {
            handler.reply(&chunk, flags)?;
        }
        Ok(())
    }

    /// True once the task asked to terminate.
    #[must_use]
    pub const fn is_quit(&self) -> bool {
        matches!(self.status, CtxStatus::Quit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<(Vec<u8>, ReplyFlags)>>>);

    impl ReplyHandler for Capture {
        fn reply(&mut self, chunk: &[u8], flags: ReplyFlags) -> Result<()> {
            self.0.lock().unwrap().push((chunk.to_vec(), flags));
            Ok(())
        }
    }

    #[test]
    fn emit_rewinds_and_sets_status() {
        let capture = Capture::default();
        let mut ctx = Context::new(CtxFlags::USE_QL, Encoding::Utf8);
        ctx.set_reply_handler(Box::new(capture.clone()));

        ctx.outbuf.append(b"part one");
        ctx.emit(ReplyFlags::MORE).unwrap();
        assert_eq!(ctx.status, CtxStatus::More);
        assert!(ctx.outbuf.is_empty());

        ctx.outbuf.append(b"part two");
        ctx.emit(ReplyFlags::TAIL).unwrap();
        assert_eq!(ctx.status, CtxStatus::Tail);

        let seen = capture.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, b"part one");
        assert_eq!(seen[1].1, ReplyFlags::TAIL);
    }
}
