//! Query interpreter seam.
//!
//! The engine proper treats the query language as a collaborator: the
//! dispatch surfaces hand each request line to a [`QueryInterpreter`]
//! together with the task's [`Context`] and the shared [`Db`]. The
//! built-in [`BasicInterpreter`] understands the control sentinels every
//! surface depends on (batch-mode toggle, quit, status) and answers
//! anything else with a diagnostic, streaming replies through the
//! context's reply handler.

use quern_error::Result;
use quern_snip::{Snip, SnipFlags, SnipMapping};
use quern_types::{Context, CtxFlags, CtxStatus, ReplyFlags};
use tracing::debug;

use crate::db::Db;

/// The request-evaluation capability the dispatch layers program against.
pub trait QueryInterpreter: Send {
    /// Evaluate one request line, streaming replies through `ctx`.
    ///
    /// # Errors
    ///
    /// Evaluation failures abort the request; the caller owns the
    /// connection's fate.
    fn send(&mut self, ctx: &mut Context, db: &mut Db, line: &[u8]) -> Result<()>;
}

/// The sentinel that toggles batch mode on.
pub const BATCHMODE_ON: &[u8] = b"(batchmode #t)";
/// The sentinel that toggles batch mode off.
pub const BATCHMODE_OFF: &[u8] = b"(batchmode #f)";

/// Built-in interpreter loaded under `CtxFlags::USE_QL`.
#[derive(Debug, Default)]
pub struct BasicInterpreter;

impl BasicInterpreter {
    /// Fresh interpreter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl QueryInterpreter for BasicInterpreter {
    fn send(&mut self, ctx: &mut Context, db: &mut Db, line: &[u8]) -> Result<()> {
        let trimmed = trim(line);
        match trimmed {
            b"" => ctx.emit(ReplyFlags::TAIL),
            _ if trimmed == BATCHMODE_ON => {
                ctx.flags |= CtxFlags::BATCH_MODE;
                ctx.outbuf.append(b"#t");
                ctx.emit(ReplyFlags::TAIL)
            }
            _ if trimmed == BATCHMODE_OFF => {
                ctx.flags -= CtxFlags::BATCH_MODE;
                ctx.outbuf.append(b"#f");
                ctx.emit(ReplyFlags::TAIL)
            }
            b"(quit)" | b"quit" | b"bye" => {
                debug!("quit requested");
                ctx.emit(ReplyFlags::TAIL)?;
                ctx.status = CtxStatus::Quit;
                Ok(())
            }
            b"status" | b"(status)" => {
                let line = format!(
                    "((db . \"{}\") (objects . {}))",
                    db.dir().display(),
                    db.object_count()
                );
                ctx.outbuf.append(line.as_bytes());
                ctx.emit(ReplyFlags::TAIL)
            }
            _ if trimmed.starts_with(b"(snip ") && trimmed.ends_with(b")") => {
                snip_command(ctx, &trimmed[6..trimmed.len() - 1])
            }
            other => {
                ctx.outbuf.append(b"*** ERROR: unknown command: ");
                ctx.outbuf.append(other);
                ctx.emit(ReplyFlags::TAIL)
            }
        }
    }
}

/// `(snip KEYWORD TEXT…)`: extract up to three windows around the keyword
/// and stream them as a multi-part reply.
fn snip_command(ctx: &mut Context, args: &[u8]) -> Result<()> {
    let Some(split) = args.iter().position(|&b| b == b' ') else {
        ctx.outbuf.append(b"*** ERROR: snip needs a keyword and text");
        return ctx.emit(ReplyFlags::TAIL);
    };
    let (keyword, text) = (&args[..split], &args[split + 1..]);
    let mut snip = Snip::new(
        ctx.encoding,
        SnipFlags::NORMALIZE,
        100,
        3,
        b"[[",
        b"]]",
        SnipMapping::None,
    )?;
    match snip.add_cond(keyword, b"", b"").and_then(|()| snip.exec(text)) {
        Ok((n_results, _)) => {
            for i in 0..n_results {
                ctx.outbuf.append(&snip.get_result(i)?);
                ctx.emit(ReplyFlags::MORE)?;
            }
            ctx.emit(ReplyFlags::TAIL)
        }
        Err(err) => {
            ctx.outbuf.append(format!("*** ERROR: {err}").as_bytes());
            ctx.emit(ReplyFlags::TAIL)
        }
    }
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &line[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use quern_types::{Encoding, ReplyHandler};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<(Vec<u8>, ReplyFlags)>>>);

    impl ReplyHandler for Capture {
        fn reply(&mut self, chunk: &[u8], flags: ReplyFlags) -> Result<()> {
            self.0.lock().unwrap().push((chunk.to_vec(), flags));
            Ok(())
        }
    }

    fn session() -> (Context, Db, Capture, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::create(&dir.path().join("db"), Encoding::Utf8).unwrap();
        let capture = Capture::default();
        let mut ctx = Context::new(CtxFlags::USE_QL, Encoding::Utf8);
        ctx.set_reply_handler(Box::new(capture.clone()));
        (ctx, db, capture, dir)
    }

    #[test]
    fn batchmode_sentinel_toggles_the_flag() {
        let (mut ctx, mut db, capture, _dir) = session();
        let mut interp = BasicInterpreter::new();
        interp.send(&mut ctx, &mut db, b"(batchmode #t)").unwrap();
        assert!(ctx.flags.contains(CtxFlags::BATCH_MODE));
        let replies = capture.0.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, b"#t");
        assert!(replies[0].1.contains(ReplyFlags::TAIL));
    }

    #[test]
    fn quit_sets_the_context_status() {
        let (mut ctx, mut db, _capture, _dir) = session();
        let mut interp = BasicInterpreter::new();
        interp.send(&mut ctx, &mut db, b"(quit)").unwrap();
        assert!(ctx.is_quit());
    }

    #[test]
    fn snip_command_streams_more_then_tail() {
        let (mut ctx, mut db, capture, _dir) = session();
        let mut interp = BasicInterpreter::new();
        interp
            .send(
                &mut ctx,
                &mut db,
                b"(snip engine an embeddable fulltext search engine)",
            )
            .unwrap();
        let replies = capture.0.lock().unwrap();
        assert_eq!(replies.len(), 2);
        assert!(replies[0].1.contains(ReplyFlags::MORE));
        let first = String::from_utf8(replies[0].0.clone()).unwrap();
        assert!(first.contains("[[engine]]"), "{first}");
        assert!(replies[1].1.contains(ReplyFlags::TAIL));
        assert!(replies[1].0.is_empty());
    }

    #[test]
    fn unknown_commands_answer_a_diagnostic_tail() {
        let (mut ctx, mut db, capture, _dir) = session();
        let mut interp = BasicInterpreter::new();
        interp.send(&mut ctx, &mut db, b"(frobnicate)").unwrap();
        assert!(!ctx.is_quit());
        let replies = capture.0.lock().unwrap();
        assert!(replies[0].0.starts_with(b"*** ERROR: unknown command"));
        assert!(replies[0].1.contains(ReplyFlags::TAIL));
    }
}
