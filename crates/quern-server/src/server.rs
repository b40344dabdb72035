//! Accept/queue/worker dispatch core.
//!
//! One acceptor thread runs the poll loop: it accepts connections, reads
//! complete frames into per-connection buffers, and enqueues ready
//! connections into the bounded ring. A lazily grown pool of worker
//! threads pops the ring and runs all per-context work; a connection
//! re-enters the ring only after its previous dispatch finished, so
//! responses on one connection preserve request order.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::{Condvar, Mutex};
use quern_core::{BasicInterpreter, Db, QueryInterpreter};
use quern_error::{QuernError, Result};
use quern_types::{Context, CtxFlags, Encoding, ReplyFlags, ReplyHandler};
use tracing::{debug, error, info, warn};

use crate::cache::{self, CacheIds};
use crate::proto::{Header, MbStatus, HEADER_LEN, MBRES_MAGIC};
use crate::queue::Ring;

/// Upper bound on simultaneously idle workers (and on the pool itself).
pub const MAX_IDLE_WORKERS: u32 = 4;

/// Upper bound on tracked connections.
pub const MAX_CONNECTIONS: usize = 0x10000;

const POLL_TIMEOUT_MS: u16 = 3000;
const ENQUEUE_RETRIES: u32 = 100;
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(1);
const MAX_FRAME_BODY: usize = 0x0100_0000;

const CONN_IDLE: u8 = 0;
const CONN_BUSY: u8 = 1;
const CONN_CLOSING: u8 = 2;

struct Session {
    ctx: Context,
    interp: BasicInterpreter,
}

/// One accepted connection.
pub struct Conn {
    stream: TcpStream,
    peer: SocketAddr,
    status: AtomicU8,
    session: Mutex<Option<Session>>,
}

impl Conn {
    fn status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    fn set_status(&self, status: u8) {
        self.status.store(status, Ordering::Release);
    }
}

struct Job {
    conn: Arc<Conn>,
    header: Header,
    body: Vec<u8>,
}

struct PoolState {
    ring: Ring<Job>,
    nthreads: u32,
    nfthreads: u32,
}

struct Shared {
    db: Mutex<Db>,
    encoding: Encoding,
    quit: AtomicBool,
    pool: Mutex<PoolState>,
    q_cond: Condvar,
    cache: Mutex<Option<CacheIds>>,
    addr: SocketAddr,
    // Worker-side end of the acceptor wake channel.
    wake_tx: UnixStream,
}

impl Shared {
    fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Poke the acceptor's poll awake (a finished dispatch may have left
    /// a buffered frame or a newly pollable connection behind).
    fn wake(&self) {
        let _ = (&self.wake_tx).write(&[1]);
    }
}

/// The dispatch server.
pub struct Server {
    shared: Arc<Shared>,
    listener: TcpListener,
    wake_rx: UnixStream,
}

/// Cloneable control handle: shutdown and pool introspection.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Ask the server to stop; the poll loop and all workers drain.
    pub fn shutdown(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.q_cond.notify_all();
        self.shared.wake();
    }

    /// `(workers, idle_workers)` snapshot.
    #[must_use]
    pub fn pool_stats(&self) -> (u32, u32) {
        let state = self.shared.pool.lock();
        (state.nthreads, state.nfthreads)
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.addr
    }
}

impl Server {
    /// Bind the listening socket over an opened database.
    ///
    /// # Errors
    ///
    /// `Syscall` on bind failure.
    pub fn bind(db: Db, addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| QuernError::syscall("bind listener", e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| QuernError::syscall("listener nonblocking", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| QuernError::syscall("listener local_addr", e))?;
        let encoding = db.encoding();
        let (wake_rx, wake_tx) = UnixStream::pair()
            .map_err(|e| QuernError::syscall("wake channel", e))?;
        wake_rx
            .set_nonblocking(true)
            .map_err(|e| QuernError::syscall("wake nonblocking", e))?;
        wake_tx
            .set_nonblocking(true)
            .map_err(|e| QuernError::syscall("wake nonblocking", e))?;
        info!(%addr, "server listening");
        Ok(Self {
            shared: Arc::new(Shared {
                db: Mutex::new(db),
                encoding,
                quit: AtomicBool::new(false),
                pool: Mutex::new(PoolState {
                    ring: Ring::new(),
                    nthreads: 0,
                    nfthreads: 0,
                }),
                q_cond: Condvar::new(),
                cache: Mutex::new(None),
                addr,
                wake_tx,
            }),
            listener,
            wake_rx,
        })
    }

    /// Control handle for this server.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// `Syscall` when the socket has no address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.addr)
    }

    /// Run the accept/poll loop until shutdown, then drain and close.
    ///
    /// # Errors
    ///
    /// `Syscall` on unrecoverable poll failures.
    pub fn run(self) -> Result<()> {
        let shared = &self.shared;
        let mut conns: HashMap<RawFd, ConnEntry> = HashMap::new();

        while !shared.is_quit() {
            conns.retain(|_, entry| {
                let closing = entry.conn.status() == CONN_CLOSING;
                if closing {
                    debug!(peer = %entry.conn.peer, "connection closed");
                }
                !closing
            });

            // Frames already buffered on idle connections don't need a
            // poll wake-up.
            for entry in conns.values_mut() {
                if entry.conn.status() == CONN_IDLE {
                    if let Some((header, body)) = take_frame(&mut entry.buf) {
                        entry.conn.set_status(CONN_BUSY);
                        handle_message(
                            shared,
                            Job {
                                conn: Arc::clone(&entry.conn),
                                header,
                                body,
                            },
                        );
                    }
                }
            }

            let mut keys: Vec<RawFd> = Vec::with_capacity(conns.len());
            let mut fds: Vec<PollFd> = Vec::with_capacity(conns.len() + 2);
            fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
            fds.push(PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN));
            for (&fd, entry) in &conns {
                // Busy connections still get read (the bytes buffer);
                // they just never re-enter the queue until idle.
                if entry.conn.status() != CONN_CLOSING {
                    keys.push(fd);
                    fds.push(PollFd::new(entry.conn.stream.as_fd(), PollFlags::POLLIN));
                }
            }
            let poll_outcome = poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS));
            match poll_outcome {
                Ok(0) => continue,
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(QuernError::syscall(
                        "poll",
                        std::io::Error::from_raw_os_error(errno as i32),
                    ));
                }
            }
            let listener_ready = fds[0].revents().is_some_and(|r| !r.is_empty());
            let wake_ready = fds[1].revents().is_some_and(|r| !r.is_empty());
            let ready: Vec<RawFd> = keys
                .iter()
                .zip(fds.iter().skip(2))
                .filter_map(|(&fd, pollfd)| {
                    pollfd.revents().is_some_and(|r| !r.is_empty()).then_some(fd)
                })
                .collect();
            drop(fds);

            if wake_ready {
                let mut sink = [0u8; 64];
                while matches!((&self.wake_rx).read(&mut sink), Ok(n) if n > 0) {}
            }

            if listener_ready {
                self.accept_ready(&mut conns);
            }
            for fd in ready {
                let Some(entry) = conns.get_mut(&fd) else { continue };
                let mut chunk = [0u8; 4096];
                match (&entry.conn.stream).read(&mut chunk) {
                    Ok(0) => {
                        info!(peer = %entry.conn.peer, "connection closed by peer");
                        entry.conn.session.lock().take();
                        conns.remove(&fd);
                    }
                    Ok(n) => {
                        entry.buf.extend_from_slice(&chunk[..n]);
                        if frame_oversized(&entry.buf) {
                            warn!(peer = %entry.conn.peer, "oversized frame; dropping connection");
                            entry.conn.session.lock().take();
                            conns.remove(&fd);
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        warn!(peer = %entry.conn.peer, %e, "read failed; dropping connection");
                        entry.conn.session.lock().take();
                        conns.remove(&fd);
                    }
                }
            }
        }

        self.drain_workers();
        // Shutdown sweep: every remaining context is released.
        for (_, entry) in conns.drain() {
            entry.conn.session.lock().take();
        }
        shared.db.lock().flush()?;
        info!("server stopped");
        Ok(())
    }

    fn accept_ready(&self, conns: &mut HashMap<RawFd, ConnEntry>) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if conns.len() >= MAX_CONNECTIONS {
                        warn!(%peer, "connection table full; rejecting");
                        continue;
                    }
                    let fd = stream.as_raw_fd();
                    debug!(%peer, "connection accepted");
                    conns.insert(
                        fd,
                        ConnEntry {
                            conn: Arc::new(Conn {
                                stream,
                                peer,
                                status: AtomicU8::new(CONN_IDLE),
                                session: Mutex::new(None),
                            }),
                            buf: Vec::new(),
                        },
                    );
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(%e, "accept failed");
                    break;
                }
            }
        }
    }

    fn drain_workers(&self) {
        let shared = &self.shared;
        loop {
            {
                let state = shared.pool.lock();
                if state.nthreads == state.nfthreads {
                    break;
                }
            }
            thread::sleep(Duration::from_millis(1));
        }
        shared.q_cond.notify_all();
        loop {
            {
                let state = shared.pool.lock();
                if state.nthreads == 0 {
                    break;
                }
            }
            shared.q_cond.notify_all();
            thread::sleep(Duration::from_millis(1));
        }
    }
}

struct ConnEntry {
    conn: Arc<Conn>,
    buf: Vec<u8>,
}

fn frame_oversized(buf: &[u8]) -> bool {
    if buf.len() < HEADER_LEN {
        return false;
    }
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&buf[..HEADER_LEN]);
    Header::decode(&raw).size as usize > MAX_FRAME_BODY
}

fn take_frame(buf: &mut Vec<u8>) -> Option<(Header, Vec<u8>)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&buf[..HEADER_LEN]);
    let header = Header::decode(&raw);
    let total = HEADER_LEN + header.size as usize;
    if buf.len() < total {
        return None;
    }
    let body = buf[HEADER_LEN..total].to_vec();
    buf.drain(..total);
    Some((header, body))
}

/// Queue the job, growing the pool or waking a worker per the spawn
/// policy; a persistently full queue answers an error frame.
fn handle_message(shared: &Arc<Shared>, job: Job) {
    let mut pending = job;
    for attempt in 0..ENQUEUE_RETRIES {
        let mut state = shared.pool.lock();
        match state.ring.enqueue(pending) {
            Ok(()) => {
                if state.nfthreads == 0 && state.nthreads < MAX_IDLE_WORKERS {
                    drop(state);
                    let shared = Arc::clone(shared);
                    if let Err(e) = thread::Builder::new()
                        .name("quern-worker".to_owned())
                        .spawn(move || worker_loop(&shared))
                    {
                        error!(%e, "worker spawn failed");
                    }
                } else {
                    shared.q_cond.notify_one();
                }
                return;
            }
            Err(job) => {
                if attempt > 0 {
                    warn!(
                        attempt,
                        idle = state.nfthreads,
                        workers = state.nthreads,
                        "queue is full"
                    );
                }
                pending = job;
            }
        }
        drop(state);
        thread::sleep(ENQUEUE_BACKOFF);
    }
    errout(&pending.conn, "*** ERROR: query queue is full");
    pending.conn.set_status(CONN_IDLE);
    shared.wake();
}

fn worker_loop(shared: &Arc<Shared>) {
    let mut state = shared.pool.lock();
    state.nthreads += 1;
    info!(
        idle = state.nfthreads,
        workers = state.nthreads,
        "worker start"
    );
    loop {
        state.nfthreads += 1;
        while state.ring.is_empty() && !shared.is_quit() {
            shared.q_cond.wait(&mut state);
        }
        state.nfthreads -= 1;
        if shared.is_quit() {
            break;
        }
        let Some(job) = state.ring.dequeue() else {
            continue;
        };
        drop(state);
        dispatch(shared, job);
        state = shared.pool.lock();
        if state.nfthreads >= MAX_IDLE_WORKERS {
            break;
        }
    }
    state.nthreads -= 1;
    info!(
        idle = state.nfthreads,
        workers = state.nthreads,
        "worker end"
    );
    drop(state);
}

fn dispatch(shared: &Arc<Shared>, job: Job) {
    if job.header.is_mbreq() {
        dispatch_mbreq(shared, &job);
    } else {
        dispatch_gqtp(shared, &job);
    }
    shared.wake();
}

fn dispatch_mbreq(shared: &Arc<Shared>, job: &Job) {
    let ids = {
        let mut cache = shared.cache.lock();
        match *cache {
            Some(ids) => ids,
            None => {
                let mut db = shared.db.lock();
                match cache::ensure_cache(&mut db) {
                    Ok(ids) => {
                        *cache = Some(ids);
                        ids
                    }
                    Err(err) => {
                        error!(%err, "cache table init failed");
                        write_mbres(job, MbStatus::Enomem, &[], &[], &[]);
                        job.conn.set_status(CONN_IDLE);
                        return;
                    }
                }
            }
        }
    };
    let reply = {
        let mut db = shared.db.lock();
        cache::execute(&mut db, ids, &job.header, &job.body)
    };
    write_mbres(job, reply.status, &reply.extras, &reply.key, &reply.value);
    if reply.close {
        job.conn.session.lock().take();
        job.conn.set_status(CONN_CLOSING);
    } else {
        job.conn.set_status(CONN_IDLE);
    }
}

fn dispatch_gqtp(shared: &Arc<Shared>, job: &Job) {
    let mut session_slot = job.conn.session.lock();
    if session_slot.is_none() {
        let mut ctx = Context::new(CtxFlags::USE_QL, shared.encoding);
        match job.conn.stream.try_clone() {
            Ok(stream) => ctx.set_reply_handler(Box::new(GqtpReply { stream })),
            Err(e) => {
                error!(%e, "context open failed");
                errout(&job.conn, "*** ERROR: ctx open failed");
                job.conn.set_status(CONN_CLOSING);
                return;
            }
        }
        *session_slot = Some(Session {
            ctx,
            interp: BasicInterpreter::new(),
        });
    }
    let Some(session) = session_slot.as_mut() else {
        return;
    };
    let outcome = {
        let mut db = shared.db.lock();
        session.interp.send(&mut session.ctx, &mut db, &job.body)
    };
    if let Err(err) = outcome {
        error!(%err, "query dispatch failed");
        errout(&job.conn, &format!("*** ERROR: {err}"));
    }
    if session.ctx.is_quit() || shared.is_quit() {
        session_slot.take();
        job.conn.set_status(CONN_CLOSING);
    } else {
        job.conn.set_status(CONN_IDLE);
    }
}

/// Reply sink framing context output as GQTP response frames.
struct GqtpReply {
    stream: TcpStream,
}

impl ReplyHandler for GqtpReply {
    fn reply(&mut self, chunk: &[u8], flags: ReplyFlags) -> Result<()> {
        let header = Header::gqtp_response(flags, chunk.len() as u32);
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(chunk);
        (&self.stream)
            .write_all(&frame)
            .map_err(|e| QuernError::syscall("send response", e))
    }
}

/// Best-effort error frame; failures only get logged.
fn errout(conn: &Conn, message: &str) {
    error!(peer = %conn.peer, message, "errout");
    let header = Header::gqtp_response(ReplyFlags::TAIL, message.len() as u32);
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(message.as_bytes());
    if let Err(e) = (&conn.stream).write_all(&frame) {
        error!(peer = %conn.peer, %e, "errout write failed");
    }
}

fn write_mbres(job: &Job, status: MbStatus, extras: &[u8], key: &[u8], value: &[u8]) {
    let header = Header {
        proto: MBRES_MAGIC,
        qtype: job.header.qtype,
        keylen: key.len() as u16,
        extralen: extras.len() as u8,
        flags: 0,
        status: status as u16,
        size: (extras.len() + key.len() + value.len()) as u32,
        opaque: job.header.opaque,
        cas: job.header.cas,
    };
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(extras);
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    if let Err(e) = (&job.conn.stream).write_all(&frame) {
        error!(peer = %job.conn.peer, %e, "response write failed");
    }
}
