//! Dual-protocol dispatch server.
//!
//! One listening socket serves both wire surfaces: framed query lines
//! (GQTP) evaluated by the query interpreter, and the memcached binary
//! subset operating on the shared cache table. An acceptor thread polls
//! sockets and feeds a bounded FIFO; a lazily grown pool of at most
//! [`server::MAX_IDLE_WORKERS`] workers drains it.

pub mod cache;
pub mod client;
pub mod proto;
pub mod queue;
pub mod server;

pub use client::{GqtpClient, MbClient};
pub use proto::{Header, MbStatus, Opcode};
pub use server::{Server, ServerHandle, MAX_CONNECTIONS, MAX_IDLE_WORKERS};
