//! Minimal clients for both wire protocols.
//!
//! [`GqtpClient`] drives the framed line protocol (the CLI's client mode
//! and the test suites use it); [`MbClient`] speaks the memcached binary
//! subset.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use quern_error::{QuernError, Result};
use quern_types::ReplyFlags;

use crate::proto::{Header, Opcode, HEADER_LEN};

/// Client for the framed line protocol.
#[derive(Debug)]
pub struct GqtpClient {
    stream: TcpStream,
}

impl GqtpClient {
    /// Connect to a server.
    ///
    /// # Errors
    ///
    /// `Syscall` on connect failure.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).map_err(|e| QuernError::syscall("connect", e))?;
        Ok(Self { stream })
    }

    /// Send one request line.
    ///
    /// # Errors
    ///
    /// `Syscall` on write failure.
    pub fn send(&mut self, line: &[u8]) -> Result<()> {
        let header = Header::gqtp_request(line.len() as u32);
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(line);
        self.stream
            .write_all(&frame)
            .map_err(|e| QuernError::syscall("send request", e))
    }

    /// Receive one response frame.
    ///
    /// # Errors
    ///
    /// `Syscall` on read failure or a closed peer.
    pub fn recv(&mut self) -> Result<(Vec<u8>, ReplyFlags)> {
        let (header, body) = read_frame(&mut self.stream)?;
        Ok((body, ReplyFlags::from_bits_truncate(header.flags)))
    }

    /// Send a line and collect every chunk through the `TAIL` frame.
    ///
    /// # Errors
    ///
    /// Propagates send/recv failures.
    pub fn request(&mut self, line: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.send(line)?;
        let mut chunks = Vec::new();
        loop {
            let (body, flags) = self.recv()?;
            if !body.is_empty() {
                chunks.push(body);
            }
            if !flags.contains(ReplyFlags::MORE) {
                return Ok(chunks);
            }
        }
    }
}

/// Client for the memcached binary subset.
#[derive(Debug)]
pub struct MbClient {
    stream: TcpStream,
}

impl MbClient {
    /// Connect to a server.
    ///
    /// # Errors
    ///
    /// `Syscall` on connect failure.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).map_err(|e| QuernError::syscall("connect", e))?;
        Ok(Self { stream })
    }

    /// Issue one request and read its response.
    ///
    /// # Errors
    ///
    /// `Syscall` on socket failure.
    pub fn request(
        &mut self,
        opcode: Opcode,
        extras: &[u8],
        key: &[u8],
        value: &[u8],
        cas: u64,
    ) -> Result<(Header, Vec<u8>)> {
        let header = Header {
            proto: crate::proto::MBREQ_MAGIC,
            qtype: opcode as u8,
            keylen: key.len() as u16,
            extralen: extras.len() as u8,
            flags: 0,
            status: 0,
            size: (extras.len() + key.len() + value.len()) as u32,
            opaque: 0x5a5a_a5a5,
            cas,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(extras);
        frame.extend_from_slice(key);
        frame.extend_from_slice(value);
        self.stream
            .write_all(&frame)
            .map_err(|e| QuernError::syscall("send request", e))?;
        read_frame(&mut self.stream)
    }

    /// `SET` with the standard 8-byte extras.
    ///
    /// # Errors
    ///
    /// As [`MbClient::request`].
    pub fn set(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire: u32,
        cas: u64,
    ) -> Result<(Header, Vec<u8>)> {
        let mut extras = flags.to_be_bytes().to_vec();
        extras.extend_from_slice(&expire.to_be_bytes());
        self.request(Opcode::Set, &extras, key, value, cas)
    }

    /// `GET` of one key.
    ///
    /// # Errors
    ///
    /// As [`MbClient::request`].
    pub fn get(&mut self, key: &[u8]) -> Result<(Header, Vec<u8>)> {
        self.request(Opcode::Get, &[], key, &[], 0)
    }
}

fn read_frame(stream: &mut TcpStream) -> Result<(Header, Vec<u8>)> {
    let mut raw = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut raw)
        .map_err(|e| QuernError::syscall("recv header", e))?;
    let header = Header::decode(&raw);
    let mut body = vec![0u8; header.size as usize];
    stream
        .read_exact(&mut body)
        .map_err(|e| QuernError::syscall("recv body", e))?;
    Ok((header, body))
}
