//! Live-socket scenarios for both protocol surfaces.

use std::net::TcpStream;
use std::time::Duration;

use quern_core::Db;
use quern_server::{GqtpClient, MbClient, MbStatus, Opcode, Server, ServerHandle, MAX_IDLE_WORKERS};
use quern_types::Encoding;

struct Fixture {
    handle: ServerHandle,
    join: Option<std::thread::JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

impl Fixture {
    fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::create(&dir.path().join("db"), Encoding::Utf8).expect("create db");
        let server = Server::bind(db, ("127.0.0.1", 0)).expect("bind server");
        let handle = server.handle();
        let join = std::thread::spawn(move || {
            server.run().expect("server run");
        });
        Self {
            handle,
            join: Some(join),
            _dir: dir,
        }
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.handle.local_addr()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[test]
fn set_then_get_round_trips_flags_and_value() {
    let fixture = Fixture::start();
    let mut client = MbClient::connect(fixture.addr()).unwrap();

    let (header, body) = client.set(b"k", b"v", 0xfeed_f00d, 0, 7).unwrap();
    assert_eq!(header.status, MbStatus::Success as u16);
    assert!(body.is_empty());
    // cas travels network order and is echoed on success.
    assert_eq!(header.cas, 7);

    let (header, body) = client.get(b"k").unwrap();
    assert_eq!(header.status, MbStatus::Success as u16);
    assert_eq!(header.extralen, 4);
    assert_eq!(&body[..4], &0xfeed_f00du32.to_be_bytes());
    assert_eq!(&body[4..], b"v");
}

#[test]
fn get_of_an_absent_key_answers_key_enoent() {
    let fixture = Fixture::start();
    let mut client = MbClient::connect(fixture.addr()).unwrap();
    let (header, body) = client.get(b"missing").unwrap();
    assert_eq!(header.status, MbStatus::KeyEnoent as u16);
    assert!(body.is_empty());
}

#[test]
fn getk_echoes_the_key_between_flags_and_value() {
    let fixture = Fixture::start();
    let mut client = MbClient::connect(fixture.addr()).unwrap();
    client.set(b"echo", b"payload", 1, 0, 0).unwrap();

    let (header, body) = client.request(Opcode::GetK, &[], b"echo", &[], 0).unwrap();
    assert_eq!(header.status, MbStatus::Success as u16);
    assert_eq!(header.extralen, 4);
    assert_eq!(header.keylen, 4);
    assert_eq!(&body[4..8], b"echo");
    assert_eq!(&body[8..], b"payload");
}

#[test]
fn add_and_replace_check_prior_existence() {
    let fixture = Fixture::start();
    let mut client = MbClient::connect(fixture.addr()).unwrap();
    let extras = {
        let mut e = 0u32.to_be_bytes().to_vec();
        e.extend_from_slice(&0u32.to_be_bytes());
        e
    };

    let (header, _) = client
        .request(Opcode::Add, &extras, b"fresh", b"one", 0)
        .unwrap();
    assert_eq!(header.status, MbStatus::Success as u16);

    let (header, _) = client
        .request(Opcode::Add, &extras, b"fresh", b"two", 0)
        .unwrap();
    assert_eq!(header.status, MbStatus::KeyEexists as u16);

    let (header, _) = client
        .request(Opcode::Replace, &extras, b"phantom", b"x", 0)
        .unwrap();
    assert_eq!(header.status, MbStatus::KeyEnoent as u16);

    let (header, _) = client
        .request(Opcode::Replace, &extras, b"fresh", b"three", 0)
        .unwrap();
    assert_eq!(header.status, MbStatus::Success as u16);
    let (_, body) = client.get(b"fresh").unwrap();
    assert_eq!(&body[4..], b"three");
}

#[test]
fn expired_entries_answer_key_enoent() {
    let fixture = Fixture::start();
    let mut client = MbClient::connect(fixture.addr()).unwrap();
    // An expiry of one second after the epoch is long past.
    client.set(b"stale", b"v", 0, 1, 0).unwrap();
    let (header, _) = client.get(b"stale").unwrap();
    assert_eq!(header.status, MbStatus::KeyEnoent as u16);

    client.set(b"fresh", b"v", 0, u32::MAX, 0).unwrap();
    let (header, _) = client.get(b"fresh").unwrap();
    assert_eq!(header.status, MbStatus::Success as u16);
}

#[test]
fn unimplemented_opcodes_answer_unknown_command() {
    let fixture = Fixture::start();
    let mut client = MbClient::connect(fixture.addr()).unwrap();
    for opcode in [
        Opcode::Delete,
        Opcode::Increment,
        Opcode::Decrement,
        Opcode::Flush,
        Opcode::Noop,
        Opcode::Version,
        Opcode::Append,
        Opcode::Prepend,
    ] {
        let (header, _) = client.request(opcode, &[], b"k", &[], 0).unwrap();
        assert_eq!(
            header.status,
            MbStatus::UnknownCommand as u16,
            "opcode {opcode:?}"
        );
    }
}

#[test]
fn quit_answers_success_then_closes() {
    let fixture = Fixture::start();
    let mut client = MbClient::connect(fixture.addr()).unwrap();
    let (header, _) = client.request(Opcode::Quit, &[], &[], &[], 0).unwrap();
    assert_eq!(header.status, MbStatus::Success as u16);
    // The server tears the connection down; the next request fails.
    std::thread::sleep(Duration::from_millis(100));
    assert!(client.get(b"k").is_err());
}

#[test]
fn gqtp_batchmode_sentinel_answers_true() {
    let fixture = Fixture::start();
    let mut client = GqtpClient::connect(fixture.addr()).unwrap();
    let chunks = client.request(b"(batchmode #t)").unwrap();
    assert_eq!(chunks, [b"#t".to_vec()]);
}

#[test]
fn gqtp_responses_preserve_request_order() {
    let fixture = Fixture::start();
    let mut client = GqtpClient::connect(fixture.addr()).unwrap();
    for i in 0..8 {
        let line = format!("(snip w{i} before w{i} after)");
        let chunks = client.request(line.as_bytes()).unwrap();
        assert_eq!(chunks.len(), 1, "request {i}");
        let rendered = String::from_utf8(chunks[0].clone()).unwrap();
        assert!(rendered.contains(&format!("[[w{i}]]")), "{rendered}");
    }
}

#[test]
fn both_protocols_share_one_port() {
    let fixture = Fixture::start();
    let mut mb = MbClient::connect(fixture.addr()).unwrap();
    let mut gqtp = GqtpClient::connect(fixture.addr()).unwrap();

    mb.set(b"k", b"v", 0, 0, 0).unwrap();
    let chunks = gqtp.request(b"status").unwrap();
    assert_eq!(chunks.len(), 1);
    let (header, _) = mb.get(b"k").unwrap();
    assert_eq!(header.status, MbStatus::Success as u16);
}

#[test]
fn idle_worker_count_stays_bounded() {
    let fixture = Fixture::start();
    let mut clients: Vec<GqtpClient> = (0..8)
        .map(|_| GqtpClient::connect(fixture.addr()).unwrap())
        .collect();
    for round in 0..4 {
        for client in &mut clients {
            let chunks = client.request(b"status").unwrap();
            assert_eq!(chunks.len(), 1, "round {round}");
        }
    }
    let (workers, idle) = fixture.handle.pool_stats();
    assert!(workers <= MAX_IDLE_WORKERS, "workers {workers}");
    assert!(idle <= workers, "idle {idle} workers {workers}");
}

#[test]
fn shutdown_drains_and_joins() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::create(&dir.path().join("db"), Encoding::Utf8).unwrap();
    let server = Server::bind(db, ("127.0.0.1", 0)).unwrap();
    let handle = server.handle();
    let join = std::thread::spawn(move || server.run());

    let mut client = GqtpClient::connect(handle.local_addr()).unwrap();
    client.request(b"status").unwrap();

    handle.shutdown();
    join.join().expect("acceptor joins").expect("clean stop");
    assert_eq!(handle.pool_stats().0, 0);
    // The listener is gone once run() returns.
    std::thread::sleep(Duration::from_millis(50));
    assert!(TcpStream::connect(handle.local_addr()).is_err());
}
