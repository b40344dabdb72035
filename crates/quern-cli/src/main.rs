//! `quern` — standalone shell, network client, and server launcher.
//!
//! Modes: `-a` interactive shell over a local database (the default),
//! `-c` client against a running server, `-s` detached server, `-d`
//! foreground server. `dest` is the database path in shell/server modes
//! and the server hostname in client mode.

use std::io::{BufRead, IsTerminal, Write};
use std::process::ExitCode;

use clap::Parser;
use quern_core::{BasicInterpreter, Db, QueryInterpreter, BATCHMODE_ON};
use quern_error::Result;
use quern_server::{GqtpClient, Server};
use quern_types::{Context, CtxFlags, Encoding, WriterReply};
use tracing::info;

const DEFAULT_PORT: u16 = 10041;
const DEFAULT_DEST: &str = "localhost";

#[derive(Debug, Parser)]
#[command(name = "quern", version, about = "embeddable fulltext search engine")]
struct Cli {
    /// Run in standalone mode (default).
    #[arg(short = 'a', group = "mode")]
    alone: bool,

    /// Run in client mode.
    #[arg(short = 'c', group = "mode")]
    client: bool,

    /// Run in server mode (detached).
    #[arg(short = 's', group = "mode")]
    server: bool,

    /// Run in server mode (foreground).
    #[arg(short = 'd', group = "mode")]
    foreground: bool,

    /// Encoding for a new database [none|euc|utf8|sjis|latin1|koi8r].
    #[arg(short = 'e', value_name = "enc")]
    encoding: Option<String>,

    /// Server port number.
    #[arg(short = 'p', value_name = "port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log level (0 quiet .. 8 trace).
    #[arg(short = 'l', value_name = "loglevel")]
    loglevel: Option<u8>,

    /// Database path (standalone/server) or hostname (client).
    dest: Option<String>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version are successful exits; anything else is
            // usage.
            if err.use_stderr() {
                let _ = err.print();
                return ExitCode::from(1);
            }
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    init_logging(cli.loglevel);

    let encoding = match parse_encoding(cli.encoding.as_deref()) {
        Ok(encoding) => encoding,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(1);
        }
    };
    let batch = !std::io::stdin().is_terminal();

    let outcome = if cli.client {
        do_client(&cli, encoding, batch)
    } else if cli.server {
        do_daemon(&cli)
    } else if cli.foreground {
        do_server(&cli, encoding)
    } else {
        do_alone(&cli, encoding, batch)
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(loglevel: Option<u8>) {
    let filter = match loglevel {
        None => "info",
        Some(0 | 1) => "error",
        Some(2 | 3) => "warn",
        Some(4) => "info",
        Some(5 | 6) => "debug",
        Some(_) => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_encoding(arg: Option<&str>) -> Result<Encoding> {
    match arg.and_then(|s| s.chars().next()) {
        None => Ok(Encoding::default()),
        Some(letter) => Encoding::from_letter(letter),
    }
}

fn db_path(cli: &Cli) -> std::path::PathBuf {
    cli.dest.as_ref().map_or_else(
        || std::env::temp_dir().join(format!("quern-{}", std::process::id())),
        std::path::PathBuf::from,
    )
}

fn prompt(batch: bool) {
    if !batch {
        eprint!("> ");
        let _ = std::io::stderr().flush();
    }
}

fn do_alone(cli: &Cli, encoding: Encoding, batch: bool) -> Result<()> {
    let mut db = Db::open_or_create(&db_path(cli), encoding)?;
    let mut ctx = Context::new(
        if batch {
            CtxFlags::USE_QL | CtxFlags::BATCH_MODE
        } else {
            CtxFlags::USE_QL
        },
        encoding,
    );
    ctx.set_reply_handler(Box::new(WriterReply::new(std::io::stdout())));
    let mut interp = BasicInterpreter::new();

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        prompt(batch || ctx.flags.contains(CtxFlags::BATCH_MODE));
        let Some(line) = lines.next() else { break };
        let line = line.map_err(|e| quern_error::QuernError::syscall("read stdin", e))?;
        interp.send(&mut ctx, &mut db, line.as_bytes())?;
        if ctx.is_quit() {
            break;
        }
    }
    db.close()
}

fn do_client(cli: &Cli, _encoding: Encoding, batch: bool) -> Result<()> {
    let host = cli.dest.clone().unwrap_or_else(|| DEFAULT_DEST.to_owned());
    let mut client = GqtpClient::connect((host.as_str(), cli.port))?;
    info!(host, port = cli.port, "connected");

    if batch {
        // Put the server side of the session into batch mode too.
        let _ = client.request(BATCHMODE_ON)?;
    }
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        prompt(batch);
        let Some(line) = lines.next() else { break };
        let line = line.map_err(|e| quern_error::QuernError::syscall("read stdin", e))?;
        let chunks = client.request(line.as_bytes())?;
        let mut stdout = std::io::stdout().lock();
        for chunk in chunks {
            stdout
                .write_all(&chunk)
                .and_then(|()| stdout.write_all(b"\n"))
                .map_err(|e| quern_error::QuernError::syscall("write stdout", e))?;
        }
        stdout
            .flush()
            .map_err(|e| quern_error::QuernError::syscall("flush stdout", e))?;
        let trimmed = line.trim();
        if trimmed == "(quit)" || trimmed == "quit" || trimmed == "bye" {
            break;
        }
    }
    Ok(())
}

fn do_server(cli: &Cli, encoding: Encoding) -> Result<()> {
    let db = Db::open_or_create(&db_path(cli), encoding)?;
    let server = Server::bind(db, ("0.0.0.0", cli.port))?;
    server.run()
}

/// Detach a child running the foreground server and report its pid.
fn do_daemon(cli: &Cli) -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| quern_error::QuernError::syscall("current_exe", e))?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("-d")
        .arg("-p")
        .arg(cli.port.to_string())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if let Some(encoding) = &cli.encoding {
        command.arg("-e").arg(encoding);
    }
    if let Some(loglevel) = cli.loglevel {
        command.arg("-l").arg(loglevel.to_string());
    }
    if let Some(dest) = &cli.dest {
        command.arg(dest);
    }
    let child = command
        .spawn()
        .map_err(|e| quern_error::QuernError::syscall("spawn server", e))?;
    eprintln!("{}", child.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_flags_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["quern", "-a", "-c"]).is_err());
        assert!(Cli::try_parse_from(["quern", "-d", "db"]).is_ok());
    }

    #[test]
    fn encoding_letters_parse() {
        assert_eq!(parse_encoding(Some("utf8")).unwrap(), Encoding::Utf8);
        assert_eq!(parse_encoding(Some("none")).unwrap(), Encoding::None);
        assert_eq!(parse_encoding(Some("euc")).unwrap(), Encoding::EucJp);
        assert_eq!(parse_encoding(None).unwrap(), Encoding::Utf8);
        assert!(parse_encoding(Some("x")).is_err());
    }

    #[test]
    fn default_port_matches_the_protocol_default() {
        let cli = Cli::try_parse_from(["quern"]).unwrap();
        assert_eq!(cli.port, DEFAULT_PORT);
        assert!(cli.dest.is_none());
    }
}
