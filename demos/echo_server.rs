//! A minimal echo protocol handler exercising the dispatcher end to end.
//!
//! Grounded on `server/examples/example.rs`'s role in the teacher repo: a thin binary that
//! builds a concrete handler, a concrete config, and runs the core to completion. The CLI
//! surface mirrors `WebServer::init`'s parameter list one to one (`original_source/webserver.cpp`).

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use evloop::config::{Discipline, DispatcherConfig, Linger};
use evloop::db::FixedHandlePool;
use evloop::dispatcher::Dispatcher;
use evloop::handler::ProtocolHandler;
use mio::net::TcpStream;
use tracing::info;

/// Event-driven echo server built on the `evloop` dispatcher.
#[derive(Debug, Parser)]
#[command(name = "echo-server")]
struct Args {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 9190)]
    port: u16,
    /// Database user, forwarded opaquely to the handle pool.
    #[arg(long, default_value = "")]
    db_user: String,
    /// Database password, forwarded opaquely to the handle pool.
    #[arg(long, default_value = "")]
    db_password: String,
    /// Database name, forwarded opaquely to the handle pool.
    #[arg(long, default_value = "")]
    db_name: String,
    /// Enables the asynchronous log writer.
    #[arg(long)]
    log_write: bool,
    /// Enables `SO_LINGER` (one second) on accepted sockets.
    #[arg(long)]
    opt_linger: bool,
    /// Trigger mode selector, `0..=3`.
    #[arg(long, default_value_t = 0)]
    trig_mode: u8,
    /// Size of the database handle pool.
    #[arg(long, default_value_t = 8)]
    sql_conn_n: usize,
    /// Number of worker threads.
    #[arg(long, default_value_t = 8)]
    thread_n: usize,
    /// Disables logging entirely.
    #[arg(long)]
    close_log: bool,
    /// `0` = Proactor (inline I/O), `1` = Reactor (I/O in worker threads).
    #[arg(long, default_value_t = 0)]
    actor_model: u8,
}

struct EchoHandler {
    peer_addr: SocketAddr,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
}

impl ProtocolHandler for EchoHandler {
    fn init(peer_addr: SocketAddr) -> Self {
        EchoHandler {
            peer_addr,
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    fn read_once(&mut self, stream: &mut TcpStream) -> io::Result<bool> {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return Ok(false),
                Ok(n) => self.inbound.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) => return Err(e),
            }
        }
    }

    fn write(&mut self, stream: &mut TcpStream) -> io::Result<bool> {
        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn process(&mut self) {
        if !self.inbound.is_empty() {
            info!(peer = %self.peer_addr, bytes = self.inbound.len(), "echoing");
            self.outbound.extend(self.inbound.drain(..));
        }
    }

    fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if !args.close_log {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        Box::leak(Box::new(guard));
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(writer)
            .init();
    }

    let config = DispatcherConfig {
        port: args.port,
        db_user: args.db_user,
        db_password: args.db_password,
        db_name: args.db_name,
        log_write: args.log_write,
        opt_linger: if args.opt_linger { Linger::On } else { Linger::Off },
        trig_mode: args.trig_mode,
        sql_conn_n: args.sql_conn_n,
        thread_n: args.thread_n,
        close_log: args.close_log,
        actor_model: if args.actor_model == 1 {
            Discipline::Reactor
        } else {
            Discipline::Proactor
        },
        max_fd: 65536,
        max_requests: 10_000,
        timeslot: Duration::from_secs(5),
    };

    let db = FixedHandlePool::new(config.sql_conn_n, || ());
    let mut dispatcher = Dispatcher::<EchoHandler, _>::new(config, db)?;
    dispatcher.run()?;
    Ok(())
}
