//! The readiness loop tying the poller, timer wheel, connection table, and worker pool together.
//!
//! Grounded on `original_source/webserver.cpp`'s `eventLoop` (the overall accept/signal/io/timer
//! dispatch) and `src/listener.rs`'s reactor loop for the mio-idiomatic shape: a single thread
//! owns the `Poll`, the `Slab`-backed table, and the timer wheel; I/O work and protocol steps
//! happen either inline (`Discipline::Proactor`) or are handed to the worker pool
//! (`Discipline::Reactor`), with completions drained from a channel rather than busy-waited
//! (`spec.md` §9).

use std::io::Write;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use tracing::{info, warn};

use crate::config::{Discipline, DispatcherConfig, Linger, Trigger};
use crate::db::DatabaseHandleProvider;
use crate::error::DispatcherError;
use crate::handler::ProtocolHandler;
use crate::pool::WorkerPool;
use crate::poller::ReadinessPoller;
use crate::queue::{Op, TaskItem, TaskQueue};
use crate::signal::{SignalBridge, SignalKind};
use crate::table::ConnectionTable;
use crate::timer::TimerWheel;

const LISTENER_TOKEN: Token = Token(usize::MAX - 1);
const SIGNAL_TOKEN: Token = Token(usize::MAX - 2);

/// The event-driven connection dispatcher.
pub struct Dispatcher<H: ProtocolHandler, D: DatabaseHandleProvider> {
    config: DispatcherConfig,
    poller: ReadinessPoller,
    listener: TcpListener,
    signals: SignalBridge,
    table: ConnectionTable<H>,
    timer_wheel: TimerWheel,
    queue: TaskQueue<H>,
    pool: WorkerPool,
    db: Arc<D>,
    listen_trigger: Trigger,
    conn_trigger: Trigger,
    running: bool,
}

impl<H: ProtocolHandler, D: DatabaseHandleProvider> Dispatcher<H, D> {
    /// Builds a dispatcher bound to `config.port`, ready to `run()`.
    pub fn new(config: DispatcherConfig, db: D) -> Result<Self, DispatcherError> {
        config.validate()?;

        let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let mut listener = TcpListener::bind(addr)?;

        let poller = ReadinessPoller::new(config.max_requests.max(1024))?;
        let (listen_trigger, conn_trigger) = config.trigger_modes();

        poller.register(
            &mut listener,
            LISTENER_TOKEN,
            Interest::READABLE,
        )?;

        let mut signals = SignalBridge::install()?;
        poller.register(signals.read_end(), SIGNAL_TOKEN, Interest::READABLE)?;

        let queue: TaskQueue<H> = TaskQueue::new(config.max_requests);
        let db = Arc::new(db);
        let pool = WorkerPool::spawn(config.thread_n, config.actor_model, &queue, db.clone());
        let table = ConnectionTable::new(config.max_fd);

        info!(
            port = config.port,
            thread_n = config.thread_n,
            max_fd = config.max_fd,
            discipline = ?config.actor_model,
            "dispatcher listening"
        );

        Ok(Self {
            config,
            poller,
            listener,
            signals,
            table,
            timer_wheel: TimerWheel::new(),
            queue,
            pool,
            db,
            listen_trigger,
            conn_trigger,
            running: true,
        })
    }

    /// Runs the readiness loop until a `SIGTERM` is observed or [`Dispatcher::stop`] is called
    /// from within a handler hook (there is none exposed today; shutdown is signal-driven, as in
    /// the original).
    pub fn run(&mut self) -> Result<(), DispatcherError> {
        let tick_period = self.config.timeslot;
        let mut last_tick = Instant::now();

        while self.running {
            self.poller.wait(Some(tick_period))?;
            let ready: Vec<(Token, bool, bool)> = self
                .poller
                .events()
                .iter()
                .map(|event| (event.token(), event.is_readable(), event.is_writable()))
                .collect();

            for (token, readable, writable) in ready {
                match token {
                    LISTENER_TOKEN => self.handle_accept()?,
                    SIGNAL_TOKEN => self.handle_signals()?,
                    token => self.handle_io(token, readable, writable),
                }
            }

            self.drain_completions();

            if last_tick.elapsed() >= tick_period {
                self.sweep_timers();
                last_tick = Instant::now();
            }
        }

        self.shutdown();
        Ok(())
    }

    fn handle_accept(&mut self) -> Result<(), DispatcherError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    // Matches `webserver.cpp`'s `dealclientdata`: accept first, then check
                    // fullness, and only stop the ET loop once a rejection was actually observed
                    // (the table could still have room for this one accept even if it was full a
                    // moment ago, since connections close and free slots between wakeups).
                    let table_was_full = self.table.is_full();
                    self.admit(stream, peer_addr);
                    if table_was_full {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(DispatcherError::Io(e)),
            }
            if self.listen_trigger == Trigger::LevelTriggered {
                // LT: a single successful accept per wakeup is sufficient, the poller will
                // report readiness again if the backlog is non-empty.
                break;
            }
        }
        Ok(())
    }

    /// Admits one accepted connection. Per-connection failures (a full table, a linger or
    /// registration error) are handled locally — logged and the socket dropped — rather than
    /// propagated out of `run()`, since one bad connection must never bring down the dispatcher
    /// (`spec.md` §7).
    fn admit(&mut self, mut stream: TcpStream, peer_addr: SocketAddr) {
        if self.table.is_full() {
            warn!(%peer_addr, "connection table full, rejecting accept");
            reject(&mut stream);
            return;
        }

        if let Err(e) = apply_linger(&stream, self.config.opt_linger) {
            warn!(%peer_addr, error = %e, "failed to apply linger policy, rejecting accept");
            return;
        }

        let conn_trigger = self.conn_trigger;
        let poller = &self.poller;
        // Registration happens inside `make`, before the slab slot is committed: a failure here
        // leaves the table untouched instead of leaking an admitted-but-unregistered slot
        // (invariant 1).
        let inserted = self.table.try_insert(|token| {
            let mut connection =
                crate::table::Connection::new(token, stream, peer_addr, conn_trigger);
            poller.register(&mut connection.stream, token, Interest::READABLE)?;
            Ok::<_, DispatcherError>(connection)
        });

        match inserted {
            Ok(Some((token, _connection))) => {
                self.timer_wheel_add(token);
                info!(%peer_addr, token = token.0, "accepted connection");
            }
            Ok(None) => {
                // The table filled between the check above and this insert racing with another
                // accept in the same batch; nothing to clean up.
            }
            Err(e) => {
                warn!(%peer_addr, error = %e, "failed to register accepted connection, dropping it");
            }
        }
    }

    fn handle_signals(&mut self) -> Result<(), DispatcherError> {
        for sig in self.signals.drain()? {
            match sig {
                SignalKind::Terminate => {
                    info!("SIGTERM received, shutting down");
                    self.running = false;
                }
                SignalKind::Tick => {
                    self.sweep_timers();
                }
            }
        }
        Ok(())
    }

    fn handle_io(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(connection) = self.table.get_connection(token) else {
            return;
        };

        match self.config.actor_model {
            Discipline::Proactor => self.handle_io_inline(token, &connection, readable, writable),
            Discipline::Reactor => self.handle_io_deferred(token, connection, readable, writable),
        }
    }

    /// Proactor discipline: I/O happens here, inline; the worker pool only runs `process()`.
    ///
    /// `readable` and `writable` are handled independently rather than as an if/else: mio's
    /// epoll backend is internally edge-triggered (`poller.rs`), so an event batch can report
    /// both at once, and skipping one here would mean waiting for a state transition that may
    /// not come again (e.g. a socket that stays writable forever after the one edge that made it
    /// so).
    fn handle_io_inline(
        &mut self,
        token: Token,
        connection: &Arc<std::sync::Mutex<crate::table::Connection<H>>>,
        readable: bool,
        writable: bool,
    ) {
        let mut needs_compute = false;
        let mut should_close = false;

        {
            let mut conn = connection.lock().expect("connection mutex poisoned");
            if readable {
                match conn.handler.read_once(&mut conn.stream) {
                    Ok(true) => needs_compute = true,
                    Ok(false) | Err(_) => should_close = true,
                }
            }
            if writable && !should_close {
                match conn.handler.write(&mut conn.stream) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => should_close = true,
                }
            }
        }

        if should_close {
            self.close_connection(token);
            return;
        }

        if needs_compute {
            let item = TaskItem {
                connection: connection.clone(),
                token,
                op: Op::Read,
            };
            if self.queue.submit(item).is_err() {
                warn!(token = token.0, "task queue full, dropping cycle");
            }
        }
        if let Err(e) = self.sync_write_interest(token, connection) {
            warn!(token = token.0, error = %e, "failed to sync write interest");
        }
        self.timer_wheel_touch(token);
    }

    /// Reactor discipline: hand the I/O itself off to the worker pool.
    ///
    /// Submits at most one task, never two, for a single event batch: a connection's I/O runs on
    /// one worker thread at a time (`spec.md` §5 ordering guarantee #2, invariant 3). When a
    /// batch reports both readable and writable, read takes priority and write is picked up on
    /// the worker's next wakeup once the read-side task completes, matching the original's
    /// `if (readable) dealwithread(); else if (writable) dealwithwrite();` in `eventLoop`.
    fn handle_io_deferred(
        &mut self,
        token: Token,
        connection: Arc<std::sync::Mutex<crate::table::Connection<H>>>,
        readable: bool,
        writable: bool,
    ) {
        let Some(op) = select_op(readable, writable) else {
            self.timer_wheel_touch(token);
            return;
        };

        let item = TaskItem { connection, token, op };
        if self.queue.submit(item).is_err() {
            warn!(token = token.0, "task queue full, re-arming for retry");
        }
        self.timer_wheel_touch(token);
    }

    fn drain_completions(&mut self) {
        let completions: Vec<_> = self.pool.completions().try_iter().collect();
        for completion in completions {
            if completion.should_close {
                self.close_connection(completion.token);
            } else {
                self.timer_wheel_touch(completion.token);
                if let Some(connection) = self.table.get_connection(completion.token) {
                    if let Err(e) = self.sync_write_interest(completion.token, &connection) {
                        warn!(token = completion.token.0, error = %e, "failed to sync write interest");
                    }
                }
            }
        }
    }

    /// Re-registers a connection's poller interest to match whether its handler currently has
    /// bytes buffered to write, matching the teacher's `PlainConnection::event_set`
    /// (`src/connection.rs`): `READABLE | WRITABLE` while a response is pending, `READABLE` alone
    /// once it drains, so a quiescent connection is never polled for writability.
    fn sync_write_interest(
        &mut self,
        token: Token,
        connection: &Arc<std::sync::Mutex<crate::table::Connection<H>>>,
    ) -> Result<(), DispatcherError> {
        let mut conn = connection.lock().expect("connection mutex poisoned");
        let wants_write = conn.handler.wants_write();
        if wants_write != conn.write_interested {
            let interest = if wants_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            self.poller.reregister(&mut conn.stream, token, interest)?;
            conn.write_interested = wants_write;
        }
        Ok(())
    }

    fn sweep_timers(&mut self) {
        let now = Instant::now();
        let expired = self.timer_wheel_tick(now);
        for token in expired {
            info!(token = token.0, "idle connection timed out");
            self.close_connection(token);
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(connection) = self.table.remove(token) {
            let mut guard = connection.lock().expect("connection mutex poisoned");
            let _ = self.poller.unregister(&mut guard.stream);
        }
        self.timer_wheel_del(token);
    }

    fn shutdown(&mut self) {
        info!("dispatcher shutting down, closing all connections");
        let tokens: Vec<_> = self.table.tokens().collect();
        for token in tokens {
            self.close_connection(token);
        }
    }

    fn timer_wheel_add(&mut self, token: Token) {
        let ttl = self.config.timeslot * 3;
        self.timer_wheel.add_timer(token, Instant::now(), ttl);
    }

    fn timer_wheel_touch(&mut self, token: Token) {
        let ttl = self.config.timeslot * 3;
        self.timer_wheel.adjust_timer(token, Instant::now(), ttl);
    }

    fn timer_wheel_del(&mut self, token: Token) {
        self.timer_wheel.del_timer(token);
    }

    fn timer_wheel_tick(&mut self, now: Instant) -> Vec<Token> {
        self.timer_wheel.tick(now)
    }
}

/// Picks the single operation a Reactor-discipline task should perform for one event batch,
/// read before write, so a connection never has two tasks in flight at once (`spec.md` §5
/// ordering guarantee #2). Mirrors the original's `if (readable) ... else if (writable) ...` in
/// `eventLoop`.
fn select_op(readable: bool, writable: bool) -> Option<Op> {
    if readable {
        Some(Op::Read)
    } else if writable {
        Some(Op::Write)
    } else {
        None
    }
}

/// Tells a rejected peer why, matching `webserver.cpp`'s `utils.show_error(connfd, "Internal
/// server busy")` on the full-table path. Best-effort: the socket is dropped right after, so a
/// failed or partial write here is not itself an error worth surfacing.
fn reject(stream: &mut TcpStream) {
    let _ = stream.write_all(b"Internal server busy\n");
}

fn apply_linger(stream: &TcpStream, policy: Linger) -> Result<(), DispatcherError> {
    let fd = stream.as_raw_fd();
    // SAFETY: `fd` is a valid, live socket owned by `stream`; we immediately hand ownership back
    // via `into_raw_fd` below so `stream` remains the sole owner and no descriptor is leaked or
    // double-closed.
    let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
    let result = std_stream.set_linger(match policy {
        Linger::Off => None,
        Linger::On => Some(Duration::from_secs(1)),
    });
    let _ = std_stream.into_raw_fd();
    result.map_err(DispatcherError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    struct NoopHandler;
    impl ProtocolHandler for NoopHandler {
        fn init(_peer_addr: SocketAddr) -> Self {
            NoopHandler
        }
        fn read_once(&mut self, _stream: &mut TcpStream) -> std::io::Result<bool> {
            Ok(true)
        }
        fn write(&mut self, _stream: &mut TcpStream) -> std::io::Result<bool> {
            Ok(true)
        }
        fn process(&mut self) {}
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn test_config(port: u16, max_fd: usize, discipline: Discipline) -> DispatcherConfig {
        DispatcherConfig {
            port,
            db_user: String::new(),
            db_password: String::new(),
            db_name: String::new(),
            log_write: false,
            opt_linger: Linger::Off,
            trig_mode: 0,
            sql_conn_n: 1,
            thread_n: 1,
            close_log: true,
            actor_model: discipline,
            max_fd,
            max_requests: 8,
            timeslot: Duration::from_secs(5),
        }
    }

    /// A connected pair of loopback sockets: the dispatcher-side `TcpStream` (what `admit`/
    /// `reject` operate on) and the peer's std socket to read/write against in assertions.
    fn loopback_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn select_op_prefers_read_over_write_when_both_are_ready() {
        assert_eq!(select_op(true, true), Some(Op::Read));
        assert_eq!(select_op(true, false), Some(Op::Read));
        assert_eq!(select_op(false, true), Some(Op::Write));
        assert_eq!(select_op(false, false), None);
    }

    #[test]
    fn reject_writes_a_busy_message_to_the_peer() {
        let (mut server, mut peer) = loopback_pair();
        reject(&mut server);

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).expect("peer reads the rejection message");
        assert!(String::from_utf8_lossy(&buf[..n]).contains("busy"));
    }

    #[test]
    fn admit_rejects_with_busy_message_once_table_is_full() {
        let port = free_port();
        let config = test_config(port, 1, Discipline::Proactor);
        let db = crate::db::FixedHandlePool::new(1, || ());
        let mut dispatcher =
            Dispatcher::<NoopHandler, _>::new(config, db).expect("dispatcher builds");

        let (filler, _filler_peer) = loopback_pair();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        dispatcher
            .table
            .insert(|token| crate::table::Connection::new(token, filler, addr, Trigger::LevelTriggered));
        assert!(dispatcher.table.is_full());

        let (accepted, mut peer) = loopback_pair();
        dispatcher.admit(accepted, addr);

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).expect("peer reads the rejection message");
        assert!(String::from_utf8_lossy(&buf[..n]).contains("busy"));
        assert_eq!(dispatcher.table.len(), 1, "the filler connection must still be the only slot");
    }

    #[test]
    fn et_accept_loop_stops_once_the_table_fills() {
        let port = free_port();
        let mut config = test_config(port, 1, Discipline::Proactor);
        config.trig_mode = 3; // (listen, conn) = (ET, ET)
        let db = crate::db::FixedHandlePool::new(1, || ());
        let mut dispatcher =
            Dispatcher::<NoopHandler, _>::new(config, db).expect("dispatcher builds");

        let first = std::net::TcpStream::connect(("127.0.0.1", port)).expect("first connects");
        let mut second =
            std::net::TcpStream::connect(("127.0.0.1", port)).expect("second connects at the TCP level");
        second.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        dispatcher.handle_accept().expect("accept loop runs");

        assert_eq!(dispatcher.table.len(), 1, "only the first connection should be admitted");

        let mut buf = [0u8; 64];
        let n = second.read(&mut buf).expect("rejected peer reads the busy message");
        assert!(String::from_utf8_lossy(&buf[..n]).contains("busy"));

        drop(first);
    }

    #[test]
    fn admit_recovers_locally_from_a_registration_failure() {
        let port = free_port();
        let config = test_config(port, 4, Discipline::Proactor);
        let db = crate::db::FixedHandlePool::new(1, || ());
        let mut dispatcher =
            Dispatcher::<NoopHandler, _>::new(config, db).expect("dispatcher builds");

        let (stream, _peer) = loopback_pair();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        // Pre-register the same descriptor under a bogus token so the registration `admit`
        // performs internally collides (`EEXIST`) instead of succeeding.
        let fd = stream.as_raw_fd();
        let mut shadow = TcpStream::from_std(unsafe { std::net::TcpStream::from_raw_fd(fd) });
        dispatcher
            .poller
            .register(&mut shadow, Token(9999), Interest::READABLE)
            .expect("shadow registration succeeds");
        std::mem::forget(shadow); // shares `stream`'s fd; dropping it would close the fd early

        dispatcher.admit(stream, addr);

        assert!(
            dispatcher.table.is_empty(),
            "a failed registration must not leak an admitted table slot"
        );
    }

    #[test]
    fn reactor_discipline_submits_exactly_one_task_when_both_directions_are_ready() {
        let port = free_port();
        let config = test_config(port, 4, Discipline::Reactor);
        let db = crate::db::FixedHandlePool::new(1, || ());
        let mut dispatcher =
            Dispatcher::<NoopHandler, _>::new(config, db).expect("dispatcher builds");

        let (stream, _peer) = loopback_pair();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (token, connection) = dispatcher
            .table
            .insert(|token| crate::table::Connection::new(token, stream, addr, Trigger::LevelTriggered))
            .expect("table has room");

        dispatcher.handle_io_deferred(token, connection, true, true);

        // A live worker thread is draining the queue concurrently, so assert on completions
        // rather than `queue.len()`, which could already read 0 by the time this runs. Two
        // submissions for one batch would show up as two completions for the same token.
        std::thread::sleep(Duration::from_millis(100));
        let completions: Vec<_> = dispatcher.pool.completions().try_iter().collect();
        assert_eq!(
            completions.len(),
            1,
            "one event batch reporting both readable and writable must submit a single task, got {completions:?}"
        );
    }
}
