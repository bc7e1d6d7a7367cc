//! Dense, slab-indexed connection table.
//!
//! Grounded on `src/listener.rs`'s `Slab<Arc<Mutex<Connection>>>` (the teacher already moved off
//! a fixed `http_conn users[MAX_FD]` array to a slab); `spec.md` §4.3 keeps the same "dense table
//! indexed by token, capacity-bounded" shape as the original's fixed array, just reusing freed
//! slots instead of a fixed index space.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mio::net::TcpStream;
use mio::Token;
use slab::Slab;

use crate::config::Trigger;
use crate::handler::ProtocolHandler;

/// Everything the dispatcher and worker pool share about one live connection.
pub struct Connection<H: ProtocolHandler> {
    /// This connection's table token.
    pub token: Token,
    /// The accepted, non-blocking stream.
    pub stream: TcpStream,
    /// The peer's address, captured at accept time.
    pub peer_addr: SocketAddr,
    /// This connection's trigger mode, decoded once at accept time.
    pub trig_mode: Trigger,
    /// The protocol-specific handler state.
    pub handler: H,
    /// Whether the poller is currently registered for `WRITABLE` on this connection, mirroring
    /// the teacher's `PlainConnection::event_set` (`src/connection.rs`): interest tracks
    /// `handler.wants_write()` so a connection with nothing to write is never polled for
    /// writability (level-triggered `POLLOUT` fires continuously while the socket is writable).
    pub write_interested: bool,
}

impl<H: ProtocolHandler> Connection<H> {
    /// Builds a fresh connection record right after `accept()`.
    pub fn new(token: Token, stream: TcpStream, peer_addr: SocketAddr, trig_mode: Trigger) -> Self {
        Self {
            token,
            stream,
            peer_addr,
            trig_mode,
            handler: H::init(peer_addr),
            write_interested: false,
        }
    }
}

/// The non-I/O half of a table entry, readable without locking the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientData {
    /// The connection's table token.
    pub token: Token,
    /// The peer's address.
    pub peer_addr: SocketAddr,
}

struct Slot<H: ProtocolHandler> {
    connection: Arc<Mutex<Connection<H>>>,
    client_data: ClientData,
}

/// Capacity-bounded, slab-indexed table of live connections.
pub struct ConnectionTable<H: ProtocolHandler> {
    slots: Slab<Slot<H>>,
    capacity: usize,
}

impl<H: ProtocolHandler> ConnectionTable<H> {
    /// Creates a table that admits at most `capacity` simultaneous connections (`MAX_FD`).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Whether the table is at capacity; callers must reject new accepts when this is true.
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Inserts a connection built by `make`, which is handed the token the slot will occupy and
    /// may fail (e.g. poller registration) before the slot is committed.
    ///
    /// Returns `Ok(None)` if the table is already full. Returns `Err(e)` if `make` failed — in
    /// that case nothing is inserted, since `make` runs before the slab's vacant entry is
    /// committed (invariant 1: a descriptor never appears in the table without being registered
    /// with the poller).
    pub fn try_insert<F, E>(
        &mut self,
        make: F,
    ) -> Result<Option<(Token, Arc<Mutex<Connection<H>>>)>, E>
    where
        F: FnOnce(Token) -> Result<Connection<H>, E>,
    {
        if self.is_full() {
            return Ok(None);
        }
        let entry = self.slots.vacant_entry();
        let token = Token(entry.key());
        let connection = Arc::new(Mutex::new(make(token)?));
        let peer_addr = connection.lock().expect("connection mutex poisoned").peer_addr;
        entry.insert(Slot {
            connection: connection.clone(),
            client_data: ClientData { token, peer_addr },
        });
        Ok(Some((token, connection)))
    }

    /// Inserts a connection built from `make`, which receives the token the slot will occupy.
    ///
    /// Returns `None` if the table is already full.
    pub fn insert(
        &mut self,
        make: impl FnOnce(Token) -> Connection<H>,
    ) -> Option<(Token, Arc<Mutex<Connection<H>>>)> {
        match self.try_insert::<_, std::convert::Infallible>(|token| Ok(make(token))) {
            Ok(opt) => opt,
            Err(never) => match never {},
        }
    }

    /// Looks up the shared connection handle for `token`.
    pub fn get_connection(&self, token: Token) -> Option<Arc<Mutex<Connection<H>>>> {
        self.slots.get(token.0).map(|s| s.connection.clone())
    }

    /// Looks up the lock-free client data for `token`.
    pub fn client_data(&self, token: Token) -> Option<ClientData> {
        self.slots.get(token.0).map(|s| s.client_data)
    }

    /// Removes and returns the connection at `token`, if present.
    pub fn remove(&mut self, token: Token) -> Option<Arc<Mutex<Connection<H>>>> {
        if self.slots.contains(token.0) {
            Some(self.slots.remove(token.0).connection)
        } else {
            None
        }
    }

    /// Whether `token` currently names a live connection.
    pub fn contains(&self, token: Token) -> bool {
        self.slots.contains(token.0)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table holds no connections.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates every live token, e.g. to close all connections during shutdown.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.slots.iter().map(|(k, _)| Token(k))
    }
}
