//! The protocol handler collaborator.
//!
//! `spec.md` §6 keeps HTTP parsing, routing, and response rendering out of the core entirely:
//! the dispatcher only ever calls through this trait. It never inspects connection bytes itself.

use std::io;
use std::net::SocketAddr;

use mio::net::TcpStream;

/// Per-connection protocol driver, owned by the dispatcher's [`crate::table::Connection`].
///
/// Implementations own their own read/write buffers and parser state; the core is blind to both.
/// `read_once`/`write` are expected to behave like the original `http_conn::read_once`/`write`:
/// non-blocking, looping until `WouldBlock`, and reporting whether the connection should stay
/// open.
pub trait ProtocolHandler: Send + 'static {
    /// Builds per-connection handler state right after `accept()`.
    fn init(peer_addr: SocketAddr) -> Self
    where
        Self: Sized;

    /// Performs one non-blocking read from `stream` into handler-owned buffers.
    ///
    /// Returns `Ok(true)` if the read made progress and the connection should stay open,
    /// `Ok(false)` on clean peer shutdown, `Err` on I/O failure. Both `Ok(false)` and `Err`
    /// are treated identically by the dispatcher: the connection is closed.
    fn read_once(&mut self, stream: &mut TcpStream) -> io::Result<bool>;

    /// Flushes any pending response bytes to `stream`.
    fn write(&mut self, stream: &mut TcpStream) -> io::Result<bool>;

    /// Performs one unit of parsing/response-building against already-buffered bytes.
    fn process(&mut self);

    /// Whether the handler currently holds bytes it wants to write.
    fn wants_write(&self) -> bool {
        false
    }
}
