//! Error taxonomy for the dispatcher core.
//!
//! Construction-time errors are fatal; per-connection I/O errors never reach here; they are
//! recovered locally by the dispatcher closing the connection (see [`crate::dispatcher`]).

use thiserror::Error;

use crate::poller::RegistrationError;

/// Errors the dispatcher core can report.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Invalid parameter bundle supplied at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A bounded resource (connection table, task queue) could not accept more work.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// A syscall-level failure (bind, listen, poll, socketpair, accept, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A poller registration, reregistration, or deregistration failed.
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// Signal installation or self-pipe failure.
    #[error("signal handling error: {0}")]
    Signal(String),

    /// Raised by a protocol handler; the core only observes this as a closed connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Not a failure: normal termination requested via the terminate-class signal.
    #[error("server shutting down")]
    Shutdown,
}
