//! Thin wrapper around the OS readiness primitive.
//!
//! Grounded on the teacher's direct use of `mio::Poll`/`mio::Events` in `server/src/listener.rs`
//! and `src/listener.rs`. `spec.md` §4.1's LT/ET distinction is a dispatcher-level policy (drain
//! in a loop, or don't) rather than a flag mio exposes per-registration; mio's epoll backend
//! always registers edge-triggered at the kernel level, so the LT/ET behavior callers expect
//! is reproduced by how many times the dispatcher calls `accept`/`read_once` per wakeup.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};

/// Errors from registering a descriptor twice or against an unknown token.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The underlying `register`/`reregister`/`deregister` syscall failed.
    #[error("registration failed: {0}")]
    Io(#[from] io::Error),
}

/// Wraps `mio::Poll`, exposing exactly the operations `spec.md` §4.1 names.
#[derive(Debug)]
pub struct ReadinessPoller {
    poll: Poll,
    events: Events,
}

impl ReadinessPoller {
    /// Creates a poller with room for `capacity` events per `wait` call.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
        })
    }

    /// Registers `source` under `token`, interested in `interest`.
    pub fn register<S: Source + ?Sized>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> Result<(), RegistrationError> {
        self.poll.registry().register(source, token, interest)?;
        Ok(())
    }

    /// Re-registers `source`, e.g. to re-arm after a one-shot-style task completion.
    pub fn reregister<S: Source + ?Sized>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> Result<(), RegistrationError> {
        self.poll.registry().reregister(source, token, interest)?;
        Ok(())
    }

    /// Unregisters `source` from the poller.
    pub fn unregister<S: Source + ?Sized>(&self, source: &mut S) -> Result<(), RegistrationError> {
        self.poll.registry().deregister(source)?;
        Ok(())
    }

    /// The underlying registry, for collaborators (e.g. [`crate::signal::SignalBridge`]) that
    /// need to register their own descriptors directly.
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Blocks until at least one event or a signal interruption; returns the event count.
    ///
    /// A signal interruption (`EINTR`) is reported as `Ok(0)`, matching `spec.md`'s
    /// "returns 0 on signal interruption without error".
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(self.events.iter().count()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// The event batch from the most recent `wait`.
    pub fn events(&self) -> &Events {
        &self.events
    }
}
