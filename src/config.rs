//! The parameter bundle the dispatcher core is constructed with.
//!
//! `spec.md` §6 treats CLI parsing as an external collaborator: the core only accepts this
//! bundle, mirroring the original `WebServer::init(port, user, passWord, databaseName,
//! log_write, opt_linger, trigmode, sql_num, thread_num, close_log, actor_model)` constructor.

use std::time::Duration;

use crate::error::DispatcherError;

/// Readiness-reporting discipline for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Readiness is reported every time the condition holds.
    LevelTriggered,
    /// Readiness is reported once per transition; the loop must drain.
    EdgeTriggered,
}

/// Where I/O happens: inside worker threads (Reactor) or inline on the dispatcher (Proactor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// I/O is performed inline on the dispatcher; workers only run the protocol step.
    Proactor = 0,
    /// I/O is performed inside worker threads.
    Reactor = 1,
}

/// `SO_LINGER` policy applied to accepted sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linger {
    /// `{onoff: 0, linger: 1}` — disable lingering, close returns immediately.
    Off,
    /// `{onoff: 1, linger: 1}` — linger for one second on close.
    On,
}

/// Construction-time parameter bundle for the [`crate::dispatcher::Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Forwarded opaquely to the database handle provider; the core never reads it.
    pub db_user: String,
    /// Forwarded opaquely to the database handle provider; the core never reads it.
    pub db_password: String,
    /// Forwarded opaquely to the database handle provider; the core never reads it.
    pub db_name: String,
    /// Whether the asynchronous log writer is enabled.
    pub log_write: bool,
    /// `SO_LINGER` policy for accepted connections.
    pub opt_linger: Linger,
    /// Trigger mode selector in `0..=3`: `(listen, conn)` pairs LT+LT, LT+ET, ET+LT, ET+ET.
    pub trig_mode: u8,
    /// Size of the database handle pool.
    pub sql_conn_n: usize,
    /// Number of worker threads in the pool.
    pub thread_n: usize,
    /// Disables logging entirely when true.
    pub close_log: bool,
    /// Reactor (`1`) or Proactor (`0`) discipline.
    pub actor_model: Discipline,
    /// Maximum number of simultaneously live connections (`MAX_FD`).
    pub max_fd: usize,
    /// Task queue capacity (`MAX_REQUESTS`).
    pub max_requests: usize,
    /// Base tick period; idle connections are closed after `3 * timeslot`.
    pub timeslot: Duration,
}

impl DispatcherConfig {
    /// Decodes `trig_mode` into the `(listen, conn)` trigger pair, per `spec.md` §4.8.
    pub fn trigger_modes(&self) -> (Trigger, Trigger) {
        match self.trig_mode {
            0 => (Trigger::LevelTriggered, Trigger::LevelTriggered),
            1 => (Trigger::LevelTriggered, Trigger::EdgeTriggered),
            2 => (Trigger::EdgeTriggered, Trigger::LevelTriggered),
            3 => (Trigger::EdgeTriggered, Trigger::EdgeTriggered),
            _ => (Trigger::LevelTriggered, Trigger::LevelTriggered),
        }
    }

    /// Validates the bundle, surfacing `ConfigError` (spec.md §7) before any resource is opened.
    pub fn validate(&self) -> Result<(), DispatcherError> {
        if self.thread_n == 0 {
            return Err(DispatcherError::Config("thread_n must be > 0".into()));
        }
        if self.max_requests == 0 {
            return Err(DispatcherError::Config("max_requests must be > 0".into()));
        }
        if self.max_fd == 0 {
            return Err(DispatcherError::Config("max_fd must be > 0".into()));
        }
        if self.trig_mode > 3 {
            return Err(DispatcherError::Config(format!(
                "trig_mode must be in 0..=3, got {}",
                self.trig_mode
            )));
        }
        if self.sql_conn_n == 0 {
            return Err(DispatcherError::Config("sql_conn_n must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            port: 9190,
            db_user: String::new(),
            db_password: String::new(),
            db_name: String::new(),
            log_write: false,
            opt_linger: Linger::Off,
            trig_mode: 0,
            sql_conn_n: 8,
            thread_n: 8,
            close_log: false,
            actor_model: Discipline::Proactor,
            max_fd: 65536,
            max_requests: 10_000,
            timeslot: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trig_mode_decodes_all_four_combinations() {
        let mut cfg = DispatcherConfig::default();
        cfg.trig_mode = 0;
        assert_eq!(
            cfg.trigger_modes(),
            (Trigger::LevelTriggered, Trigger::LevelTriggered)
        );
        cfg.trig_mode = 1;
        assert_eq!(
            cfg.trigger_modes(),
            (Trigger::LevelTriggered, Trigger::EdgeTriggered)
        );
        cfg.trig_mode = 2;
        assert_eq!(
            cfg.trigger_modes(),
            (Trigger::EdgeTriggered, Trigger::LevelTriggered)
        );
        cfg.trig_mode = 3;
        assert_eq!(
            cfg.trigger_modes(),
            (Trigger::EdgeTriggered, Trigger::EdgeTriggered)
        );
    }

    #[test]
    fn validate_rejects_zero_sized_resources() {
        let mut cfg = DispatcherConfig::default();
        cfg.thread_n = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = DispatcherConfig::default();
        cfg.max_requests = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = DispatcherConfig::default();
        cfg.trig_mode = 4;
        assert!(cfg.validate().is_err());
    }
}
