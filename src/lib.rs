//! Event-driven connection dispatcher: a single-threaded readiness loop (accept, signal, idle
//! timeout) paired with a bounded worker pool, in the shape of a small `libevent`-style reactor.
//!
//! The core is deliberately blind to the wire protocol and to the database: callers plug in a
//! [`handler::ProtocolHandler`] and a [`db::DatabaseHandleProvider`]; everything in this crate is
//! about descriptor readiness, connection bookkeeping, and task scheduling.
//!
//! ```no_run
//! use evloop::config::DispatcherConfig;
//! use evloop::dispatcher::Dispatcher;
//!
//! # fn build<H: evloop::handler::ProtocolHandler, D: evloop::db::DatabaseHandleProvider>(db: D) -> Result<(), evloop::error::DispatcherError> {
//! let config = DispatcherConfig::default();
//! let mut dispatcher = Dispatcher::<H, D>::new(config, db)?;
//! dispatcher.run()
//! # }
//! ```

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod pool;
pub mod poller;
pub mod queue;
pub mod signal;
pub mod table;
pub mod timer;

pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use error::DispatcherError;
