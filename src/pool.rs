//! The bounded worker pool that runs tasks pulled off the [`crate::queue::TaskQueue`].
//!
//! Grounded on `src/worker.rs` (crossbeam-backed worker threads) and, for the discipline split,
//! `original_source/webserver.cpp`'s `process` (proactor: workers only call `process()`, the
//! dispatcher already did the I/O) versus `dealwithread`/`dealwithwrite` submitting raw I/O work
//! to the pool (reactor). `spec.md` §9 asks the busy-wait placeholder to be replaced by a
//! completion channel; that's `Completion` below, fed back through an unbounded
//! `crossbeam_channel` so a worker's `send` never blocks behind a slow dispatcher.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::Token;
use tracing::{debug, warn};

use crate::config::Discipline;
use crate::db::DatabaseHandleProvider;
use crate::handler::ProtocolHandler;
use crate::queue::{Op, TaskItem, TaskQueue};

/// Reported back to the dispatcher once a worker finishes a [`TaskItem`].
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// The connection the completed task belongs to.
    pub token: Token,
    /// Whether the connection should be closed (I/O error or clean peer shutdown).
    pub should_close: bool,
}

/// Owns the worker threads and the completion channel they report through.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    completions: Receiver<Completion>,
}

impl WorkerPool {
    /// Spawns `thread_n` workers draining `queue` under `discipline`, each holding a database
    /// handle scoped to the lifetime of one task via `db`.
    pub fn spawn<H, D>(
        thread_n: usize,
        discipline: Discipline,
        queue: &TaskQueue<H>,
        db: Arc<D>,
    ) -> Self
    where
        H: ProtocolHandler,
        D: DatabaseHandleProvider,
    {
        let (completion_tx, completion_rx) = unbounded();
        let mut handles = Vec::with_capacity(thread_n);

        for id in 0..thread_n {
            let rx = queue.receiver();
            let tx = completion_tx.clone();
            let db = db.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("evloop-worker-{id}"))
                    .spawn(move || worker_loop(rx, tx, discipline, db))
                    .expect("failed to spawn worker thread"),
            );
        }

        Self {
            handles,
            completions: completion_rx,
        }
    }

    /// The completion channel workers report through.
    pub fn completions(&self) -> &Receiver<Completion> {
        &self.completions
    }

    /// Joins every worker thread. Callers must first drop the sending half of the task queue
    /// (or otherwise stop submitting) so `recv()` inside each worker observes disconnection.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop<H, D>(
    tasks: Receiver<TaskItem<H>>,
    completions: Sender<Completion>,
    discipline: Discipline,
    db: Arc<D>,
) where
    H: ProtocolHandler,
    D: DatabaseHandleProvider,
{
    while let Ok(item) = tasks.recv() {
        let _handle = crate::db::Scoped::new(&*db);
        let should_close = run_task(&item, discipline);

        debug!(token = item.token.0, should_close, "task completed");
        if completions
            .send(Completion {
                token: item.token,
                should_close,
            })
            .is_err()
        {
            warn!("completion channel closed, dispatcher gone");
            break;
        }
    }
}

/// Runs one [`TaskItem`] to completion, returning whether the connection should be closed.
fn run_task<H: ProtocolHandler>(item: &TaskItem<H>, discipline: Discipline) -> bool {
    let mut conn = item.connection.lock().expect("connection mutex poisoned");

    match discipline {
        Discipline::Reactor => match item.op {
            Op::Read => match conn.handler.read_once(&mut conn.stream) {
                Ok(true) => {
                    conn.handler.process();
                    false
                }
                Ok(false) | Err(_) => true,
            },
            Op::Write => match conn.handler.write(&mut conn.stream) {
                Ok(true) => false,
                Ok(false) | Err(_) => true,
            },
        },
        Discipline::Proactor => {
            // The dispatcher already performed the I/O inline; the worker only advances the
            // protocol state machine.
            conn.handler.process();
            false
        }
    }
}
