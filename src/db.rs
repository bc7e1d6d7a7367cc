//! Database handle provider collaborator.
//!
//! `spec.md` §6 keeps the database connection pool external: workers `acquire()` a handle for
//! the duration of one task and `release()` it on every exit path. [`Scoped`] is the Rust
//! expression of "released in a scoped manner"; [`FixedHandlePool`] is a minimal, real provider
//! usable in tests and the demo binary without pulling in an actual SQL driver.

use crossbeam_channel::{bounded, Receiver, Sender};

/// External collaborator that hands out and reclaims database handles.
pub trait DatabaseHandleProvider: Send + Sync + 'static {
    /// The handle type returned by `acquire`.
    type Handle;

    /// Acquires a handle, blocking if the pool is momentarily exhausted.
    fn acquire(&self) -> Self::Handle;

    /// Returns a handle to the pool.
    fn release(&self, handle: Self::Handle);
}

/// RAII guard ensuring a handle is released on every exit path, including early `return`.
pub struct Scoped<'a, P: DatabaseHandleProvider> {
    provider: &'a P,
    handle: Option<P::Handle>,
}

impl<'a, P: DatabaseHandleProvider> Scoped<'a, P> {
    /// Acquires a handle from `provider`, to be released when the guard drops.
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            handle: Some(provider.acquire()),
        }
    }

    /// Borrows the acquired handle.
    pub fn get(&self) -> &P::Handle {
        self.handle.as_ref().expect("handle taken before drop")
    }
}

impl<P: DatabaseHandleProvider> Drop for Scoped<'_, P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.provider.release(handle);
        }
    }
}

/// A fixed-size pool of pre-built handles, recycled through a bounded channel.
///
/// This is the `sql_conn_n`-sized pool `spec.md` §6 describes as an external collaborator; it
/// is deliberately generic so tests and the demo binary can plug in a trivial handle type
/// without a real database driver dependency.
pub struct FixedHandlePool<T> {
    free: (Sender<T>, Receiver<T>),
}

impl<T: Send + 'static> FixedHandlePool<T> {
    /// Builds a pool of `size` handles, each produced by `factory`.
    pub fn new<F: Fn() -> T>(size: usize, factory: F) -> Self {
        let (tx, rx) = bounded(size);
        for _ in 0..size {
            let _ = tx.send(factory());
        }
        Self { free: (tx, rx) }
    }
}

impl<T: Send + 'static> DatabaseHandleProvider for FixedHandlePool<T> {
    type Handle = T;

    fn acquire(&self) -> T {
        self.free.1.recv().expect("handle pool sender never drops")
    }

    fn release(&self, handle: T) {
        let _ = self.free.0.send(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn scoped_handle_always_returns_to_the_pool() {
        let pool = FixedHandlePool::new(1, || 42usize);
        {
            let scoped = Scoped::new(&pool);
            assert_eq!(*scoped.get(), 42);
        }
        // released back: a second acquire does not block.
        let scoped = Scoped::new(&pool);
        assert_eq!(*scoped.get(), 42);
    }

    #[test]
    fn pool_size_bounds_outstanding_handles() {
        let created = Arc::new(AtomicUsize::new(0));
        let c = created.clone();
        let pool = FixedHandlePool::new(2, move || c.fetch_add(1, Ordering::SeqCst));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
    }
}
