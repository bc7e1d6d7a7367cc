//! Idle-connection timeout wheel.
//!
//! Grounded on `original_source/webserver.cpp`'s `timer`/`adjust_timer`/`deal_timer`: a sorted
//! list of expirations, swept on every `SIGALRM` tick. `spec.md` §4.8 keeps the same shape —
//! ordered by expiration, extend-only adjustment, front-popping sweep — rather than a hashed
//! wheel, since connection counts here stay in the low tens of thousands and a `Vec` kept sorted
//! by insertion/adjustment is simpler and grounds directly on the original.

use std::time::{Duration, Instant};

use mio::Token;

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    token: Token,
    expire: Instant,
}

/// Sorted-by-expiration timer list keyed by connection [`Token`].
///
/// Entries are kept sorted ascending by `expire`, so `tick` only ever has to pop from the front.
#[derive(Debug, Default)]
pub struct TimerWheel {
    entries: Vec<TimerEntry>,
}

impl TimerWheel {
    /// Creates an empty wheel.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers a new expiration for `token`, replacing any existing one.
    pub fn add_timer(&mut self, token: Token, now: Instant, ttl: Duration) {
        self.del_timer(token);
        let expire = now + ttl;
        let pos = self
            .entries
            .partition_point(|e| e.expire <= expire);
        self.entries.insert(pos, TimerEntry { token, expire });
    }

    /// Extends `token`'s expiration to `now + ttl`, matching the original's "only push forward"
    /// `adjust_timer` (a new activity never makes a connection expire *sooner*).
    pub fn adjust_timer(&mut self, token: Token, now: Instant, ttl: Duration) {
        let new_expire = now + ttl;
        if let Some(idx) = self.entries.iter().position(|e| e.token == token) {
            if self.entries[idx].expire >= new_expire {
                return;
            }
            self.entries.remove(idx);
        }
        let pos = self
            .entries
            .partition_point(|e| e.expire <= new_expire);
        self.entries.insert(pos, TimerEntry {
            token,
            expire: new_expire,
        });
    }

    /// Removes `token`'s timer, if any (called on connection close).
    pub fn del_timer(&mut self, token: Token) {
        self.entries.retain(|e| e.token != token);
    }

    /// Pops every entry whose expiration is at or before `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<Token> {
        let split = self.entries.partition_point(|e| e.expire <= now);
        self.entries.drain(..split).map(|e| e.token).collect()
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the wheel holds no timers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(n: usize) -> Token {
        Token(n)
    }

    #[test]
    fn tick_pops_only_expired_entries_in_order() {
        let mut wheel = TimerWheel::new();
        let base = Instant::now();
        wheel.add_timer(tok(1), base, Duration::from_millis(10));
        wheel.add_timer(tok(2), base, Duration::from_millis(20));
        wheel.add_timer(tok(3), base, Duration::from_millis(30));

        let expired = wheel.tick(base + Duration::from_millis(15));
        assert_eq!(expired, vec![tok(1)]);
        assert_eq!(wheel.len(), 2);

        let expired = wheel.tick(base + Duration::from_millis(35));
        assert_eq!(expired, vec![tok(2), tok(3)]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn adjust_timer_only_extends_never_shortens() {
        let mut wheel = TimerWheel::new();
        let base = Instant::now();
        wheel.add_timer(tok(1), base, Duration::from_millis(100));

        // a shorter ttl must not move the expiration earlier.
        wheel.adjust_timer(tok(1), base, Duration::from_millis(10));
        assert!(wheel.tick(base + Duration::from_millis(50)).is_empty());

        wheel.adjust_timer(tok(1), base, Duration::from_millis(200));
        assert!(wheel.tick(base + Duration::from_millis(150)).is_empty());
        assert_eq!(
            wheel.tick(base + Duration::from_millis(250)),
            vec![tok(1)]
        );
    }

    #[test]
    fn del_timer_removes_pending_expiration() {
        let mut wheel = TimerWheel::new();
        let base = Instant::now();
        wheel.add_timer(tok(1), base, Duration::from_millis(10));
        wheel.del_timer(tok(1));
        assert!(wheel.tick(base + Duration::from_millis(50)).is_empty());
    }

    #[test]
    fn stays_sorted_under_interleaved_adjustments() {
        let mut wheel = TimerWheel::new();
        let base = Instant::now();
        wheel.add_timer(tok(1), base, Duration::from_millis(30));
        wheel.add_timer(tok(2), base, Duration::from_millis(10));
        wheel.add_timer(tok(3), base, Duration::from_millis(20));
        wheel.adjust_timer(tok(2), base, Duration::from_millis(50));

        let mut expected_order = wheel.entries.iter().map(|e| e.expire).collect::<Vec<_>>();
        let mut sorted = expected_order.clone();
        sorted.sort();
        expected_order.dedup();
        sorted.dedup();
        assert_eq!(expected_order, sorted);
    }
}
