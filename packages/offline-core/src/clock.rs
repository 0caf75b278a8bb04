//! Monotonic local clock for ordering queued operations.
//!
//! Operation timestamps are unix milliseconds, but two operations enqueued
//! within the same millisecond still need a strict order for the
//! `(priority desc, timestamp asc)` drain discipline. [`Clock`] appends a
//! logical counter that resets whenever wall-clock time advances, the same
//! technique a hybrid logical clock uses to disambiguate same-millisecond
//! events -- without the cross-node merge machinery, since no remote
//! timestamp ever needs to be folded back in here (the RPC contract only
//! returns an integer `serverVersion`, never a peer timestamp).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Abstraction over the system clock, so tests can run on a virtual one.
pub trait ClockSource: Send + Sync {
    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Default clock source backed by `std::time::SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_millis() as u64
    }
}

/// A monotonically increasing `(millis, counter)` pair.
///
/// Ordered first by `millis`, then by `counter`, giving a strict total order
/// over every timestamp generated by a single [`Clock`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub millis: u64,
    pub counter: u32,
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis
            .cmp(&other.millis)
            .then_with(|| self.counter.cmp(&other.counter))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Generates strictly increasing [`Timestamp`]s from a [`ClockSource`].
pub struct Clock {
    last_millis: u64,
    last_counter: u32,
    source: Box<dyn ClockSource>,
}

impl Clock {
    #[must_use]
    pub fn new(source: Box<dyn ClockSource>) -> Self {
        Self {
            last_millis: 0,
            last_counter: 0,
            source,
        }
    }

    /// Returns the current wall-clock time without advancing the logical counter.
    #[must_use]
    pub fn now_millis(&self) -> u64 {
        self.source.now_millis()
    }

    /// Generates the next timestamp, strictly greater than every prior one
    /// returned by this clock.
    pub fn tick(&mut self) -> Timestamp {
        let wall = self.source.now_millis();
        if wall > self.last_millis {
            self.last_millis = wall;
            self.last_counter = 0;
        } else {
            self.last_counter += 1;
        }
        Timestamp {
            millis: self.last_millis,
            counter: self.last_counter,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(Box::new(SystemClock))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use super::*;

    struct FixedClock(Arc<AtomicU64>);

    impl ClockSource for FixedClock {
        fn now_millis(&self) -> u64 {
            self.0.load(AtomicOrdering::Relaxed)
        }
    }

    #[test]
    fn tick_is_monotonically_increasing() {
        let time = Arc::new(AtomicU64::new(1_000));
        let mut clock = Clock::new(Box::new(FixedClock(time)));

        let a = clock.tick();
        let b = clock.tick();
        let c = clock.tick();

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn counter_resets_when_wall_clock_advances() {
        let time = Arc::new(AtomicU64::new(1_000));
        let mut clock = Clock::new(Box::new(FixedClock(time.clone())));

        let a = clock.tick();
        assert_eq!(a.counter, 0);
        let b = clock.tick();
        assert_eq!(b.counter, 1);

        time.store(1_001, AtomicOrdering::Relaxed);
        let c = clock.tick();
        assert_eq!(c.millis, 1_001);
        assert_eq!(c.counter, 0);
    }

    #[test]
    fn serde_roundtrip() {
        let ts = Timestamp { millis: 42, counter: 7 };
        let bytes = serde_json::to_vec(&ts).unwrap();
        let decoded: Timestamp = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(ts, decoded);
    }
}
