//! Monotonic microsecond clock and command deadlines
//!
//! Waiting commands sample the clock when they enter WAITING and recheck it
//! on every tick. A clock that cannot be read yields no deadline at all, so
//! timeouts fail open: the command keeps waiting instead of failing.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of monotonic time in microseconds.
pub trait Clock {
    /// Current time, or `None` when the clock is unavailable.
    fn now_micros(&self) -> Option<u64>;
}

/// Wall-independent clock backed by `std::time::Instant`
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> Option<u64> {
        u64::try_from(self.origin.elapsed().as_micros()).ok()
    }
}

/// Hand-driven clock for simulations and tests.
///
/// Clones share the same time, so a test can keep one handle while the
/// studio owns another.
#[derive(Clone)]
pub struct ManualClock {
    now: Rc<Cell<Option<u64>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Some(0))),
        }
    }

    pub fn advance(&self, by: Duration) {
        let step = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        let now = self.now.get().unwrap_or(0);
        self.now.set(Some(now.saturating_add(step)));
    }

    /// Make the clock unreadable (or readable again at `micros`).
    pub fn set(&self, micros: Option<u64>) {
        self.now.set(micros);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> Option<u64> {
        self.now.get()
    }
}

/// Point in time after which a waiting command gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at_micros: u64,
}

impl Deadline {
    /// Deadline `timeout` from now, or `None` if the clock is unavailable.
    pub fn after(clock: &dyn Clock, timeout: Duration) -> Option<Self> {
        let now = clock.now_micros()?;
        let timeout = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
        Some(Self {
            at_micros: now.saturating_add(timeout),
        })
    }

    /// True once the clock reads at or past the deadline. An unreadable
    /// clock never expires a deadline.
    pub fn has_passed(&self, clock: &dyn Clock) -> bool {
        clock
            .now_micros()
            .is_some_and(|now| now >= self.at_micros)
    }
}

/// Whether an optional deadline has expired. `None` never expires.
pub fn expired(deadline: Option<Deadline>, clock: &dyn Clock) -> bool {
    deadline.is_some_and(|d| d.has_passed(clock))
}
