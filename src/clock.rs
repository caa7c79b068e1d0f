// src/clock.rs
use std::{
    cell::Cell,
    rc::Rc,
    time::{Duration, Instant},
};

/// Wall-clock reader used for timer deadlines and poll-interval backoff.
///
/// `now` is measured from an arbitrary per-clock origin.
pub trait Clock {
    fn now(&self) -> Duration;

    /// Block (or, for virtual clocks, jump) until `deadline`.
    fn sleep_until(&self, deadline: Duration);

    /// True if `sleep_until` moves time instead of blocking.
    fn is_virtual(&self) -> bool {
        false
    }
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Virtual time. Only moves when told to, or when the scheduler idles
/// towards its next timer.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time, readable without the `Clock` trait in scope.
    #[inline]
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }

    pub fn set(&self, to: Duration) {
        if to > self.now.get() {
            self.now.set(to);
        }
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Duration {
        ManualClock::now(self)
    }

    fn sleep_until(&self, deadline: Duration) {
        self.set(deadline);
    }

    fn is_virtual(&self) -> bool {
        true
    }
}
