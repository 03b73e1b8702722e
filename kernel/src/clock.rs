//! The kernel's tick counter.
//!
//! On real hardware ticks come from the timer interrupt; here whoever hosts
//! the kernel advances the counter. `sleep` and `uptime` read it.

use core::sync::atomic::{AtomicUsize, Ordering};

/// A monotonic tick counter.
pub struct Clock {
    ticks: AtomicUsize,
}

impl Clock {
    pub const fn new() -> Self {
        Clock {
            ticks: AtomicUsize::new(0),
        }
    }

    /// Advances the clock by one tick.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Release);
    }

    /// Ticks elapsed since the clock was built.
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::Acquire)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}
