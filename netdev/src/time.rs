//! Time source for bounded busy-waits and rate counters.

use std::time::Instant;

/// Monotonic microsecond clock.
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary fixed point.
    fn now_us(&self) -> u64;

    /// Called between polls of a busy-wait.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// [`Clock`] backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
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
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now_us();
        assert!(b >= a + 1000);
    }
}
