//! Time sources for bit-banging

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Microsecond time source
pub trait Clock {
    /// Monotonic microseconds since an arbitrary origin
    fn now_us(&self) -> u64;

    /// Block for at least `us` microseconds
    fn sleep_us(&self, us: u32);
}

impl<T: Clock + ?Sized> Clock for Box<T> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn sleep_us(&self, us: u32) {
        (**self).sleep_us(us)
    }
}

/// Waits shorter than this are spun; the scheduler cannot be trusted below it
const SPIN_THRESHOLD_US: u32 = 100;

/// Wall clock
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    /// Create a clock with its origin at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_us(&self, us: u32) {
        if us == 0 {
            return;
        }
        let wait = Duration::from_micros(us as u64);
        if us < SPIN_THRESHOLD_US {
            let start = Instant::now();
            while start.elapsed() < wait {
                std::hint::spin_loop();
            }
        } else {
            std::thread::sleep(wait);
        }
    }
}

/// Virtual clock
///
/// Time only moves when someone sleeps on it or calls [`SimClock::advance`].
/// Clones share the same time, so a simulated target can observe exactly
/// how long the host waited.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Arc<AtomicU64>,
}

impl SimClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_us(&self, us: u32) {
        self.advance(us as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_shared() {
        let a = SimClock::new();
        let b = a.clone();
        a.sleep_us(250);
        b.advance(50);
        assert_eq!(a.now_us(), 300);
        assert_eq!(b.now_us(), 300);
    }

    #[test]
    fn test_std_clock_waits() {
        let clock = StdClock::new();
        let start = clock.now_us();
        clock.sleep_us(20);
        clock.sleep_us(200);
        assert!(clock.now_us() - start >= 220);
    }
}
