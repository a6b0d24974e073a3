//! Time sources used by the acquisition and publish paths
//!
//! Two readings are kept apart on purpose: a monotonic microsecond counter for
//! inter-sample timing, and a wall-clock microsecond reading (NTP-derived on
//! the device, discontinuous) for the burst timestamp.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Microseconds per second
pub const US_PER_SECOND: u64 = 1_000_000;

/// Clock capability consumed by the scheduler and the publish pipeline
pub trait ClockSource {
    /// Monotonic microseconds since an arbitrary origin
    ///
    /// Signed so that a backward step (clock anomaly) shows up as a negative
    /// delta instead of wrapping.
    fn monotonic_us(&self) -> i64;

    /// Wall-clock microseconds since the Unix epoch
    fn wall_us(&self) -> u64;

    /// Short bounded sleep used by every polling wait
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Pause for `total`, calling `tick` between short slices
    fn pause_with(&self, total: Duration, slice: Duration, tick: &mut dyn FnMut()) {
        let start = self.monotonic_us();
        let total_us = total.as_micros() as i64;
        loop {
            tick();
            if self.monotonic_us() - start >= total_us {
                break;
            }
            self.pause(slice);
        }
    }
}

/// Host clock: `Instant` for the monotonic counter, `SystemTime` for wall time
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a new clock whose monotonic origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn monotonic_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }

    fn wall_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// Virtual clock for tests: time only moves when someone pauses
#[cfg(test)]
pub(crate) struct VirtualClock {
    mono: std::cell::Cell<i64>,
    wall: std::cell::Cell<u64>,
}

#[cfg(test)]
impl VirtualClock {
    pub(crate) fn new(wall_start_us: u64) -> Self {
        Self {
            mono: std::cell::Cell::new(0),
            wall: std::cell::Cell::new(wall_start_us),
        }
    }

    pub(crate) fn advance(&self, us: u64) {
        self.mono.set(self.mono.get() + us as i64);
        self.wall.set(self.wall.get() + us);
    }
}

#[cfg(test)]
impl ClockSource for VirtualClock {
    fn monotonic_us(&self) -> i64 {
        self.mono.get()
    }

    fn wall_us(&self) -> u64 {
        self.wall.get()
    }

    fn pause(&self, duration: Duration) {
        self.advance(duration.as_micros().max(1) as u64);
    }
}
