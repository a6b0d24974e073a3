//! Soft real-time burst acquisition
//!
//! The scheduler drives N reads of a [`SampleSource`] at a target cadence.
//! Every sample has an absolute deadline `t0 + i * period`; the loop polls the
//! monotonic clock with short pauses until the deadline has passed, then
//! samples. A late sample is never skipped: lateness accumulates and shows up
//! in the recorded intervals instead.

use std::time::Duration;

use crate::burst::{mps2_to_mg, BurstConfig, SampleBurst, DT_SATURATED_US};
use crate::clock::ClockSource;
use crate::error::{NodeError, Result};
use crate::sensor::SampleSource;

/// Pause between polls of the monotonic clock while waiting for a deadline
pub const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Post-run timing diagnostics
///
/// Purely observational; nothing in the run depends on these values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingReport {
    /// Target period in microseconds
    pub target_period_us: u32,
    /// Number of recorded intervals (sample count - 1)
    pub intervals: usize,
    pub min_us: u16,
    pub max_us: u16,
    pub mean_us: f64,
    /// Intervals that hit the 65535 µs ceiling
    pub saturated: usize,
    /// Sum of all recorded intervals
    pub duration_us: u64,
    /// Duration a perfectly periodic burst would have taken
    pub expected_duration_us: u64,
    /// Wall clock read right after the last sample
    pub end_wall_us: u64,
    /// `t0_wall_us + duration_us`
    pub end_estimate_us: u64,
    /// `end_wall_us - end_estimate_us`
    pub drift_us: i64,
}

impl TimingReport {
    /// Compute the report for a finished burst
    pub fn from_burst(burst: &SampleBurst, target_period_us: u32, end_wall_us: u64) -> Self {
        let dt = burst.inter_sample_us();
        let intervals = dt.len();
        let min_us = dt.iter().copied().min().unwrap_or(0);
        let max_us = dt.iter().copied().max().unwrap_or(0);
        let saturated = dt.iter().filter(|&&d| d == DT_SATURATED_US).count();
        let duration_us = burst.duration_us();
        let mean_us = if intervals > 0 {
            duration_us as f64 / intervals as f64
        } else {
            0.0
        };
        let expected_duration_us = intervals as u64 * u64::from(target_period_us);
        let end_estimate_us = burst.t0_wall_us() + duration_us;
        let drift_us = end_wall_us as i64 - end_estimate_us as i64;

        Self {
            target_period_us,
            intervals,
            min_us,
            max_us,
            mean_us,
            saturated,
            duration_us,
            expected_duration_us,
            end_wall_us,
            end_estimate_us,
            drift_us,
        }
    }

    fn log(&self) {
        tracing::info!(
            min_us = self.min_us,
            max_us = self.max_us,
            mean_us = format_args!("{:.2}", self.mean_us),
            target_us = self.target_period_us,
            saturated = self.saturated,
            "dt stats"
        );
        tracing::info!(
            duration_ms = format_args!("{:.3}", self.duration_us as f64 / 1000.0),
            expected_ms = format_args!("{:.3}", self.expected_duration_us as f64 / 1000.0),
            "burst duration"
        );
        tracing::info!(
            now = self.end_wall_us,
            est = self.end_estimate_us,
            err_us = self.drift_us,
            "end check"
        );
    }
}

/// A finished burst together with its timing diagnostics
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub burst: SampleBurst,
    pub timing: TimingReport,
}

/// Drives one burst acquisition against a clock
pub struct AcquisitionScheduler<'a, C: ClockSource + ?Sized> {
    clock: &'a C,
    poll_interval: Duration,
}

impl<'a, C: ClockSource + ?Sized> AcquisitionScheduler<'a, C> {
    /// Create a scheduler polling `clock` every [`POLL_INTERVAL`]
    pub fn new(clock: &'a C) -> Self {
        Self {
            clock,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the poll interval used while waiting for a deadline
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Acquire one burst
    ///
    /// # Arguments
    /// * `config` - Sample count and target rate of the burst
    /// * `source` - Sample source, read exactly `sample_count` times
    ///
    /// # Returns
    /// * `Ok(Acquisition)` - Burst with `sample_count` samples per axis and
    ///   `sample_count - 1` intervals, plus timing diagnostics
    /// * `Err(NodeError::TooFewSamples)` - `sample_count < 2`
    /// * `Err(NodeError)` - The sample source reported a hard fault
    ///
    /// # Example
    /// ```
    /// use accel_burst_node::{AcquisitionScheduler, BurstConfig, Reading, SampleSource, SystemClock};
    ///
    /// struct Still;
    /// impl SampleSource for Still {
    ///     fn read(&mut self) -> accel_burst_node::Result<Reading> {
    ///         Ok(Reading::new(0.0, 0.0, 9.80665))
    ///     }
    /// }
    ///
    /// let clock = SystemClock::new();
    /// let acquisition = AcquisitionScheduler::new(&clock).run(&BurstConfig::new(10, 1000, 0.0), &mut Still)?;
    /// assert_eq!(acquisition.burst.len(), 10);
    /// assert_eq!(acquisition.burst.inter_sample_us().len(), 9);
    /// # Ok::<(), accel_burst_node::NodeError>(())
    /// ```
    pub fn run<S: SampleSource + ?Sized>(&self, config: &BurstConfig, source: &mut S) -> Result<Acquisition> {
        if config.sample_count < 2 {
            return Err(NodeError::TooFewSamples(config.sample_count));
        }
        if config.target_rate_hz == 0 {
            return Err(NodeError::InvalidParameter(
                "target rate must be at least 1 Hz".to_string(),
            ));
        }

        let n = usize::from(config.sample_count);
        let period_us = config.period_us();
        let period = i64::from(period_us);

        let t0_wall = self.clock.wall_us();
        let t0_mono = self.clock.monotonic_us();

        let mut burst = SampleBurst::with_capacity(t0_wall, n);
        let mut t_prev = t0_mono;

        for i in 0..n {
            if i > 0 {
                let target = t0_mono + i as i64 * period;
                while self.clock.monotonic_us() < target {
                    self.clock.pause(self.poll_interval);
                }
            }

            let t_now = self.clock.monotonic_us();
            if i > 0 {
                let delta = (t_now - t_prev).clamp(0, i64::from(DT_SATURATED_US));
                burst.push_interval(delta as u16);
            }
            t_prev = t_now;

            let reading = source.read()?;
            burst.push_sample(mps2_to_mg(reading.x), mps2_to_mg(reading.y), mps2_to_mg(reading.z));
        }

        let timing = TimingReport::from_burst(&burst, period_us, self.clock.wall_us());
        timing.log();

        Ok(Acquisition { burst, timing })
    }
}
