//! Burst parameters, sample buffers and unit conversions

use crate::error::{NodeError, Result};

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Largest representable inter-sample interval in microseconds
pub const DT_SATURATED_US: u16 = u16::MAX;

/// Accepted sample count range when parameters come from configuration
pub const SAMPLE_COUNT_RANGE: (u16, u16) = (10, 2000);

/// Accepted target rate range when parameters come from configuration
pub const TARGET_RATE_RANGE: (u16, u16) = (50, 2000);

/// Accepted energy threshold range (m/s²)
pub const THRESHOLD_RANGE: (f32, f32) = (0.0, 50.0);

/// Convert an acceleration in m/s² to milli-g, rounded and saturated to i16
pub fn mps2_to_mg(value: f32) -> i16 {
    let mg = (f64::from(value) / STANDARD_GRAVITY * 1000.0).round();
    mg.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

/// Convert milli-g back to m/s²
pub fn mg_to_mps2(mg: i16) -> f64 {
    f64::from(mg) / 1000.0 * STANDARD_GRAVITY
}

/// Immutable parameters of one acquisition run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstConfig {
    /// Number of samples in the burst
    pub sample_count: u16,
    /// Target sample rate in Hz
    pub target_rate_hz: u16,
    /// RMS magnitude at or above which the burst is transmitted (m/s²)
    pub energy_threshold_mps2: f32,
}

impl BurstConfig {
    /// Build a config as given; the scheduler rejects unusable values
    pub fn new(sample_count: u16, target_rate_hz: u16, energy_threshold_mps2: f32) -> Self {
        Self {
            sample_count,
            target_rate_hz,
            energy_threshold_mps2,
        }
    }

    /// Build a config with every field clamped into its configuration range
    pub fn clamped(sample_count: u16, target_rate_hz: u16, energy_threshold_mps2: f32) -> Self {
        let threshold = if energy_threshold_mps2.is_nan() {
            THRESHOLD_RANGE.0
        } else {
            energy_threshold_mps2.clamp(THRESHOLD_RANGE.0, THRESHOLD_RANGE.1)
        };
        Self {
            sample_count: sample_count.clamp(SAMPLE_COUNT_RANGE.0, SAMPLE_COUNT_RANGE.1),
            target_rate_hz: target_rate_hz.clamp(TARGET_RATE_RANGE.0, TARGET_RATE_RANGE.1),
            energy_threshold_mps2: threshold,
        }
    }

    /// Target period between samples in microseconds
    pub fn period_us(&self) -> u32 {
        if self.target_rate_hz == 0 {
            return 0;
        }
        1_000_000 / u32::from(self.target_rate_hz)
    }
}

/// One burst of triaxial samples plus its timing
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBurst {
    t0_wall_us: u64,
    accel_x_mg: Vec<i16>,
    accel_y_mg: Vec<i16>,
    accel_z_mg: Vec<i16>,
    inter_sample_us: Vec<u16>,
}

impl SampleBurst {
    /// Empty burst with room for `sample_count` samples
    pub(crate) fn with_capacity(t0_wall_us: u64, sample_count: usize) -> Self {
        Self {
            t0_wall_us,
            accel_x_mg: Vec::with_capacity(sample_count),
            accel_y_mg: Vec::with_capacity(sample_count),
            accel_z_mg: Vec::with_capacity(sample_count),
            inter_sample_us: Vec::with_capacity(sample_count.saturating_sub(1)),
        }
    }

    pub(crate) fn push_sample(&mut self, x_mg: i16, y_mg: i16, z_mg: i16) {
        self.accel_x_mg.push(x_mg);
        self.accel_y_mg.push(y_mg);
        self.accel_z_mg.push(z_mg);
    }

    pub(crate) fn push_interval(&mut self, dt_us: u16) {
        self.inter_sample_us.push(dt_us);
    }

    /// Assemble a burst from already-filled sequences
    ///
    /// The three axes must have the same length `n` and the interval sequence
    /// must hold `n - 1` entries.
    pub fn from_parts(
        t0_wall_us: u64,
        accel_x_mg: Vec<i16>,
        accel_y_mg: Vec<i16>,
        accel_z_mg: Vec<i16>,
        inter_sample_us: Vec<u16>,
    ) -> Result<Self> {
        let n = accel_x_mg.len();
        if accel_y_mg.len() != n || accel_z_mg.len() != n {
            return Err(NodeError::InvalidParameter(format!(
                "axis lengths differ: x={}, y={}, z={}",
                n,
                accel_y_mg.len(),
                accel_z_mg.len()
            )));
        }
        if n == 0 || inter_sample_us.len() != n - 1 {
            return Err(NodeError::InvalidParameter(format!(
                "expected {} intervals for {} samples, got {}",
                n.saturating_sub(1),
                n,
                inter_sample_us.len()
            )));
        }
        Ok(Self {
            t0_wall_us,
            accel_x_mg,
            accel_y_mg,
            accel_z_mg,
            inter_sample_us,
        })
    }

    /// Wall-clock microseconds at sample index 0
    pub fn t0_wall_us(&self) -> u64 {
        self.t0_wall_us
    }

    /// Number of samples per axis
    pub fn len(&self) -> usize {
        self.accel_x_mg.len()
    }

    /// True when no sample has been stored
    pub fn is_empty(&self) -> bool {
        self.accel_x_mg.is_empty()
    }

    pub fn accel_x_mg(&self) -> &[i16] {
        &self.accel_x_mg
    }

    pub fn accel_y_mg(&self) -> &[i16] {
        &self.accel_y_mg
    }

    pub fn accel_z_mg(&self) -> &[i16] {
        &self.accel_z_mg
    }

    /// Elapsed monotonic microseconds between consecutive samples
    pub fn inter_sample_us(&self) -> &[u16] {
        &self.inter_sample_us
    }

    /// Sample `index` converted back to m/s²
    pub fn sample_mps2(&self, index: usize) -> Option<(f64, f64, f64)> {
        Some((
            mg_to_mps2(*self.accel_x_mg.get(index)?),
            mg_to_mps2(*self.accel_y_mg.get(index)?),
            mg_to_mps2(*self.accel_z_mg.get(index)?),
        ))
    }

    /// Sum of all recorded intervals in microseconds
    pub fn duration_us(&self) -> u64 {
        self.inter_sample_us.iter().map(|&d| u64::from(d)).sum()
    }
}
