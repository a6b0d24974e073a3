//! Accelerometer capability and the simulated LIS331-class device used on hosts

use std::f64::consts::PI;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::burst::STANDARD_GRAVITY;
use crate::error::{NodeError, Result};

/// Default I2C address of the accelerometer
pub const DEFAULT_I2C_ADDRESS: u8 = 0x18;

/// One triaxial reading in m/s²
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Reading {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Synchronous source of one reading per call
pub trait SampleSource {
    /// Read one sample; an error is a hard fault that aborts the burst
    fn read(&mut self) -> Result<Reading>;
}

/// A sample source that must be brought up before use
pub trait SensorDevice: SampleSource {
    /// Probe and configure the device
    fn begin(&mut self, settings: &SensorSettings) -> Result<()>;
}

/// Full-scale range of the accelerometer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    G6,
    G12,
    G24,
}

impl Range {
    /// Map a configured value in g to a supported range (anything else is 24 g)
    pub fn from_g(range_g: u8) -> Self {
        match range_g {
            6 => Range::G6,
            12 => Range::G12,
            _ => Range::G24,
        }
    }

    pub fn as_g(&self) -> u8 {
        match self {
            Range::G6 => 6,
            Range::G12 => 12,
            Range::G24 => 24,
        }
    }

    /// Full-scale value in m/s²
    pub fn full_scale_mps2(&self) -> f64 {
        f64::from(self.as_g()) * STANDARD_GRAVITY
    }
}

/// Output data rate of the accelerometer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    Hz50,
    Hz100,
    Hz400,
    Hz1000,
}

impl DataRate {
    /// Closest supported rate at or below the target, never below 50 Hz
    pub fn for_target(target_rate_hz: u16) -> Self {
        if target_rate_hz >= 1000 {
            DataRate::Hz1000
        } else if target_rate_hz >= 400 {
            DataRate::Hz400
        } else if target_rate_hz >= 100 {
            DataRate::Hz100
        } else {
            DataRate::Hz50
        }
    }

    pub fn as_hz(&self) -> u32 {
        match self {
            DataRate::Hz50 => 50,
            DataRate::Hz100 => 100,
            DataRate::Hz400 => 400,
            DataRate::Hz1000 => 1000,
        }
    }
}

/// Settings applied when the sensor is brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    pub i2c_address: u8,
    pub range: Range,
    pub data_rate: DataRate,
}

impl SensorSettings {
    pub fn new(i2c_address: u8, range_g: u8, target_rate_hz: u16) -> Self {
        Self {
            i2c_address,
            range: Range::from_g(range_g),
            data_rate: DataRate::for_target(target_rate_hz),
        }
    }
}

/// Axis that carries the simulated vibration tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Signal model of the simulated accelerometer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalModel {
    /// Static acceleration (gravity) in m/s²
    pub gravity: Reading,
    /// Frequency of the vibration tone in Hz (0 disables it)
    pub tone_hz: f64,
    /// Peak amplitude of the vibration tone in m/s²
    pub tone_amplitude: f64,
    /// Axis the tone is applied to
    pub tone_axis: Axis,
    /// Uniform noise half-width in m/s²
    pub noise: f64,
}

impl Default for SignalModel {
    fn default() -> Self {
        Self {
            gravity: Reading::new(0.0, 0.0, STANDARD_GRAVITY as f32),
            tone_hz: 0.0,
            tone_amplitude: 0.0,
            tone_axis: Axis::Z,
            noise: 0.02,
        }
    }
}

/// Host stand-in for the accelerometer
///
/// Only answers at its own I2C address and clips every axis at the
/// configured full-scale range, like the real part.
pub struct SimulatedAccelerometer {
    address: u8,
    model: SignalModel,
    rng: ChaCha8Rng,
    settings: Option<SensorSettings>,
    started: Instant,
}

impl SimulatedAccelerometer {
    /// Create a device at `address` with a fixed noise seed
    pub fn new(address: u8, model: SignalModel, seed: u64) -> Self {
        Self {
            address,
            model,
            rng: ChaCha8Rng::seed_from_u64(seed),
            settings: None,
            started: Instant::now(),
        }
    }

    fn noise(&mut self) -> f64 {
        if self.model.noise <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-self.model.noise..self.model.noise)
    }
}

impl SensorDevice for SimulatedAccelerometer {
    fn begin(&mut self, settings: &SensorSettings) -> Result<()> {
        if settings.i2c_address != self.address {
            return Err(NodeError::Sensor(format!(
                "no accelerometer answering at 0x{:02X}",
                settings.i2c_address
            )));
        }
        tracing::debug!(
            range_g = settings.range.as_g(),
            odr_hz = settings.data_rate.as_hz(),
            "accelerometer configured"
        );
        self.settings = Some(*settings);
        self.started = Instant::now();
        Ok(())
    }
}

impl SampleSource for SimulatedAccelerometer {
    fn read(&mut self) -> Result<Reading> {
        let settings = self
            .settings
            .ok_or_else(|| NodeError::Sensor("read before begin".to_string()))?;
        let t = self.started.elapsed().as_secs_f64();
        let tone = if self.model.tone_hz > 0.0 {
            self.model.tone_amplitude * (2.0 * PI * self.model.tone_hz * t).sin()
        } else {
            0.0
        };
        let (tx, ty, tz) = match self.model.tone_axis {
            Axis::X => (tone, 0.0, 0.0),
            Axis::Y => (0.0, tone, 0.0),
            Axis::Z => (0.0, 0.0, tone),
        };
        let limit = settings.range.full_scale_mps2();
        let x = (f64::from(self.model.gravity.x) + tx + self.noise()).clamp(-limit, limit);
        let y = (f64::from(self.model.gravity.y) + ty + self.noise()).clamp(-limit, limit);
        let z = (f64::from(self.model.gravity.z) + tz + self.noise()).clamp(-limit, limit);
        Ok(Reading::new(x as f32, y as f32, z as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_normalization() {
        assert_eq!(Range::from_g(6), Range::G6);
        assert_eq!(Range::from_g(12), Range::G12);
        assert_eq!(Range::from_g(24), Range::G24);
        assert_eq!(Range::from_g(8), Range::G24);
    }

    #[test]
    fn test_data_rate_selection() {
        assert_eq!(DataRate::for_target(2000), DataRate::Hz1000);
        assert_eq!(DataRate::for_target(1000), DataRate::Hz1000);
        assert_eq!(DataRate::for_target(999), DataRate::Hz400);
        assert_eq!(DataRate::for_target(100), DataRate::Hz100);
        assert_eq!(DataRate::for_target(50), DataRate::Hz50);
    }

    #[test]
    fn test_wrong_address_fails_begin() {
        let mut sensor = SimulatedAccelerometer::new(0x18, SignalModel::default(), 1);
        let err = sensor.begin(&SensorSettings::new(0x19, 24, 1000)).unwrap_err();
        assert!(matches!(err, NodeError::Sensor(_)));
    }

    #[test]
    fn test_read_before_begin_is_fault() {
        let mut sensor = SimulatedAccelerometer::new(0x18, SignalModel::default(), 1);
        assert!(sensor.read().is_err());
    }

    #[test]
    fn test_gravity_reading() {
        let mut sensor = SimulatedAccelerometer::new(0x18, SignalModel::default(), 7);
        sensor.begin(&SensorSettings::new(0x18, 24, 1000)).unwrap();
        let r = sensor.read().unwrap();
        assert!(r.x.abs() < 0.05);
        assert!(r.y.abs() < 0.05);
        assert!((r.z - 9.80665).abs() < 0.05);
    }

    #[test]
    fn test_readings_clip_at_full_scale() {
        let model = SignalModel {
            gravity: Reading::new(500.0, -500.0, 0.0),
            noise: 0.0,
            ..SignalModel::default()
        };
        let mut sensor = SimulatedAccelerometer::new(0x18, model, 7);
        sensor.begin(&SensorSettings::new(0x18, 6, 1000)).unwrap();
        let r = sensor.read().unwrap();
        let limit = (6.0 * STANDARD_GRAVITY) as f32;
        assert!((r.x - limit).abs() < 1e-3);
        assert!((r.y + limit).abs() < 1e-3);
    }
}
