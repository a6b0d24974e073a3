//! Node configuration
//!
//! Read from a JSON file with one object per concern:
//!
//! ```json
//! {
//!   "device": { "client_id": "lis331-node-01" },
//!   "wifi":   { "ssid": "plant-floor", "password": "..." },
//!   "mqtt":   { "host": "broker.local", "port": 8883, "topic": "sensor/burst" },
//!   "sensor": { "i2c_addr": 24, "range_g": 24 },
//!   "acq":    { "n_samples": 500, "fs_hz": 1000, "mag_rms_threshold": 10.78 },
//!   "sleep":  { "seconds": 300 }
//! }
//! ```
//!
//! Missing fields take their defaults. `wifi.ssid` and `mqtt.host` are
//! required; numeric fields are clamped into their supported ranges on load.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::burst::{BurstConfig, SAMPLE_COUNT_RANGE, TARGET_RATE_RANGE, THRESHOLD_RANGE};
use crate::error::{NodeError, Result};
use crate::publish::DEFAULT_TOPIC;
use crate::sensor::{Range, SensorSettings, DEFAULT_I2C_ADDRESS};

/// Highest 7-bit I2C address
pub const MAX_I2C_ADDRESS: u8 = 0x7F;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub device: DeviceConfig,
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub tls: TlsConfig,
    pub sensor: SensorConfig,
    pub ntp: NtpConfig,
    pub acq: AcquisitionConfig,
    pub sleep: SleepConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device id, also the prefix of every run id
    pub client_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub ca_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    #[serde(deserialize_with = "saturating_u8")]
    pub i2c_addr: u8,
    /// Full-scale range in g: 6, 12 or 24
    #[serde(deserialize_with = "saturating_u8")]
    pub range_g: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NtpConfig {
    pub server1: String,
    pub server2: String,
    pub server3: String,
    #[serde(deserialize_with = "saturating_u16")]
    pub timeout_s: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    #[serde(deserialize_with = "saturating_u16")]
    pub n_samples: u16,
    #[serde(deserialize_with = "saturating_u16")]
    pub fs_hz: u16,
    /// Minimum RMS magnitude (m/s²) for a burst to be transmitted
    pub mag_rms_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    pub seconds: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_id: "lis331-node-01".to_string(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8883,
            username: String::new(),
            password: String::new(),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_path: "ca.pem".to_string(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            i2c_addr: DEFAULT_I2C_ADDRESS,
            range_g: 24,
        }
    }
}

impl Default for NtpConfig {
    fn default() -> Self {
        Self {
            server1: "pool.ntp.org".to_string(),
            server2: "time.nist.gov".to_string(),
            server3: "time.google.com".to_string(),
            timeout_s: 15,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            n_samples: 500,
            fs_hz: 1000,
            mag_rms_threshold: 10.78,
        }
    }
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self { seconds: 300 }
    }
}

const NTP_TIMEOUT_RANGE: (u16, u16) = (3, 60);
const MIN_SLEEP_S: u32 = 5;
const MAX_SLEEP_S: u32 = 86_400;

impl NodeConfig {
    /// Parse, validate and clamp a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: NodeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file
    ///
    /// # Returns
    /// * `Err(NodeError::ConfigIo)` - The file could not be read
    /// * `Err(NodeError::ConfigParse)` - The file is not valid JSON
    /// * `Err(NodeError::MissingField)` - `wifi.ssid` or `mqtt.host` is empty
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| NodeError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Check required fields and clamp everything else into range
    pub fn validate(&mut self) -> Result<()> {
        if self.wifi.ssid.trim().is_empty() {
            return Err(NodeError::MissingField("wifi.ssid"));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(NodeError::MissingField("mqtt.host"));
        }
        if self.device.client_id.trim().is_empty() {
            return Err(NodeError::MissingField("device.client_id"));
        }

        self.ntp.timeout_s = self.ntp.timeout_s.clamp(NTP_TIMEOUT_RANGE.0, NTP_TIMEOUT_RANGE.1);
        self.acq.n_samples = self.acq.n_samples.clamp(SAMPLE_COUNT_RANGE.0, SAMPLE_COUNT_RANGE.1);
        self.acq.fs_hz = self.acq.fs_hz.clamp(TARGET_RATE_RANGE.0, TARGET_RATE_RANGE.1);
        self.acq.mag_rms_threshold = clamp_threshold(self.acq.mag_rms_threshold);
        self.sleep.seconds = self.sleep.seconds.max(MIN_SLEEP_S);
        self.sensor.range_g = Range::from_g(self.sensor.range_g).as_g();
        self.sensor.i2c_addr = self.sensor.i2c_addr.min(MAX_I2C_ADDRESS);
        Ok(())
    }

    /// Replace one field from a provisioning form entry
    ///
    /// Keys are the dotted JSON paths (`acq.fs_hz`, `sensor.i2c_addr`, ...).
    /// An empty value keeps the current setting and returns `Ok(false)`.
    /// Numbers are clamped to the range the form accepts; `sensor.i2c_addr`
    /// also takes `0x`-prefixed hex.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<bool> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(false);
        }

        match key {
            "device.client_id" => self.device.client_id = value.to_string(),
            "wifi.ssid" => self.wifi.ssid = value.to_string(),
            "wifi.password" => self.wifi.password = value.to_string(),
            "mqtt.host" => self.mqtt.host = value.to_string(),
            "mqtt.port" => self.mqtt.port = parse_clamped(key, value, 1, u64::from(u16::MAX))? as u16,
            "mqtt.username" => self.mqtt.username = value.to_string(),
            "mqtt.password" => self.mqtt.password = value.to_string(),
            "mqtt.topic" => self.mqtt.topic = value.to_string(),
            "tls.ca_path" => self.tls.ca_path = value.to_string(),
            "sensor.i2c_addr" => self.sensor.i2c_addr = parse_i2c_address(key, value)?,
            "sensor.range_g" => {
                let range_g = parse_clamped(key, value, 6, 24)? as u8;
                self.sensor.range_g = Range::from_g(range_g).as_g();
            }
            "ntp.server1" => self.ntp.server1 = value.to_string(),
            "ntp.server2" => self.ntp.server2 = value.to_string(),
            "ntp.server3" => self.ntp.server3 = value.to_string(),
            "ntp.timeout_s" => {
                self.ntp.timeout_s =
                    parse_clamped(key, value, u64::from(NTP_TIMEOUT_RANGE.0), u64::from(NTP_TIMEOUT_RANGE.1))? as u16
            }
            "acq.n_samples" => {
                self.acq.n_samples =
                    parse_clamped(key, value, u64::from(SAMPLE_COUNT_RANGE.0), u64::from(SAMPLE_COUNT_RANGE.1))? as u16
            }
            "acq.fs_hz" => {
                self.acq.fs_hz =
                    parse_clamped(key, value, u64::from(TARGET_RATE_RANGE.0), u64::from(TARGET_RATE_RANGE.1))? as u16
            }
            "acq.mag_rms_threshold" => {
                let threshold: f32 = value.parse().map_err(|_| invalid(key, value))?;
                if !threshold.is_finite() {
                    return Err(invalid(key, value));
                }
                self.acq.mag_rms_threshold = clamp_threshold(threshold);
            }
            "sleep.seconds" => {
                self.sleep.seconds = parse_clamped(key, value, u64::from(MIN_SLEEP_S), u64::from(MAX_SLEEP_S))? as u32
            }
            _ => return Err(invalid(key, value)),
        }
        Ok(true)
    }

    /// Write the configuration atomically (temporary file, then rename)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = temporary_path(path);
        let json = serde_json::to_string_pretty(self)?;

        fs::write(&tmp, json).map_err(|source| NodeError::ConfigIo {
            path: tmp.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(NodeError::ConfigIo {
                path: path.to_path_buf(),
                source,
            });
        }
        tracing::info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Immutable parameters of one acquisition run
    pub fn burst_config(&self) -> BurstConfig {
        BurstConfig::clamped(self.acq.n_samples, self.acq.fs_hz, self.acq.mag_rms_threshold)
    }

    /// Settings used to bring up the accelerometer
    pub fn sensor_settings(&self) -> SensorSettings {
        SensorSettings::new(self.sensor.i2c_addr, self.sensor.range_g, self.acq.fs_hz)
    }

    pub fn ntp_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.ntp.timeout_s))
    }

    pub fn ntp_servers(&self) -> [&str; 3] {
        [
            self.ntp.server1.as_str(),
            self.ntp.server2.as_str(),
            self.ntp.server3.as_str(),
        ]
    }
}

fn clamp_threshold(value: f32) -> f32 {
    if value.is_nan() {
        return THRESHOLD_RANGE.0;
    }
    value.clamp(THRESHOLD_RANGE.0, THRESHOLD_RANGE.1)
}

/// Out-of-range integers saturate on load; `validate` clamps them afterwards
fn saturating_u16<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    let value = i64::deserialize(deserializer)?;
    Ok(value.clamp(0, i64::from(u16::MAX)) as u16)
}

fn saturating_u8<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u8, D::Error> {
    let value = i64::deserialize(deserializer)?;
    Ok(value.clamp(0, i64::from(u8::MAX)) as u8)
}

fn invalid(key: &str, value: &str) -> NodeError {
    NodeError::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_clamped(key: &str, value: &str, min: u64, max: u64) -> Result<u64> {
    let parsed: u64 = value.parse().map_err(|_| invalid(key, value))?;
    Ok(parsed.clamp(min, max))
}

fn parse_i2c_address(key: &str, value: &str) -> Result<u8> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    }
    .map_err(|_| invalid(key, value))?;
    Ok(parsed.min(u64::from(MAX_I2C_ADDRESS)) as u8)
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Where a node gets its configuration at the start of every cycle
pub trait ConfigSource {
    fn load(&mut self) -> Result<NodeConfig>;
}

/// Configuration file plus provisioning overrides applied on every load
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    overrides: Vec<(String, String)>,
}

impl FileConfigSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            overrides: Vec::new(),
        }
    }

    /// Apply `key = value` after every load
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&mut self) -> Result<NodeConfig> {
        let path = &self.path;
        let json = fs::read_to_string(path).map_err(|source| NodeError::ConfigIo {
            path: path.clone(),
            source,
        })?;
        let mut config: NodeConfig = serde_json::from_str(&json)?;
        for (key, value) in &self.overrides {
            config.apply_override(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// An in-memory configuration is its own source
impl ConfigSource for NodeConfig {
    fn load(&mut self) -> Result<NodeConfig> {
        let mut config = self.clone();
        config.validate()?;
        Ok(config)
    }
}
