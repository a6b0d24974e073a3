//! Acquisition and telemetry core of a battery-powered vibration sensor node
//!
//! Each wake cycle samples a triaxial accelerometer at a target rate, decides
//! locally whether the burst carries enough vibration energy to be worth the
//! radio time, and if so frames it as five self-describing CBOR messages
//! (`meta`, `dt`, `x`, `y`, `z`) that are published in order before the node
//! suspends again.
//!
//! # Quick Start
//!
//! ## Acquiring a Burst
//! ```no_run
//! use accel_burst_node::sensor::{SensorDevice, SensorSettings, SignalModel, SimulatedAccelerometer};
//! use accel_burst_node::{AcquisitionScheduler, BurstConfig, SystemClock};
//!
//! let clock = SystemClock::new();
//! let mut sensor = SimulatedAccelerometer::new(0x18, SignalModel::default(), 42);
//! sensor.begin(&SensorSettings::new(0x18, 24, 1000))?;
//!
//! // 500 samples at 1 kHz
//! let acquisition = AcquisitionScheduler::new(&clock).run(&BurstConfig::new(500, 1000, 10.78), &mut sensor)?;
//! println!("dt mean: {:.1} us", acquisition.timing.mean_us);
//! println!("Z[0]: {} mg", acquisition.burst.accel_z_mg()[0]);
//! # Ok::<(), accel_burst_node::NodeError>(())
//! ```
//!
//! ## Gating and Framing
//! ```no_run
//! # use accel_burst_node::sensor::{SensorDevice, SensorSettings, SignalModel, SimulatedAccelerometer};
//! # use accel_burst_node::{AcquisitionScheduler, BurstConfig, SystemClock};
//! use accel_burst_node::{EnergyGate, FrameEncoder, GateDecision, RunIdentity};
//!
//! # let clock = SystemClock::new();
//! # let mut sensor = SimulatedAccelerometer::new(0x18, SignalModel::default(), 42);
//! # sensor.begin(&SensorSettings::new(0x18, 24, 1000))?;
//! let config = BurstConfig::new(500, 1000, 9.0);
//! let acquisition = AcquisitionScheduler::new(&clock).run(&config, &mut sensor)?;
//!
//! let verdict = EnergyGate::new(config.energy_threshold_mps2).evaluate(&acquisition.burst);
//! if verdict.decision == GateDecision::Transmit {
//!     let identity = RunIdentity::derive("lis331-node-01", acquisition.burst.t0_wall_us());
//!     let messages = FrameEncoder::new("lis331-node-01", "192.168.1.20", true)
//!         .encode(&acquisition.burst, &identity, &config);
//!     for message in &messages {
//!         println!("{}: {} bytes", message.type_tag(), message.to_bytes()?.len());
//!     }
//! }
//! # Ok::<(), accel_burst_node::NodeError>(())
//! ```
//!
//! ## Running a Full Cycle
//! ```no_run
//! use accel_burst_node::connectivity::HostConnectivity;
//! use accel_burst_node::sensor::{SignalModel, SimulatedAccelerometer};
//! use accel_burst_node::status::LogStatus;
//! use accel_burst_node::{CaptureSink, FileConfigSource, Node, SystemClock};
//!
//! let clock = SystemClock::new();
//! let mut config = FileConfigSource::new("config.json");
//! let mut link = HostConnectivity::new();
//! let mut sink = CaptureSink::new("bursts.cap");
//! let mut sensor = SimulatedAccelerometer::new(0x18, SignalModel::default(), 42);
//! let mut status = LogStatus;
//!
//! let report = Node::new(&clock, &mut config, &mut link, &mut sink, &mut sensor, &mut status).run_cycle();
//! println!("{:?}", report.outcome);
//! ```

pub mod burst;
pub mod capture;
pub mod clock;
pub mod codec;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod frame;
pub mod gate;
pub mod node;
pub mod publish;
pub mod scheduler;
pub mod sensor;
pub mod status;

// Re-export public API
pub use burst::{BurstConfig, SampleBurst};
pub use capture::{CaptureReader, CaptureSink};
pub use clock::{ClockSource, SystemClock};
pub use config::{ConfigSource, FileConfigSource, NodeConfig};
pub use error::{NodeError, Result};
pub use frame::{FrameEncoder, PublishMessage, RunAssembler, RunIdentity};
pub use gate::{EnergyGate, GateDecision};
pub use node::{CycleOutcome, CycleReport, Node};
pub use publish::{MemorySink, MessageSink, PublishPipeline, PublishTiming};
pub use scheduler::{AcquisitionScheduler, TimingReport};
pub use sensor::{Reading, SampleSource};
pub use status::{FaultCategory, StatusEvent};
