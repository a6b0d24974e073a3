//! One wake cycle of the sensor node
//!
//! A cycle walks the states
//!
//! ```text
//! Init → ConfigReady → LinkReady → TimeReady → TransportReady → SensorReady
//!      → Acquired → Gated(Transmit|Suppress) → [Published] → Sleeping
//! ```
//!
//! Any failing step ends in `Fault(category)`: the category is signalled for a
//! bounded window and the cycle asks for a cold restart. There is no retry in
//! place; the next cycle reloads configuration and repeats every step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ClockSource;
use crate::config::ConfigSource;
use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::frame::{FrameEncoder, RunIdentity};
use crate::gate::{EnergyGate, GateDecision, GateVerdict};
use crate::publish::{MessageSink, PublishPipeline, PublishReport, PublishTiming};
use crate::scheduler::{AcquisitionScheduler, TimingReport};
use crate::sensor::SensorDevice;
use crate::status::{FaultCategory, StatusEvent, StatusSink, FAULT_REPEAT, FAULT_WINDOW};

/// Lifecycle state of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Init,
    ConfigReady,
    LinkReady,
    TimeReady,
    TransportReady,
    SensorReady,
    Acquired,
    Gated(GateDecision),
    Published,
    Sleeping,
    Fault(FaultCategory),
}

/// What the caller does after a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Suspend, then start again from `Init`
    Sleep { seconds: u32 },
    /// The fault has been signalled; restart immediately
    Restart { category: FaultCategory },
}

/// Everything observed during one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// States entered, in order
    pub trace: Vec<NodeState>,
    pub outcome: CycleOutcome,
    pub timing: Option<TimingReport>,
    pub verdict: Option<GateVerdict>,
    pub publish: Option<PublishReport>,
}

/// Timing knobs of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    /// How long a fault is signalled before restarting
    pub fault_window: Duration,
    pub publish_timing: PublishTiming,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            fault_window: FAULT_WINDOW,
            publish_timing: PublishTiming::default(),
        }
    }
}

/// Low-power suspension
pub trait Power {
    /// Suspend for `seconds`; the node restarts from `Init` afterwards
    fn suspend(&mut self, seconds: u32);
}

/// Host suspension: an interruptible sleep
pub struct HostPower {
    running: Arc<AtomicBool>,
}

impl HostPower {
    /// `running` is cleared by the Ctrl+C handler to cut the sleep short
    pub fn new(running: Arc<AtomicBool>) -> Self {
        Self { running }
    }
}

impl Power for HostPower {
    fn suspend(&mut self, seconds: u32) {
        tracing::info!(seconds, "suspending");
        let deadline = std::time::Instant::now() + Duration::from_secs(u64::from(seconds));
        while self.running.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

/// Collaborators of the node, borrowed for the duration of a cycle
pub struct Node<'a> {
    clock: &'a dyn ClockSource,
    config: &'a mut dyn ConfigSource,
    connectivity: &'a mut dyn Connectivity,
    sink: &'a mut dyn MessageSink,
    sensor: &'a mut dyn SensorDevice,
    status: &'a mut dyn StatusSink,
    options: NodeOptions,
}

struct Completed {
    sleep_seconds: u32,
    timing: TimingReport,
    verdict: GateVerdict,
    publish: Option<PublishReport>,
}

impl<'a> Node<'a> {
    pub fn new(
        clock: &'a dyn ClockSource,
        config: &'a mut dyn ConfigSource,
        connectivity: &'a mut dyn Connectivity,
        sink: &'a mut dyn MessageSink,
        sensor: &'a mut dyn SensorDevice,
        status: &'a mut dyn StatusSink,
    ) -> Self {
        Self {
            clock,
            config,
            connectivity,
            sink,
            sensor,
            status,
            options: NodeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one cycle from `Init` to `Sleeping` or `Fault`
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut trace = vec![NodeState::Init];
        match self.attempt(&mut trace) {
            Ok(done) => {
                trace.push(NodeState::Sleeping);
                self.status.emit(StatusEvent::Idle);
                CycleReport {
                    trace,
                    outcome: CycleOutcome::Sleep {
                        seconds: done.sleep_seconds,
                    },
                    timing: Some(done.timing),
                    verdict: Some(done.verdict),
                    publish: done.publish,
                }
            }
            Err(e) => {
                let category = e.fault_category().unwrap_or(FaultCategory::Configuration);
                tracing::error!(state = ?trace.last(), "cycle aborted: {}", e);
                trace.push(NodeState::Fault(category));
                self.signal_fault(category);
                CycleReport {
                    trace,
                    outcome: CycleOutcome::Restart { category },
                    timing: None,
                    verdict: None,
                    publish: None,
                }
            }
        }
    }

    fn enter(trace: &mut Vec<NodeState>, state: NodeState) {
        tracing::debug!(?state, "state");
        trace.push(state);
    }

    fn attempt(&mut self, trace: &mut Vec<NodeState>) -> Result<Completed> {
        let config = self.config.load()?;
        Self::enter(trace, NodeState::ConfigReady);

        self.connectivity.connect_link(&config)?;
        Self::enter(trace, NodeState::LinkReady);

        self.connectivity.sync_time(&config, self.clock)?;
        Self::enter(trace, NodeState::TimeReady);

        self.sink.connect()?;
        Self::enter(trace, NodeState::TransportReady);

        self.sensor.begin(&config.sensor_settings())?;
        Self::enter(trace, NodeState::SensorReady);

        let burst_config = config.burst_config();
        self.status.emit(StatusEvent::Measuring);
        let acquisition = AcquisitionScheduler::new(self.clock).run(&burst_config, &mut *self.sensor)?;
        Self::enter(trace, NodeState::Acquired);

        let verdict = EnergyGate::new(burst_config.energy_threshold_mps2).evaluate(&acquisition.burst);
        Self::enter(trace, NodeState::Gated(verdict.decision));

        let publish = match verdict.decision {
            GateDecision::Suppress => {
                self.status.emit(StatusEvent::BelowThreshold);
                None
            }
            GateDecision::Transmit => {
                self.status.emit(StatusEvent::Success);
                let identity = RunIdentity::derive(&config.device.client_id, acquisition.burst.t0_wall_us());
                let encoder = FrameEncoder::new(
                    config.device.client_id.as_str(),
                    self.connectivity.local_address(),
                    self.connectivity.time_valid(),
                );
                let messages = encoder.encode(&acquisition.burst, &identity, &burst_config);
                tracing::info!(id = %identity, "publishing burst");
                let report = PublishPipeline::new(self.clock, config.mqtt.topic.as_str(), self.options.publish_timing)
                    .publish(messages, &mut *self.sink);
                Self::enter(trace, NodeState::Published);
                Some(report)
            }
        };

        Ok(Completed {
            sleep_seconds: config.sleep.seconds,
            timing: acquisition.timing,
            verdict,
            publish,
        })
    }

    fn signal_fault(&mut self, category: FaultCategory) {
        let status = &mut *self.status;
        self.clock
            .pause_with(self.options.fault_window, FAULT_REPEAT, &mut || status.emit(StatusEvent::Fault(category)));
        tracing::warn!(code = category.code(), "restarting after fault");
    }
}
