//! Burst node
//!
//! Runs the sensor node on a host: every cycle reloads the configuration,
//! brings up the link, time and transport, acquires one burst from the
//! simulated accelerometer and publishes it into a capture file when it is
//! above the energy threshold. Faults are signalled and followed by a cold
//! restart; successful cycles end in a suspend.
//!
//! Usage:
//!   burst-node --config config.json --capture bursts.cap
//!   burst-node --config config.json --set acq.fs_hz=400 --set sleep.seconds=30 --save
//!   burst-node --once --tone-hz 120 --tone-amplitude 4.0

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use accel_burst_node::connectivity::HostConnectivity;
use accel_burst_node::node::{HostPower, NodeOptions, Power};
use accel_burst_node::sensor::{Axis, SignalModel, SimulatedAccelerometer, DEFAULT_I2C_ADDRESS};
use accel_burst_node::status::{LogStatus, StatusSink};
use accel_burst_node::{
    CaptureSink, CycleOutcome, FileConfigSource, Node, NodeConfig, NodeError, PublishTiming, StatusEvent,
    SystemClock,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "burst-node")]
#[command(about = "Vibration burst sensor node (host build)", long_about = None)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Capture file receiving every published message
    #[arg(long, default_value = "bursts.cap")]
    capture: PathBuf,

    /// Run a single cycle and exit instead of suspending
    #[arg(long)]
    once: bool,

    /// Provisioning override KEY=VALUE (repeatable), e.g. acq.fs_hz=400
    #[arg(long = "set", value_parser = parse_key_val)]
    overrides: Vec<(String, String)>,

    /// Write the overrides into the configuration file
    #[arg(long)]
    save: bool,

    /// Seed of the simulated sensor noise
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Simulated vibration tone frequency in Hz (0 = none)
    #[arg(long, default_value = "0")]
    tone_hz: f64,

    /// Simulated vibration tone amplitude in m/s²
    #[arg(long, default_value = "0")]
    tone_amplitude: f64,

    /// Simulated uniform noise half-width in m/s²
    #[arg(long, default_value = "0.02")]
    noise: f64,

    /// Fault signalling window before a restart, in seconds
    #[arg(long, default_value = "15")]
    fault_window_secs: u64,

    /// Settle delay after each published message, in milliseconds
    #[arg(long, default_value = "200")]
    settle_ms: u64,

    /// Flush window after the last message, in milliseconds
    #[arg(long, default_value = "3000")]
    flush_ms: u64,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    Ok((key.trim().to_string(), value.to_string()))
}

/// Apply the overrides to the stored configuration and write it back
fn provision(path: &Path, overrides: &[(String, String)], status: &mut dyn StatusSink) -> Result<(), NodeError> {
    status.emit(StatusEvent::Provisioning);

    let mut config = if path.exists() {
        let json = std::fs::read_to_string(path).map_err(|source| NodeError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json)?
    } else {
        NodeConfig::default()
    };

    for (key, value) in overrides {
        if config.apply_override(key, value)? {
            tracing::info!(key = %key, "override applied");
        }
    }
    config.validate()?;
    config.save(path)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut status = LogStatus;

    if args.save {
        if let Err(e) = provision(&args.config, &args.overrides, &mut status) {
            tracing::error!("provisioning failed: {}", e);
            return Err(Box::new(e));
        }
    }

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("received Ctrl+C, stopping");
        r.store(false, Ordering::SeqCst);
    })?;

    let options = NodeOptions {
        fault_window: Duration::from_secs(args.fault_window_secs),
        publish_timing: PublishTiming::new(
            Duration::from_millis(args.settle_ms),
            Duration::from_millis(args.flush_ms),
        ),
    };
    let model = SignalModel {
        tone_hz: args.tone_hz,
        tone_amplitude: args.tone_amplitude,
        tone_axis: Axis::Z,
        noise: args.noise,
        ..SignalModel::default()
    };
    let mut power = HostPower::new(running.clone());
    let mut cycle = 0u64;

    while running.load(Ordering::SeqCst) {
        cycle += 1;
        tracing::info!(cycle, "boot");

        // Every cycle starts from fresh collaborators, like a cold boot.
        let clock = SystemClock::new();
        let mut config = if args.save {
            FileConfigSource::new(&args.config)
        } else {
            args.overrides
                .iter()
                .fold(FileConfigSource::new(&args.config), |source, (k, v)| source.with_override(k, v))
        };
        let mut link = HostConnectivity::new();
        let mut sink = CaptureSink::new(&args.capture);
        let mut sensor = SimulatedAccelerometer::new(DEFAULT_I2C_ADDRESS, model, args.seed.wrapping_add(cycle));

        let report = Node::new(&clock, &mut config, &mut link, &mut sink, &mut sensor, &mut status)
            .with_options(options)
            .run_cycle();

        match report.outcome {
            CycleOutcome::Sleep { seconds } => {
                if let Some(publish) = &report.publish {
                    tracing::info!(
                        delivered = publish.delivered(),
                        failed = publish.failed(),
                        records = sink.records_written(),
                        "cycle complete"
                    );
                }
                if args.once {
                    break;
                }
                power.suspend(seconds);
            }
            CycleOutcome::Restart { category } => {
                if args.once {
                    std::process::exit(i32::from(category.code()));
                }
                tracing::info!("restarting");
            }
        }
    }

    Ok(())
}
