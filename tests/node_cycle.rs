//! End-to-end runs on the host clock

use std::time::Duration;

use accel_burst_node::connectivity::HostConnectivity;
use accel_burst_node::node::NodeOptions;
use accel_burst_node::sensor::{SensorDevice, SensorSettings, SignalModel, SimulatedAccelerometer};
use accel_burst_node::status::RecordingStatus;
use accel_burst_node::{
    AcquisitionScheduler, BurstConfig, CaptureReader, CaptureSink, CycleOutcome, EnergyGate, FrameEncoder,
    GateDecision, MemorySink, MessageSink, NodeConfig, PublishMessage, PublishPipeline, PublishTiming, Reading,
    Result, RunAssembler, RunIdentity, SampleSource, StatusEvent, SystemClock,
};

/// 1 g on Z, nothing else
struct StillSensor;

impl SampleSource for StillSensor {
    fn read(&mut self) -> Result<Reading> {
        Ok(Reading::new(0.0, 0.0, 9.80665))
    }
}

#[test]
fn four_samples_at_1khz_one_g_on_z() {
    let clock = SystemClock::new();
    let config = BurstConfig::new(4, 1000, 9.8);

    let acquisition = AcquisitionScheduler::new(&clock).run(&config, &mut StillSensor).unwrap();
    let burst = &acquisition.burst;

    assert_eq!(burst.len(), 4);
    assert_eq!(burst.accel_z_mg(), &[1000, 1000, 1000, 1000]);
    assert_eq!(burst.accel_x_mg(), &[0, 0, 0, 0]);
    assert_eq!(burst.inter_sample_us().len(), 3);
    // Deadlines are absolute, so the burst cannot finish early.
    assert!(burst.duration_us() >= 2_900, "duration {}", burst.duration_us());
    assert!(acquisition.timing.mean_us >= 900.0);
    assert!(acquisition.timing.mean_us < 20_000.0, "mean {}", acquisition.timing.mean_us);
    assert_eq!(acquisition.timing.saturated, 0);

    let verdict = EnergyGate::new(config.energy_threshold_mps2).evaluate(burst);
    assert!((verdict.rms_mps2 - 9.807).abs() < 1e-3);
    assert_eq!(verdict.decision, GateDecision::Transmit);
    assert_eq!(
        EnergyGate::new(9.81).evaluate(burst).decision,
        GateDecision::Suppress
    );

    let identity = RunIdentity::derive("node-e2e", burst.t0_wall_us());
    let messages = FrameEncoder::new("node-e2e", "127.0.0.1", true).encode(burst, &identity, &config);

    let mut sink = MemorySink::new().failing_on(2);
    sink.connect().unwrap();
    let report = PublishPipeline::new(&clock, "sensor/burst", PublishTiming::new(Duration::from_millis(5), Duration::from_millis(20)))
        .publish(messages, &mut sink);

    assert_eq!(report.flags(), vec![true, false, true, true, true]);
    let received: Vec<PublishMessage> = sink
        .messages
        .iter()
        .map(|(_, bytes)| PublishMessage::decode(bytes).unwrap())
        .collect();
    let tags: Vec<&str> = received.iter().map(|m| m.type_tag()).collect();
    assert_eq!(tags, vec!["meta", "x", "y", "z"]);
    assert!(received.iter().all(|m| m.id() == identity.as_str()));
}

#[test]
fn node_cycle_into_capture_file() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("bursts.cap");

    let mut config = NodeConfig::default();
    config.wifi.ssid = "lab".into();
    config.mqtt.host = "127.0.0.1".into();
    config.apply_override("device.client_id", "node-it").unwrap();
    config.apply_override("acq.n_samples", "16").unwrap();
    config.apply_override("acq.fs_hz", "1000").unwrap();
    config.apply_override("acq.mag_rms_threshold", "5.0").unwrap();
    config.apply_override("sleep.seconds", "30").unwrap();

    let clock = SystemClock::new();
    let mut link = HostConnectivity::new();
    let mut sink = CaptureSink::new(&capture);
    let model = SignalModel {
        noise: 0.0,
        ..SignalModel::default()
    };
    let mut sensor = SimulatedAccelerometer::new(0x18, model, 3);
    let mut status = RecordingStatus::default();

    let options = NodeOptions {
        fault_window: Duration::from_millis(10),
        publish_timing: PublishTiming::new(Duration::from_millis(2), Duration::from_millis(10)),
    };
    let report = accel_burst_node::Node::new(&clock, &mut config, &mut link, &mut sink, &mut sensor, &mut status)
        .with_options(options)
        .run_cycle();

    assert_eq!(report.outcome, CycleOutcome::Sleep { seconds: 30 });
    assert!(report.publish.unwrap().all_delivered());
    assert_eq!(
        status.events,
        vec![StatusEvent::Measuring, StatusEvent::Success, StatusEvent::Idle]
    );

    let mut assembler = RunAssembler::new();
    for record in CaptureReader::open(&capture).unwrap() {
        let record = record.unwrap();
        assert_eq!(record.topic, "sensor/burst");
        assembler.push(PublishMessage::decode(&record.payload).unwrap());
    }
    let (runs, incomplete) = assembler.finish();
    assert!(incomplete.is_empty());
    assert_eq!(runs.len(), 1);

    let run = &runs[0];
    assert!(run.meta.id.starts_with("node-it-"));
    assert_eq!(run.meta.address, "127.0.0.1");
    assert!(run.meta.time_valid);
    assert_eq!(run.meta.sample_count, 16);
    assert_eq!(run.burst.len(), 16);
    assert!(run.burst.accel_z_mg().iter().all(|&z| z == 1000));
}

#[test]
fn sensor_at_wrong_address_restarts_with_sensor_code() {
    let mut config = NodeConfig::default();
    config.wifi.ssid = "lab".into();
    config.mqtt.host = "127.0.0.1".into();
    config.apply_override("sensor.i2c_addr", "0x19").unwrap();

    let clock = SystemClock::new();
    let mut link = HostConnectivity::new();
    let mut sink = MemorySink::new();
    let mut sensor = SimulatedAccelerometer::new(0x18, SignalModel::default(), 3);
    let mut status = RecordingStatus::default();

    let options = NodeOptions {
        fault_window: Duration::from_millis(10),
        publish_timing: PublishTiming::immediate(),
    };
    let report = accel_burst_node::Node::new(&clock, &mut config, &mut link, &mut sink, &mut sensor, &mut status)
        .with_options(options)
        .run_cycle();

    match report.outcome {
        CycleOutcome::Restart { category } => assert_eq!(category.code(), 4),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(sink.messages.is_empty());

    // The same device answers once addressed correctly.
    let mut sensor = SimulatedAccelerometer::new(0x18, SignalModel::default(), 3);
    sensor.begin(&SensorSettings::new(0x18, 24, 1000)).unwrap();
    assert!((sensor.read().unwrap().z - 9.80665).abs() < 0.05);
}
