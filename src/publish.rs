//! Ordered, paced emission of a framed burst over a message sink

use std::time::Duration;

use crate::clock::ClockSource;
use crate::error::{NodeError, Result};
use crate::frame::PublishMessage;

/// Topic every burst is published to unless configured otherwise
pub const DEFAULT_TOPIC: &str = "sensor/burst";

/// Slice length used while servicing the transport during waits
pub const SERVICE_SLICE: Duration = Duration::from_millis(10);

/// Byte sink for published messages
///
/// Delivery is fire-and-forget: `publish` only reports whether the message
/// was accepted.
pub trait MessageSink {
    /// Open the transport session
    fn connect(&mut self) -> Result<()>;

    /// Hand one message to the transport
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;

    /// Let the transport make progress while the caller waits
    fn service(&mut self) {}
}

/// Pacing of the publish sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishTiming {
    /// Wait after every send before the next one
    pub settle: Duration,
    /// Wait after the last send before the node may suspend
    pub flush: Duration,
}

impl PublishTiming {
    pub fn new(settle: Duration, flush: Duration) -> Self {
        Self { settle, flush }
    }

    /// No waiting at all (tests, dry runs)
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl Default for PublishTiming {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_millis(3000))
    }
}

/// Outcome of one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub kind: &'static str,
    pub bytes: usize,
    pub delivered: bool,
}

/// Per-message outcome of a publish sequence, in send order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub records: Vec<DeliveryRecord>,
}

impl PublishReport {
    /// Success flag of every message, in send order
    pub fn flags(&self) -> Vec<bool> {
        self.records.iter().map(|r| r.delivered).collect()
    }

    pub fn delivered(&self) -> usize {
        self.records.iter().filter(|r| r.delivered).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.delivered()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed() == 0
    }
}

/// Publishes framed messages strictly in order
///
/// A failed send is recorded and the sequence moves on; nothing is retried.
pub struct PublishPipeline<'a, C: ClockSource + ?Sized> {
    clock: &'a C,
    topic: String,
    timing: PublishTiming,
}

impl<'a, C: ClockSource + ?Sized> PublishPipeline<'a, C> {
    pub fn new(clock: &'a C, topic: impl Into<String>, timing: PublishTiming) -> Self {
        Self {
            clock,
            topic: topic.into(),
            timing,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Send every message, settle after each, then hold the flush window
    pub fn publish<S: MessageSink + ?Sized>(&self, messages: Vec<PublishMessage>, sink: &mut S) -> PublishReport {
        let mut report = PublishReport {
            records: Vec::with_capacity(messages.len()),
        };

        for message in messages {
            let kind = message.type_tag();
            let payload = match message.to_bytes() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(kind, "encode failed: {}", e);
                    Vec::new()
                }
            };
            let delivered = !payload.is_empty() && sink.publish(&self.topic, &payload);
            if delivered {
                tracing::info!(kind, bytes = payload.len(), "published");
            } else {
                let err = NodeError::Delivery {
                    kind: kind.to_string(),
                    topic: self.topic.clone(),
                };
                tracing::warn!("{}", err);
            }
            report.records.push(DeliveryRecord {
                kind,
                bytes: payload.len(),
                delivered,
            });

            self.clock.pause_with(self.timing.settle, SERVICE_SLICE, &mut || sink.service());
        }

        self.clock.pause_with(self.timing.flush, SERVICE_SLICE, &mut || sink.service());
        tracing::info!(
            delivered = report.delivered(),
            failed = report.failed(),
            "publish sequence finished"
        );
        report
    }
}

/// In-process sink keeping every accepted message
///
/// Sends can be made to fail by their 1-based attempt number.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub messages: Vec<(String, Vec<u8>)>,
    pub attempts: usize,
    pub service_calls: usize,
    connected: bool,
    refuse_connect: bool,
    fail_attempts: Vec<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `attempt`-th publish call fail
    pub fn failing_on(mut self, attempt: usize) -> Self {
        self.fail_attempts.push(attempt);
        self
    }

    /// Make `connect` fail
    pub fn refusing_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl MessageSink for MemorySink {
    fn connect(&mut self) -> Result<()> {
        if self.refuse_connect {
            return Err(NodeError::Transport("broker refused connection".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        self.attempts += 1;
        if !self.connected || self.fail_attempts.contains(&self.attempts) {
            return false;
        }
        self.messages.push((topic.to_string(), payload.to_vec()));
        true
    }

    fn service(&mut self) {
        self.service_calls += 1;
    }
}
