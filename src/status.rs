//! Operator-visible status signalling
//!
//! The node has a single RGB indicator. Each lifecycle event maps to a
//! [`BlinkPattern`]; fault categories are told apart by the number of red
//! blinks.

use std::fmt;
use std::time::Duration;

/// Category of a fault that aborts the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCategory {
    Link,
    TimeSync,
    Transport,
    Sensor,
    Configuration,
}

impl FaultCategory {
    /// Numeric status code, also the number of red blinks
    pub fn code(&self) -> u8 {
        match self {
            FaultCategory::Link => 1,
            FaultCategory::TimeSync => 2,
            FaultCategory::Transport => 3,
            FaultCategory::Sensor => 4,
            FaultCategory::Configuration => 5,
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultCategory::Link => "link",
            FaultCategory::TimeSync => "time sync",
            FaultCategory::Transport => "transport",
            FaultCategory::Sensor => "sensor",
            FaultCategory::Configuration => "configuration",
        };
        write!(f, "{} (code {})", name, self.code())
    }
}

/// Indicator colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Off,
    Red,
    Green,
    Yellow,
    Purple,
}

/// How an event is rendered on the indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub color: Color,
    /// Blinks per burst of the pattern; 0 means held solid
    pub count: u8,
    pub on: Duration,
    pub off: Duration,
    /// Gap before the burst repeats, if it repeats
    pub repeat_every: Option<Duration>,
}

impl BlinkPattern {
    const fn blinks(color: Color, count: u8, on_ms: u64, off_ms: u64) -> Self {
        Self {
            color,
            count,
            on: Duration::from_millis(on_ms),
            off: Duration::from_millis(off_ms),
            repeat_every: None,
        }
    }

    const fn solid(color: Color) -> Self {
        Self::blinks(color, 0, 0, 0)
    }

    /// Time taken by one burst of blinks
    pub fn burst_duration(&self) -> Duration {
        (self.on + self.off) * u32::from(self.count)
    }
}

/// Fault signal: red blinks every 3 s
pub const FAULT_REPEAT: Duration = Duration::from_secs(3);

/// How long a fault is signalled before the node restarts
pub const FAULT_WINDOW: Duration = Duration::from_secs(15);

/// Lifecycle event shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Burst acquisition in progress
    Measuring,
    /// Burst passed the energy gate and is about to be published
    Success,
    /// Burst suppressed by the energy gate
    BelowThreshold,
    /// Waiting for provisioning input
    Provisioning,
    /// Run aborted
    Fault(FaultCategory),
    /// Indicator off before suspend
    Idle,
}

impl StatusEvent {
    pub fn pattern(&self) -> BlinkPattern {
        match self {
            StatusEvent::Measuring => BlinkPattern::solid(Color::Green),
            StatusEvent::Success => BlinkPattern::blinks(Color::Green, 5, 350, 350),
            StatusEvent::BelowThreshold => BlinkPattern::blinks(Color::Yellow, 3, 400, 400),
            StatusEvent::Provisioning => BlinkPattern {
                repeat_every: Some(Duration::ZERO),
                ..BlinkPattern::blinks(Color::Purple, 1, 250, 250)
            },
            StatusEvent::Fault(category) => BlinkPattern {
                repeat_every: Some(FAULT_REPEAT),
                ..BlinkPattern::blinks(Color::Red, category.code(), 200, 200)
            },
            StatusEvent::Idle => BlinkPattern::solid(Color::Off),
        }
    }
}

/// Sink for lifecycle events
pub trait StatusSink {
    fn emit(&mut self, event: StatusEvent);
}

/// Renders status events as log records
#[derive(Debug, Default)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn emit(&mut self, event: StatusEvent) {
        let pattern = event.pattern();
        match event {
            StatusEvent::Fault(category) => {
                tracing::error!(code = category.code(), color = ?pattern.color, "fault: {}", category)
            }
            _ => tracing::info!(?event, color = ?pattern.color, blinks = pattern.count, "status"),
        }
    }
}

/// Keeps every emitted event, for tests
#[derive(Debug, Default)]
pub struct RecordingStatus {
    pub events: Vec<StatusEvent>,
}

impl StatusSink for RecordingStatus {
    fn emit(&mut self, event: StatusEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes() {
        let codes: Vec<u8> = [
            FaultCategory::Link,
            FaultCategory::TimeSync,
            FaultCategory::Transport,
            FaultCategory::Sensor,
            FaultCategory::Configuration,
        ]
        .iter()
        .map(|c| c.code())
        .collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_fault_pattern_blinks_code_times() {
        let p = StatusEvent::Fault(FaultCategory::Transport).pattern();
        assert_eq!(p.color, Color::Red);
        assert_eq!(p.count, 3);
        assert_eq!(p.on, Duration::from_millis(200));
        assert_eq!(p.repeat_every, Some(FAULT_REPEAT));
        assert_eq!(p.burst_duration(), Duration::from_millis(1200));
    }

    #[test]
    fn test_outcome_patterns() {
        assert_eq!(StatusEvent::Success.pattern().count, 5);
        assert_eq!(StatusEvent::Success.pattern().color, Color::Green);
        assert_eq!(StatusEvent::BelowThreshold.pattern().count, 3);
        assert_eq!(StatusEvent::BelowThreshold.pattern().color, Color::Yellow);
        assert_eq!(StatusEvent::Measuring.pattern().count, 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(FaultCategory::Sensor.to_string(), "sensor (code 4)");
    }
}
