//! Error types for the burst node

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;
use crate::status::FaultCategory;

/// Error type for burst node operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// Required configuration field is empty or absent
    #[error("Missing required configuration field: {0}")]
    MissingField(&'static str),

    /// Configuration value could not be interpreted
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    /// Configuration file could not be read or written
    #[error("Configuration file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Network link could not be established
    #[error("Link error: {0}")]
    Link(String),

    /// Wall clock could not be synchronised
    #[error("Time sync error: {0}")]
    TimeSync(String),

    /// Message transport could not be opened
    #[error("Transport error: {0}")]
    Transport(String),

    /// Sensor initialization or hard read failure
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Acquisition needs at least one inter-sample interval
    #[error("Burst needs at least 2 samples, got {0}")]
    TooFewSamples(u16),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Wire payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Capture file is malformed or unreadable
    #[error("Capture file error: {0}")]
    Capture(String),

    /// A single message failed to publish
    #[error("Delivery of {kind} message to {topic} failed")]
    Delivery { kind: String, topic: String },
}

impl NodeError {
    /// Status code category for errors that abort a run.
    ///
    /// Delivery failures are tolerated mid-run and have no category.
    pub fn fault_category(&self) -> Option<FaultCategory> {
        match self {
            NodeError::MissingField(_)
            | NodeError::InvalidConfig { .. }
            | NodeError::ConfigIo { .. }
            | NodeError::ConfigParse(_) => Some(FaultCategory::Configuration),
            NodeError::Link(_) => Some(FaultCategory::Link),
            NodeError::TimeSync(_) => Some(FaultCategory::TimeSync),
            NodeError::Transport(_) => Some(FaultCategory::Transport),
            NodeError::Sensor(_) | NodeError::TooFewSamples(_) | NodeError::InvalidParameter(_) => {
                Some(FaultCategory::Sensor)
            }
            NodeError::Codec(_) | NodeError::Capture(_) => Some(FaultCategory::Configuration),
            NodeError::Delivery { .. } => None,
        }
    }
}

/// Result type for burst node operations
pub type Result<T> = std::result::Result<T, NodeError>;
