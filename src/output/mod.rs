//! Publishing calibrated readings to a message bus.
//!
//! A [`Publisher`] takes a topic and an already-serialized payload. Topic
//! layout and payload format live here so every publisher agrees on them.

pub mod json;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod stdout;

use crate::beacon::BeaconFamily;
use thiserror::Error;

/// Error type for publish operations.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The bus rejected the message or could not be reached
    #[error("Bus error: {0}")]
    Bus(String),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Destination for finished readings.
///
/// Publishing is fire-and-forget: an implementation must not block waiting
/// for the bus, and a failure only concerns the one message.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

/// Available publishers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputKind {
    /// Publish to an MQTT broker
    #[cfg(feature = "mqtt")]
    Mqtt,
    /// Print `<topic> <payload>` lines to stdout
    Stdout,
}

impl Default for OutputKind {
    fn default() -> Self {
        #[cfg(feature = "mqtt")]
        return OutputKind::Mqtt;
        #[cfg(not(feature = "mqtt"))]
        return OutputKind::Stdout;
    }
}

/// Topic a reading for `identity` is published under.
///
/// Pills cannot be told apart, so they all share the configured `pill_name`.
pub fn topic(identity: BeaconFamily, pill_name: &str) -> String {
    match identity {
        BeaconFamily::RaptPill => format!("rapt/pill/{pill_name}"),
        BeaconFamily::Tilt(color) => format!("tilt/{color}"),
    }
}
