//! Sensor telemetry published to the cloud broker.
//!
//! Readings come either from a UART device that prints tag-prefixed packets
//! or from a fake temperature generator. Each reading becomes one
//! [`TelemetryMessage`] published as JSON.

pub mod fake;
pub mod packet;
pub mod publisher;
pub mod uart;

pub use fake::FakeTemperature;
pub use packet::Packet;
pub use publisher::{PublishStats, TelemetryPublisher};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::transport;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] transport::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("packet: {0}")]
    Packet(#[from] packet::Error),

    #[error("packet has no device id")]
    MissingDeviceId,
}

/// What goes on the wire: `{"Device_ID": ..., "Data": {...}}`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    #[serde(rename = "Device_ID")]
    pub device_id: Value,
    #[serde(rename = "Data")]
    pub data: Map<String, Value>,
}

impl TelemetryMessage {
    /// Moves the packet's device id out of its fields; the rest becomes data.
    pub fn from_packet(packet: &Packet) -> Result<TelemetryMessage, Error> {
        let Value::Object(mut data) = serde_json::to_value(packet)? else {
            return Err(Error::MissingDeviceId);
        };
        let device_id = data.remove("Device_ID").ok_or(Error::MissingDeviceId)?;
        Ok(TelemetryMessage { device_id, data })
    }

    pub fn temperature(device_id: &str, value: f64) -> TelemetryMessage {
        let mut data = Map::new();
        data.insert("Temperature".to_string(), Value::from(value));
        TelemetryMessage {
            device_id: Value::from(device_id),
            data,
        }
    }
}

/// Name of this host, used as device id for fake readings.
pub fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
