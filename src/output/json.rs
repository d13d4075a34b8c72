//! JSON payload for a calibrated reading.
//!
//! Field names are stable; home-automation templates bind to them. Values
//! are strings with fixed precision, matching what existing consumers parse.

use crate::calibration::{fahrenheit, plato};
use crate::reading::CalibratedReading;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Payload {
    pub specific_gravity: String,
    pub specific_gravity_uncali: String,
    pub plato: String,
    pub temperature_celsius: String,
    pub temperature_celsius_uncali: String,
    pub temperature_fahrenheit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_gravity_pts_per_day: Option<String>,
    pub timestamp: String,
}

impl From<&CalibratedReading> for Payload {
    fn from(r: &CalibratedReading) -> Self {
        Payload {
            specific_gravity: format!("{:.4}", r.specific_gravity),
            specific_gravity_uncali: format!("{:.4}", r.raw_specific_gravity),
            plato: format!("{:.2}", plato(r.specific_gravity)),
            temperature_celsius: format!("{:.2}", r.temperature_celsius),
            temperature_celsius_uncali: format!("{:.2}", r.raw_temperature_celsius),
            temperature_fahrenheit: format!("{:.1}", fahrenheit(r.temperature_celsius)),
            battery: r.battery.map(|b| format!("{b:.1}")),
            tx_power: r.tx_power.map(|p| p.to_string()),
            rssi: r.rssi.map(|rssi| rssi.to_string()),
            specific_gravity_pts_per_day: r.gravity_velocity.map(|v| format!("{v:.1}")),
            timestamp: DateTime::<Utc>::from(r.timestamp).to_rfc3339(),
        }
    }
}

/// Serialize a reading to its JSON payload.
pub fn to_json(reading: &CalibratedReading) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Payload::from(reading))
}
