//! Calibrated hydrometer reading.

use crate::advertisement::MacAddress;
use crate::beacon::BeaconFamily;
use std::time::SystemTime;

/// A reading ready to publish.
///
/// Temperature is in Celsius and gravity is specific gravity, both before
/// (`raw_*`) and after calibration, so consumers can apply their own
/// correction to the raw values.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedReading {
    /// Identity the reading is published under
    pub family: BeaconFamily,
    /// Address of the advertisement the reading came from
    pub address: MacAddress,
    /// Time the advertisement was received
    pub timestamp: SystemTime,
    /// Calibrated temperature in Celsius
    pub temperature_celsius: f64,
    /// Calibrated specific gravity
    pub specific_gravity: f64,
    /// Uncalibrated temperature in Celsius
    pub raw_temperature_celsius: f64,
    /// Uncalibrated specific gravity
    pub raw_specific_gravity: f64,
    /// Battery charge in percent
    pub battery: Option<f64>,
    /// Transmit power in dBm
    pub tx_power: Option<i8>,
    /// Received signal strength in dBm
    pub rssi: Option<i16>,
    /// Gravity change in points per day
    pub gravity_velocity: Option<f32>,
}
