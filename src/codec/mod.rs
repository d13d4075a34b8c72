//! Payload decoding for the supported hydrometer families.
//!
//! Decoders are pure: the same bytes always produce the same
//! [`RawMeasurement`]. Values are kept in the units each device transmits;
//! [`crate::calibration`] turns them into °C and specific gravity.

pub mod rapt;
pub mod tilt;

use crate::advertisement::RawAdvertisement;
use crate::beacon::{self, APPLE_MANUFACTURER_ID, BeaconFamily, RAPT_MANUFACTURER_ID};
use thiserror::Error;

/// Error types for decoding hydrometer payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is shorter than the format requires
    #[error("Payload too short: {len} bytes, expected at least {expected}")]
    TooShort { len: usize, expected: usize },
    /// A frame version or message type we do not decode
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Structurally invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub(crate) fn ensure_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            len: data.len(),
            expected,
        });
    }
    Ok(())
}

/// Temperature as transmitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawTemperature {
    /// Degrees Fahrenheit (Tilt; tenths already applied for Tilt Pro)
    Fahrenheit(f64),
    /// Kelvin multiplied by 128 (RAPT)
    Kelvin128(u16),
}

/// Specific gravity as transmitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawGravity {
    /// SG × 1000 (Tilt)
    Thousandths(u16),
    /// SG × 10000 (Tilt Pro)
    TenThousandths(u16),
    /// Gravity points, SG × 1000 as a float (RAPT)
    Points(f32),
}

/// A decoded, uncalibrated measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMeasurement {
    pub family: BeaconFamily,
    pub temperature: RawTemperature,
    pub gravity: RawGravity,
    /// Battery charge in percent (RAPT)
    pub battery: Option<f64>,
    /// Transmit power in dBm (Tilt), the only battery proxy a Tilt sends
    pub tx_power: Option<i8>,
    /// Gravity change in points per day (RAPT, when the Pill reports it valid)
    pub gravity_velocity: Option<f32>,
}

/// What an advertisement turned out to contain.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Measurement(RawMeasurement),
    /// Device metadata (RAPT device type or firmware version); no reading.
    Announcement(String),
    /// Not from a hydrometer we know.
    Unrecognized,
}

/// Classify and decode a single advertisement.
///
/// Unknown beacons are `Ok(Decoded::Unrecognized)`, never an error; only a
/// recognised family with a bad payload yields `Err`.
pub fn decode_advertisement(adv: &RawAdvertisement) -> Result<Decoded, DecodeError> {
    match beacon::classify(adv) {
        Some(BeaconFamily::RaptPill) => {
            let data = adv.manufacturer(RAPT_MANUFACTURER_ID).unwrap_or_default();
            Ok(match rapt::decode(data)? {
                rapt::Frame::Measurement(m) => Decoded::Measurement(m),
                rapt::Frame::DeviceType(name) => Decoded::Announcement(format!("device type {name}")),
            })
        }
        Some(BeaconFamily::Tilt(color)) => {
            let data = adv.manufacturer(APPLE_MANUFACTURER_ID).unwrap_or_default();
            tilt::decode(color, data).map(Decoded::Measurement)
        }
        None => Ok(rapt::firmware_announcement(adv)
            .map(|version| Decoded::Announcement(format!("firmware {version}")))
            .unwrap_or(Decoded::Unrecognized)),
    }
}
