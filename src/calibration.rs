//! Per-identity calibration offsets.
//!
//! Offsets are expressed in final units (°C and specific gravity) and are
//! added after the raw values have been normalized, whatever the source
//! encoding was.

use crate::advertisement::RawAdvertisement;
use crate::beacon::BeaconFamily;
use crate::codec::{RawGravity, RawMeasurement, RawTemperature};
use crate::reading::CalibratedReading;
use std::collections::BTreeMap;

/// Additive corrections for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationEntry {
    pub gravity_offset: f64,
    pub temperature_offset: f64,
}

/// A parsed `--calibrate` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationArg {
    pub identity: BeaconFamily,
    pub entry: CalibrationEntry,
}

/// Parse a calibration in the format `IDENTITY=GRAVITY_OFFSET,TEMPERATURE_OFFSET`.
///
/// # Example
/// ```
/// use hydrometer_listener::calibration::parse_calibration;
///
/// let arg = parse_calibration("red=0.002,-0.5").unwrap();
/// assert_eq!(arg.entry.gravity_offset, 0.002);
/// assert_eq!(arg.entry.temperature_offset, -0.5);
/// ```
pub fn parse_calibration(src: &str) -> Result<CalibrationArg, String> {
    let (identity, offsets) = src
        .split_once('=')
        .ok_or("invalid calibration: expected IDENTITY=GRAVITY,TEMPERATURE")?;
    let (gravity, temperature) = offsets
        .split_once(',')
        .ok_or("invalid calibration: expected GRAVITY,TEMPERATURE offsets")?;

    let offset = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid calibration offset: {value}"))
    };

    Ok(CalibrationArg {
        identity: identity.parse()?,
        entry: CalibrationEntry {
            gravity_offset: offset(gravity)?,
            temperature_offset: offset(temperature)?,
        },
    })
}

/// Raw temperature in Celsius.
pub fn celsius(raw: RawTemperature) -> f64 {
    match raw {
        RawTemperature::Fahrenheit(f) => (f - 32.0) * 5.0 / 9.0,
        RawTemperature::Kelvin128(k) => f64::from(k) / 128.0 - 273.15,
    }
}

/// Raw gravity as specific gravity.
pub fn specific_gravity(raw: RawGravity) -> f64 {
    match raw {
        RawGravity::Thousandths(sg) => f64::from(sg) / 1000.0,
        RawGravity::TenThousandths(sg) => f64::from(sg) / 10000.0,
        RawGravity::Points(points) => f64::from(points) / 1000.0,
    }
}

pub fn fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Degrees Plato from specific gravity (cubic approximation).
pub fn plato(sg: f64) -> f64 {
    135.997 * sg.powi(3) - 630.272 * sg.powi(2) + 1111.14 * sg - 616.868
}

/// Calibration offsets for every configured identity.
///
/// Identities without an entry pass through uncalibrated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    entries: BTreeMap<BeaconFamily, CalibrationEntry>,
}

impl Calibration {
    /// Build from parsed arguments; a later entry for the same identity wins.
    pub fn from_args(args: &[CalibrationArg]) -> Self {
        Self {
            entries: args.iter().map(|a| (a.identity, a.entry)).collect(),
        }
    }

    pub fn entry(&self, identity: BeaconFamily) -> CalibrationEntry {
        self.entries.get(&identity).copied().unwrap_or_default()
    }

    pub fn is_calibrated(&self, identity: BeaconFamily) -> bool {
        self.entries.contains_key(&identity)
    }

    /// Normalize a raw measurement and apply its identity's offsets.
    pub fn calibrate(&self, raw: &RawMeasurement, seen: &RawAdvertisement) -> CalibratedReading {
        let entry = self.entry(raw.family);
        let raw_temperature_celsius = celsius(raw.temperature);
        let raw_specific_gravity = specific_gravity(raw.gravity);

        CalibratedReading {
            family: raw.family,
            address: seen.address,
            timestamp: seen.received_at,
            temperature_celsius: raw_temperature_celsius + entry.temperature_offset,
            specific_gravity: raw_specific_gravity + entry.gravity_offset,
            raw_temperature_celsius,
            raw_specific_gravity,
            battery: raw.battery,
            tx_power: raw.tx_power,
            rssi: seen.rssi,
            gravity_velocity: raw.gravity_velocity,
        }
    }
}
