//! Tilt iBeacon decoding.
//!
//! After the `0x02 0x15` prefix and the colour UUID, a Tilt puts temperature
//! in the iBeacon major field and gravity in the minor field (both
//! big-endian), followed by a signed transmit power byte.

use super::{DecodeError, RawGravity, RawMeasurement, RawTemperature, ensure_len};
use crate::beacon::{BeaconFamily, IBEACON_UUID_END, TiltColor};

/// Prefix, UUID, major, minor and tx power.
pub const FRAME_LEN: usize = IBEACON_UUID_END + 5;

/// Minor values above this come from a Tilt Pro, which reports tenths of a
/// degree and SG × 10000.
const HIGH_RESOLUTION_MINOR: u16 = 5000;

/// Decode the iBeacon manufacturer data of a Tilt of the given colour.
pub fn decode(color: TiltColor, data: &[u8]) -> Result<RawMeasurement, DecodeError> {
    ensure_len(data, FRAME_LEN)?;

    let major = u16::from_be_bytes([data[18], data[19]]);
    let minor = u16::from_be_bytes([data[20], data[21]]);
    let tx_power = data[22] as i8;

    let (temperature, gravity) = if minor > HIGH_RESOLUTION_MINOR {
        (f64::from(major) / 10.0, RawGravity::TenThousandths(minor))
    } else {
        (f64::from(major), RawGravity::Thousandths(minor))
    };

    Ok(RawMeasurement {
        family: BeaconFamily::Tilt(color),
        temperature: RawTemperature::Fahrenheit(temperature),
        gravity,
        battery: None,
        tx_power: Some(tx_power),
        gravity_velocity: None,
    })
}
