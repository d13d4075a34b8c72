//! RAPT Pill frame decoding.
//!
//! Frames carried under company id `0x4152` start with `"PT"` and a version
//! byte. Version 2 is the measurement frame, 20 big-endian bytes:
//!
//! | offset | type | field |
//! | --- | --- | --- |
//! | 3 | u8 | pad, always 0 |
//! | 4 | u8 | gravity velocity valid flag |
//! | 5 | f32 | gravity velocity, points/day |
//! | 9 | u16 | temperature, Kelvin × 128 |
//! | 11 | f32 | gravity, points |
//! | 15 | 3 × i16 | accelerometer × 16 |
//! | 21 | u16 | battery, percent × 256 |

use super::{DecodeError, RawGravity, RawMeasurement, RawTemperature, ensure_len};
use crate::advertisement::RawAdvertisement;
use crate::beacon::{BeaconFamily, RAPT_HEADER_LEN};

const MAGIC: &[u8; 2] = b"PT";

const VERSION_V1: u8 = 0x01;
const VERSION_V2: u8 = 0x02;
const VERSION_DEVICE_TYPE: u8 = 0x64;

/// Header plus the V2 body.
pub const V2_FRAME_LEN: usize = RAPT_HEADER_LEN + 20;

/// Company id of the Pill's firmware version broadcast ("KE" little-endian).
pub const FIRMWARE_MANUFACTURER_ID: u16 = 0x454B;

/// A decoded RAPT frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Measurement(RawMeasurement),
    DeviceType(String),
}

fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn be_f32(data: &[u8], at: usize) -> f32 {
    f32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

/// Decode the manufacturer data of a `0x4152` advertisement.
///
/// `data` must not include the company id.
pub fn decode(data: &[u8]) -> Result<Frame, DecodeError> {
    ensure_len(data, RAPT_HEADER_LEN)?;
    if &data[..2] != MAGIC {
        return Err(DecodeError::InvalidData(format!(
            "RAPT frame does not start with PT: {:02x}{:02x}",
            data[0], data[1]
        )));
    }

    match data[2] {
        VERSION_V2 => decode_v2(data).map(Frame::Measurement),
        VERSION_DEVICE_TYPE => Ok(Frame::DeviceType(text(&data[RAPT_HEADER_LEN..]))),
        VERSION_V1 => Err(DecodeError::UnsupportedFormat("RAPT V1".into())),
        other => Err(DecodeError::UnsupportedFormat(format!(
            "RAPT message type {other:#04x}"
        ))),
    }
}

fn decode_v2(data: &[u8]) -> Result<RawMeasurement, DecodeError> {
    ensure_len(data, V2_FRAME_LEN)?;

    let pad = data[3];
    if pad != 0 {
        return Err(DecodeError::InvalidData(format!(
            "RAPT V2 pad byte is {pad:#04x}"
        )));
    }

    let velocity_valid = data[4] == 1;
    let velocity = be_f32(data, 5);
    if velocity_valid && !velocity.is_finite() {
        return Err(DecodeError::InvalidData(format!(
            "RAPT V2 gravity velocity is {velocity}"
        )));
    }

    let gravity = be_f32(data, 11);
    if !gravity.is_finite() {
        return Err(DecodeError::InvalidData(format!(
            "RAPT V2 gravity is {gravity}"
        )));
    }

    Ok(RawMeasurement {
        family: BeaconFamily::RaptPill,
        temperature: RawTemperature::Kelvin128(be_u16(data, 9)),
        gravity: RawGravity::Points(gravity),
        battery: Some(f64::from(be_u16(data, 21)) / 256.0),
        tx_power: None,
        gravity_velocity: velocity_valid.then_some(velocity),
    })
}

/// The firmware version a Pill broadcasts under company id `0x454B`.
pub fn firmware_announcement(adv: &RawAdvertisement) -> Option<String> {
    match adv.manufacturer(FIRMWARE_MANUFACTURER_ID)? {
        [b'G', version @ ..] => Some(text(version)),
        _ => None,
    }
}
