//! Beacon family classification.
//!
//! A RAPT Pill announces itself with its own manufacturer id. A Tilt is an
//! iBeacon under Apple's company id whose proximity UUID encodes the colour.

use crate::advertisement::RawAdvertisement;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Company id carried by RAPT Pill data frames ("RA" little-endian).
pub const RAPT_MANUFACTURER_ID: u16 = 0x4152;

/// Apple's company id, used by every iBeacon.
pub const APPLE_MANUFACTURER_ID: u16 = 0x004C;

/// iBeacon sub-type and length bytes that prefix the UUID.
pub const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];

/// "PT" plus the version byte.
pub(crate) const RAPT_HEADER_LEN: usize = 3;

/// iBeacon prefix plus the 16-byte proximity UUID.
pub(crate) const IBEACON_UUID_END: usize = 18;

/// The fixed set of Tilt colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TiltColor {
    Red,
    Green,
    Black,
    Purple,
    Orange,
    Blue,
    Yellow,
    Pink,
}

impl TiltColor {
    pub const ALL: [TiltColor; 8] = [
        TiltColor::Red,
        TiltColor::Green,
        TiltColor::Black,
        TiltColor::Purple,
        TiltColor::Orange,
        TiltColor::Blue,
        TiltColor::Yellow,
        TiltColor::Pink,
    ];

    /// Proximity UUID broadcast by a Tilt of this colour.
    ///
    /// All Tilts share `A495BBx0-C5B1-4B44-B512-1370F02D74DE`, where `x` runs
    /// from 1 (Red) to 8 (Pink).
    pub const fn uuid(self) -> Uuid {
        let nibble: u128 = match self {
            TiltColor::Red => 1,
            TiltColor::Green => 2,
            TiltColor::Black => 3,
            TiltColor::Purple => 4,
            TiltColor::Orange => 5,
            TiltColor::Blue => 6,
            TiltColor::Yellow => 7,
            TiltColor::Pink => 8,
        };
        Uuid::from_u128(0xA495_BB00_C5B1_4B44_B512_1370_F02D_74DE | (nibble << 100))
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|color| color.uuid() == *uuid)
    }

    pub fn name(self) -> &'static str {
        match self {
            TiltColor::Red => "Red",
            TiltColor::Green => "Green",
            TiltColor::Black => "Black",
            TiltColor::Purple => "Purple",
            TiltColor::Orange => "Orange",
            TiltColor::Blue => "Blue",
            TiltColor::Yellow => "Yellow",
            TiltColor::Pink => "Pink",
        }
    }
}

impl fmt::Display for TiltColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which kind of hydrometer produced an advertisement.
///
/// This is also the identity readings are keyed by: two Pills, or two Tilts
/// of the same colour, are indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BeaconFamily {
    RaptPill,
    Tilt(TiltColor),
}

impl fmt::Display for BeaconFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeaconFamily::RaptPill => f.write_str("RAPT Pill"),
            BeaconFamily::Tilt(color) => write!(f, "Tilt {color}"),
        }
    }
}

impl FromStr for BeaconFamily {
    type Err = String;

    /// Accepts `pill`/`rapt` or a Tilt colour name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.eq_ignore_ascii_case("pill") || name.eq_ignore_ascii_case("rapt") {
            return Ok(BeaconFamily::RaptPill);
        }
        TiltColor::ALL
            .into_iter()
            .find(|color| color.name().eq_ignore_ascii_case(name))
            .map(BeaconFamily::Tilt)
            .ok_or_else(|| format!("unknown hydrometer identity: {s}"))
    }
}

/// Classify an advertisement, or `None` if it is not from a known hydrometer.
///
/// RAPT is checked first, so an advertisement carrying both fields is a Pill.
/// Payloads too short to carry their family's header are never classified.
pub fn classify(adv: &RawAdvertisement) -> Option<BeaconFamily> {
    if let Some(data) = adv.manufacturer(RAPT_MANUFACTURER_ID)
        && data.len() >= RAPT_HEADER_LEN
    {
        return Some(BeaconFamily::RaptPill);
    }

    let data = adv.manufacturer(APPLE_MANUFACTURER_ID)?;
    if data.len() < IBEACON_UUID_END || data[..2] != IBEACON_PREFIX {
        return None;
    }
    let uuid = Uuid::from_slice(&data[2..IBEACON_UUID_END]).ok()?;
    TiltColor::from_uuid(&uuid).map(BeaconFamily::Tilt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, ibeacon_payload};

    fn apple(data: Vec<u8>) -> RawAdvertisement {
        RawAdvertisement::with_manufacturer_data(TEST_MAC, APPLE_MANUFACTURER_ID, data)
    }

    #[test]
    fn test_tilt_uuids() {
        assert_eq!(
            TiltColor::Red.uuid(),
            Uuid::parse_str("a495bb10-c5b1-4b44-b512-1370f02d74de").unwrap()
        );
        assert_eq!(
            TiltColor::Pink.uuid(),
            Uuid::parse_str("a495bb80-c5b1-4b44-b512-1370f02d74de").unwrap()
        );
    }

    #[test]
    fn test_rapt_vendor_code_always_classifies_as_pill() {
        for data in [vec![0x50, 0x54, 0x02], vec![0xFF; 3], vec![0x00; 40]] {
            let adv =
                RawAdvertisement::with_manufacturer_data(TEST_MAC, RAPT_MANUFACTURER_ID, data);
            assert_eq!(classify(&adv), Some(BeaconFamily::RaptPill));
        }
    }

    #[test]
    fn test_short_rapt_payload_is_not_classified() {
        let adv =
            RawAdvertisement::with_manufacturer_data(TEST_MAC, RAPT_MANUFACTURER_ID, vec![0x50]);
        assert_eq!(classify(&adv), None);
    }

    #[test]
    fn test_each_color_uuid_maps_to_its_color() {
        for color in TiltColor::ALL {
            let adv = apple(ibeacon_payload(color.uuid(), 68, 1050, -59));
            assert_eq!(classify(&adv), Some(BeaconFamily::Tilt(color)));
        }
    }

    #[test]
    fn test_unknown_ibeacon_uuid_is_ignored() {
        let uuid = Uuid::parse_str("020001c0-1cf3-4090-d644-781eff3a2cfe").unwrap();
        assert_eq!(classify(&apple(ibeacon_payload(uuid, 68, 1050, -59))), None);
    }

    #[test]
    fn test_non_ibeacon_apple_data_is_ignored() {
        let mut data = ibeacon_payload(TiltColor::Red.uuid(), 68, 1050, -59);
        data[0] = 0x10;
        assert_eq!(classify(&apple(data)), None);
        assert_eq!(classify(&apple(vec![0x02, 0x15, 0xA4])), None);
    }

    #[test]
    fn test_unrelated_manufacturer_is_ignored() {
        let adv = RawAdvertisement::with_manufacturer_data(TEST_MAC, 0x0499, vec![0x05; 24]);
        assert_eq!(classify(&adv), None);
    }

    #[test]
    fn test_rapt_wins_over_ibeacon() {
        let mut adv = apple(ibeacon_payload(TiltColor::Red.uuid(), 68, 1050, -59));
        adv.manufacturer_data
            .insert(RAPT_MANUFACTURER_ID, vec![0x50, 0x54, 0x02]);
        assert_eq!(classify(&adv), Some(BeaconFamily::RaptPill));
    }

    #[test]
    fn test_identity_from_str() {
        assert_eq!("pill".parse(), Ok(BeaconFamily::RaptPill));
        assert_eq!("RAPT".parse(), Ok(BeaconFamily::RaptPill));
        assert_eq!("orange".parse(), Ok(BeaconFamily::Tilt(TiltColor::Orange)));
        assert_eq!("Red".parse(), Ok(BeaconFamily::Tilt(TiltColor::Red)));
        assert!("violet".parse::<BeaconFamily>().is_err());
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(BeaconFamily::RaptPill.to_string(), "RAPT Pill");
        assert_eq!(BeaconFamily::Tilt(TiltColor::Blue).to_string(), "Tilt Blue");
    }
}
