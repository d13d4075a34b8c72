//! Raw BLE advertisement events as delivered by a scanner backend.
//!
//! Both backends reduce whatever their transport hands them to a
//! [`RawAdvertisement`]: the sender address, signal strength, the
//! manufacturer data split per company id, and any 128-bit service UUIDs.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// A Bluetooth device address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// One advertisement received during a listen window.
///
/// Manufacturer data is keyed by the 16-bit company identifier; the byte
/// vectors do not include the identifier itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAdvertisement {
    pub address: MacAddress,
    pub rssi: Option<i16>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_uuids: Vec<Uuid>,
    pub received_at: SystemTime,
}

impl RawAdvertisement {
    /// An advertisement carrying a single manufacturer data field.
    pub fn with_manufacturer_data(address: MacAddress, company_id: u16, data: Vec<u8>) -> Self {
        Self {
            address,
            rssi: None,
            manufacturer_data: HashMap::from([(company_id, data)]),
            service_uuids: Vec::new(),
            received_at: SystemTime::now(),
        }
    }

    pub fn manufacturer(&self, company_id: u16) -> Option<&[u8]> {
        self.manufacturer_data.get(&company_id).map(Vec::as_slice)
    }
}

/// Lowercase hex rendering of payload bytes for diagnostics.
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
