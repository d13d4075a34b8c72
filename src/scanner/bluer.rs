//! BlueZ D-Bus backend.
//!
//! Registers an advertisement monitor matching the RAPT and Apple company
//! ids, so BlueZ only wakes us for candidate hydrometers. Requires the
//! `bluetoothd` daemon to be running.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::RawAdvertisement;
use crate::beacon::{APPLE_MANUFACTURER_ID, RAPT_MANUFACTURER_ID};
use crate::codec::rapt::FIRMWARE_MANUFACTURER_ID;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use std::time::SystemTime;
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Monitor pattern matching a company id at the start of manufacturer data.
fn company_pattern(company_id: u16) -> Pattern {
    Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: company_id.to_le_bytes().to_vec(),
    }
}

/// Open a listen window on the default adapter.
///
/// The window stays open until the returned receiver is closed or dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let patterns = [
        RAPT_MANUFACTURER_ID,
        FIRMWARE_MANUFACTURER_ID,
        APPLE_MANUFACTURER_ID,
    ]
    .into_iter()
    .map(company_pattern)
    .collect();

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(patterns),
            ..Default::default()
        })
        .await?;

    tokio::spawn(async move {
        // Dropping these at the end of the window unregisters the monitor
        let _session = session;
        let _monitor_manager = monitor_manager;

        loop {
            let event = tokio::select! {
                _ = tx.closed() => break,
                event = monitor_handle.next() => event,
            };
            let Some(event) = event else { break };

            if let MonitorEvent::DeviceFound(device_id) = event {
                match read_advertisement(&adapter, device_id.device).await {
                    Ok(Some(adv)) => {
                        if tx.send(adv).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::debug!(%err, address = %device_id.device, "failed to read device properties");
                    }
                }
            }
        }
        tracing::debug!("bluer scan window closed");
    });

    Ok(rx)
}

/// Snapshot the advertised properties of a discovered device.
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<RawAdvertisement>, ScanError> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(None);
    };

    let service_uuids = device
        .uuids()
        .await?
        .map(|uuids| uuids.into_iter().collect())
        .unwrap_or_default();

    Ok(Some(RawAdvertisement {
        address: address.into(),
        rssi: device.rssi().await?,
        manufacturer_data: manufacturer_data.into_iter().collect(),
        service_uuids,
        received_at: SystemTime::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::MacAddress;

    #[test]
    fn test_company_pattern_is_little_endian() {
        let pattern = company_pattern(RAPT_MANUFACTURER_ID);
        assert_eq!(pattern.content, vec![0x52, 0x41]);
        assert_eq!(pattern.data_type, MANUFACTURER_DATA_TYPE);

        let pattern = company_pattern(APPLE_MANUFACTURER_ID);
        assert_eq!(pattern.content, vec![0x4C, 0x00]);
    }

    #[test]
    fn test_address_to_mac_address() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac, MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }
}
