use crate::advertisement::{MacAddress, RawAdvertisement};
use crate::beacon::{APPLE_MANUFACTURER_ID, BeaconFamily, IBEACON_PREFIX, RAPT_MANUFACTURER_ID, TiltColor};
use crate::output::{PublishError, Publisher};
use crate::reading::CalibratedReading;
use crate::scanner::{ScanError, ScanFuture, Scanner};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Apple manufacturer data (company id stripped) for an iBeacon frame.
pub fn ibeacon_payload(uuid: Uuid, major: u16, minor: u16, tx_power: i8) -> Vec<u8> {
    let mut data = IBEACON_PREFIX.to_vec();
    data.extend_from_slice(uuid.as_bytes());
    data.extend_from_slice(&major.to_be_bytes());
    data.extend_from_slice(&minor.to_be_bytes());
    data.push(tx_power as u8);
    data
}

/// RAPT V2 manufacturer data (company id stripped) with no gravity velocity.
pub fn rapt_v2_payload(gravity_points: f32, temperature_k128: u16, battery_raw: u16) -> Vec<u8> {
    let mut data = b"PT".to_vec();
    data.push(0x02); // version
    data.push(0x00); // pad
    data.push(0x00); // velocity not valid
    data.extend_from_slice(&0f32.to_be_bytes());
    data.extend_from_slice(&temperature_k128.to_be_bytes());
    data.extend_from_slice(&gravity_points.to_be_bytes());
    data.extend_from_slice(&[0; 6]); // accelerometer
    data.extend_from_slice(&battery_raw.to_be_bytes());
    data
}

/// A Tilt advertisement with tx power -59 dBm.
pub fn tilt_advert(color: TiltColor, fahrenheit: u16, gravity_thousandths: u16) -> RawAdvertisement {
    RawAdvertisement::with_manufacturer_data(
        TEST_MAC,
        APPLE_MANUFACTURER_ID,
        ibeacon_payload(color.uuid(), fahrenheit, gravity_thousandths, -59),
    )
}

pub fn pill_advert(gravity_points: f32, temperature_k128: u16, battery_raw: u16) -> RawAdvertisement {
    RawAdvertisement::with_manufacturer_data(
        TEST_MAC,
        RAPT_MANUFACTURER_ID,
        rapt_v2_payload(gravity_points, temperature_k128, battery_raw),
    )
}

/// Build a `CalibratedReading` with no offsets and all optional fields set to `None`.
///
/// Tests can override just the fields they care about.
pub fn base_reading(family: BeaconFamily, specific_gravity: f64, temperature_celsius: f64) -> CalibratedReading {
    CalibratedReading {
        family,
        address: TEST_MAC,
        timestamp: SystemTime::UNIX_EPOCH,
        temperature_celsius,
        specific_gravity,
        raw_temperature_celsius: temperature_celsius,
        raw_specific_gravity: specific_gravity,
        battery: None,
        tx_power: None,
        rssi: None,
        gravity_velocity: None,
    }
}

/// Scanner that replays scripted listen windows.
///
/// Each `start_scan` takes the next window: `None` fails like an unavailable
/// radio, `Some(adverts)` delivers them. Once the script runs out, windows
/// are empty.
pub struct FakeScanner {
    windows: Mutex<VecDeque<Option<Vec<RawAdvertisement>>>>,
    hold_open: bool,
    starts: AtomicUsize,
}

impl FakeScanner {
    pub fn new(windows: Vec<Option<Vec<RawAdvertisement>>>) -> Self {
        Self {
            windows: Mutex::new(windows.into()),
            hold_open: false,
            starts: AtomicUsize::new(0),
        }
    }

    /// Keep each window open after its adverts until the receiver closes,
    /// like a real radio.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Scanner for FakeScanner {
    fn start_scan(&self) -> ScanFuture<'_> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let window = self
            .windows
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Some(Vec::new()));
        let hold_open = self.hold_open;

        Box::pin(async move {
            let adverts =
                window.ok_or_else(|| ScanError::Bluetooth("No default adapter".to_string()))?;
            let (tx, rx) = mpsc::channel(adverts.len().max(1));
            tokio::spawn(async move {
                for adv in adverts {
                    if tx.send(adv).await.is_err() {
                        return;
                    }
                }
                if hold_open {
                    tx.closed().await;
                }
            });
            Ok(rx)
        })
    }
}

/// Publisher that records every message, optionally rejecting one topic.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, String)>>,
    failing_topic: Option<String>,
}

impl RecordingPublisher {
    pub fn failing_on(topic: &str) -> Self {
        Self {
            failing_topic: Some(topic.to_string()),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if self.failing_topic.as_deref() == Some(topic) {
            return Err(PublishError::Bus("broker unreachable".to_string()));
        }
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}
