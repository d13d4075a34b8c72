//! Raw HCI socket backend.
//!
//! Scans through a raw Linux HCI socket without the BlueZ daemon. Requires
//! CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{MacAddress, RawAdvertisement};
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::SystemTime;
use tokio::io::unix::AsyncFd;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use uuid::Uuid;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// AD types
const AD_INCOMPLETE_UUID128: u8 = 0x06;
const AD_COMPLETE_UUID128: u8 = 0x07;
const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// Max HCI event size
const EVENT_BUFFER_LEN: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
#[derive(Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn le_meta_events() -> Self {
        let mut filter = Self::default();
        filter.type_mask |= 1 << HCI_EVENT_PKT;
        let bit = EVT_LE_META_EVENT as usize;
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

fn os_error(what: &str) -> ScanError {
    ScanError::Bluetooth(format!("{what}: {}", io::Error::last_os_error()))
}

/// An HCI socket bound to one controller.
struct HciSocket(OwnedFd);

impl HciSocket {
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        // SOCK_NONBLOCK is required for AsyncFd
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let socket = Self(unsafe { OwnedFd::from_raw_fd(fd) });

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.0.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }
        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::setsockopt(
                self.0.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send_command(&self, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = command_packet(OGF_LE_CTL, ocf, params);
        let ret = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }

    fn set_scan_enabled(&self, enabled: bool) -> Result<(), ScanError> {
        // Duplicate filtering off: every advertisement in the window counts
        self.send_command(OCF_LE_SET_SCAN_ENABLE, &[u8::from(enabled), 0x00])
    }
}

/// Held for the lifetime of a listen window, so one window's scan disable
/// cannot land after the next window's enable.
static SCAN_WINDOW: Mutex<()> = Mutex::const_new(());

/// An enabled LE scan. Dropping it disables the scan, then releases the window.
struct ActiveScan {
    commands: HciSocket,
    _window: MutexGuard<'static, ()>,
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        if let Err(err) = self.commands.set_scan_enabled(false) {
            tracing::warn!(%err, "failed to disable LE scan");
        }
    }
}

fn command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = ((ogf << 10) | ocf).to_le_bytes();
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.extend_from_slice(&[HCI_COMMAND_PKT, opcode[0], opcode[1], params.len() as u8]);
    packet.extend_from_slice(params);
    packet
}

/// Passive scan, 10 ms interval and window (0.625 ms units), public address,
/// accept all advertisers.
fn scan_parameters() -> [u8; 7] {
    let interval = 0x0010u16.to_le_bytes();
    let window = 0x0010u16.to_le_bytes();
    [0x00, interval[0], interval[1], window[0], window[1], 0x00, 0x00]
}

/// Parse an LE advertising report event (starting at the packet type byte).
///
/// Reports that are cut short are skipped rather than treated as errors.
fn parse_advertising_report(packet: &[u8], received_at: SystemTime) -> Vec<RawAdvertisement> {
    let mut adverts = Vec::new();
    if packet.len() < 5
        || packet[0] != HCI_EVENT_PKT
        || packet[1] != EVT_LE_META_EVENT
        || packet[3] != EVT_LE_ADVERTISING_REPORT
    {
        return adverts;
    }

    let num_reports = packet[4] as usize;
    let mut rest = &packet[5..];

    for _ in 0..num_reports {
        // event type, address type, address (6), data length
        if rest.len() < 9 {
            break;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        addr.reverse(); // HCI uses little-endian address
        let data_len = rest[8] as usize;

        // data followed by one RSSI byte
        let Some(data) = rest.get(9..9 + data_len) else {
            break;
        };
        let Some(&rssi) = rest.get(9 + data_len) else {
            break;
        };

        let (manufacturer_data, service_uuids) = parse_ad_structures(data);
        if !manufacturer_data.is_empty() {
            adverts.push(RawAdvertisement {
                address: MacAddress(addr),
                rssi: Some(i16::from(rssi as i8)),
                manufacturer_data,
                service_uuids,
                received_at,
            });
        }

        rest = &rest[10 + data_len..];
    }

    adverts
}

fn parse_ad_structures(data: &[u8]) -> (HashMap<u16, Vec<u8>>, Vec<Uuid>) {
    let mut manufacturer_data = HashMap::new();
    let mut service_uuids = Vec::new();

    let mut offset = 0;
    while offset + 2 <= data.len() {
        let len = data[offset] as usize;
        if len == 0 || offset + 1 + len > data.len() {
            break;
        }
        let ad_type = data[offset + 1];
        let body = &data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_MANUFACTURER_DATA if body.len() >= 2 => {
                let company_id = u16::from_le_bytes([body[0], body[1]]);
                manufacturer_data.insert(company_id, body[2..].to_vec());
            }
            AD_INCOMPLETE_UUID128 | AD_COMPLETE_UUID128 => {
                for chunk in body.chunks_exact(16) {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(chunk);
                    bytes.reverse();
                    service_uuids.push(Uuid::from_bytes(bytes));
                }
            }
            _ => {}
        }

        offset += 1 + len;
    }

    (manufacturer_data, service_uuids)
}

/// Open a listen window on `hci0`.
///
/// Scanning is disabled again once the returned receiver is closed or dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    let events = HciSocket::open(0)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    let window = SCAN_WINDOW.lock().await;
    let commands = HciSocket::open(0)?;
    commands.send_command(OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters())?;
    commands.set_scan_enabled(true)?;
    // Also disables the scan if the task is dropped with the runtime
    let active = ActiveScan {
        commands,
        _window: window,
    };

    let async_fd = AsyncFd::new(events.0)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let mut buf = [0u8; EVENT_BUFFER_LEN];

        'window: loop {
            let mut guard = tokio::select! {
                _ = tx.closed() => break,
                guard = async_fd.readable() => match guard {
                    Ok(guard) => guard,
                    Err(_) => break,
                },
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) | Ok(Err(_)) => break 'window,
                    Err(_would_block) => break,
                };

                for adv in parse_advertising_report(&buf[..n], SystemTime::now()) {
                    if tx.send(adv).await.is_err() {
                        break 'window;
                    }
                }
            }
        }

        drop(active);
        tracing::debug!("hci scan window closed");
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{APPLE_MANUFACTURER_ID, TiltColor};
    use crate::test_utils::ibeacon_payload;

    fn report(addr: [u8; 6], ad: &[u8], rssi: i8) -> Vec<u8> {
        let mut r = vec![0x00, 0x00];
        let mut le_addr = addr;
        le_addr.reverse();
        r.extend_from_slice(&le_addr);
        r.push(ad.len() as u8);
        r.extend_from_slice(ad);
        r.push(rssi as u8);
        r
    }

    fn event(reports: &[Vec<u8>]) -> Vec<u8> {
        let body_len: usize = reports.iter().map(Vec::len).sum();
        let mut packet = vec![
            HCI_EVENT_PKT,
            EVT_LE_META_EVENT,
            (body_len + 2) as u8,
            EVT_LE_ADVERTISING_REPORT,
            reports.len() as u8,
        ];
        for r in reports {
            packet.extend_from_slice(r);
        }
        packet
    }

    fn manufacturer_ad(company_id: u16, data: &[u8]) -> Vec<u8> {
        let mut ad = vec![(data.len() + 3) as u8, AD_MANUFACTURER_DATA];
        ad.extend_from_slice(&company_id.to_le_bytes());
        ad.extend_from_slice(data);
        ad
    }

    #[test]
    fn test_active_scan_disables_on_drop() {
        let mut fds = [0 as c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let read_end = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write_end = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        let active = ActiveScan {
            commands: HciSocket(write_end),
            _window: SCAN_WINDOW.try_lock().unwrap(),
        };
        assert!(SCAN_WINDOW.try_lock().is_err());
        drop(active);
        assert!(SCAN_WINDOW.try_lock().is_ok());

        let mut buf = [0u8; 16];
        let n = unsafe {
            libc::read(read_end.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len())
        };
        assert_eq!(
            &buf[..n as usize],
            &command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x00, 0x00])[..]
        );
    }

    #[test]
    fn test_hci_filter_setup() {
        let filter = HciFilter::le_meta_events();
        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
    }

    #[test]
    fn test_command_packet() {
        let packet = command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);
        assert_eq!(packet, vec![0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_parse_tilt_report() {
        let payload = ibeacon_payload(TiltColor::Orange.uuid(), 68, 1050, -59);
        let mut ad = vec![0x02, 0x01, 0x06]; // flags
        ad.extend(manufacturer_ad(APPLE_MANUFACTURER_ID, &payload));
        let addr = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

        let adverts = parse_advertising_report(&event(&[report(addr, &ad, -70)]), SystemTime::now());

        assert_eq!(adverts.len(), 1);
        assert_eq!(adverts[0].address, MacAddress(addr));
        assert_eq!(adverts[0].rssi, Some(-70));
        assert_eq!(adverts[0].manufacturer(APPLE_MANUFACTURER_ID), Some(&payload[..]));
    }

    #[test]
    fn test_parse_multiple_reports_and_uuids() {
        let uuid = TiltColor::Red.uuid();
        let mut uuid_le = *uuid.as_bytes();
        uuid_le.reverse();
        let mut ad = vec![17, AD_COMPLETE_UUID128];
        ad.extend_from_slice(&uuid_le);
        ad.extend(manufacturer_ad(0x4152, b"PT\x02"));

        let first = report([1, 2, 3, 4, 5, 6], &ad, -40);
        let second = report([6, 5, 4, 3, 2, 1], &manufacturer_ad(0x454B, b"G1.0"), -90);
        let adverts = parse_advertising_report(&event(&[first, second]), SystemTime::now());

        assert_eq!(adverts.len(), 2);
        assert_eq!(adverts[0].service_uuids, vec![uuid]);
        assert_eq!(adverts[0].manufacturer(0x4152), Some(&b"PT\x02"[..]));
        assert_eq!(adverts[1].address, MacAddress([6, 5, 4, 3, 2, 1]));
        assert_eq!(adverts[1].rssi, Some(-90));
    }

    #[test]
    fn test_parse_truncated_report() {
        let ad = manufacturer_ad(0x4152, b"PT\x02");
        let mut packet = event(&[report([1, 2, 3, 4, 5, 6], &ad, -40)]);
        packet.truncate(packet.len() - 3);
        assert!(parse_advertising_report(&packet, SystemTime::now()).is_empty());
    }

    #[test]
    fn test_ignores_other_events() {
        assert!(parse_advertising_report(&[HCI_EVENT_PKT, 0x0E, 0x00], SystemTime::now()).is_empty());
    }
}
