//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{SIGHTING_CHANNEL_BUFFER_SIZE, ScanError};
use crate::beacon::Sighting;
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::warn;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// LE Set Scan Parameters command
#[repr(C, packed)]
struct LeSetScanParametersCmd {
    scan_type: u8,
    interval: u16,
    window: u16,
    own_address_type: u8,
    filter_policy: u8,
}

/// LE Set Scan Enable command
#[repr(C, packed)]
struct LeSetScanEnableCmd {
    enable: u8,
    filter_dup: u8,
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(0x01); // HCI command packet type
    packet.push((opcode & 0xFF) as u8);
    packet.push((opcode >> 8) as u8);
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // Create a raw Bluetooth HCI socket using libc directly
    // since nix doesn't support BTPROTO_HCI
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Set HCI socket filter
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Configure LE scanning parameters
fn configure_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    // Set scan parameters: passive scan, 10ms interval, 10ms window
    let params = LeSetScanParametersCmd {
        scan_type: LE_SCAN_PASSIVE,
        interval: 0x0010, // 10ms in 0.625ms units
        window: 0x0010,   // 10ms in 0.625ms units
        own_address_type: LE_PUBLIC_ADDRESS,
        filter_policy: FILTER_POLICY_ACCEPT_ALL,
    };

    let params_bytes = unsafe {
        std::slice::from_raw_parts(
            &params as *const LeSetScanParametersCmd as *const u8,
            mem::size_of::<LeSetScanParametersCmd>(),
        )
    };

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, params_bytes);
    send_hci_command(fd, &packet)?;

    // Enable scanning
    let enable = LeSetScanEnableCmd {
        enable: 0x01,
        filter_dup: 0x00, // Don't filter duplicates
    };

    let enable_bytes = unsafe {
        std::slice::from_raw_parts(
            &enable as *const LeSetScanEnableCmd as *const u8,
            mem::size_of::<LeSetScanEnableCmd>(),
        )
    };

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, enable_bytes);
    send_hci_command(fd, &packet)?;

    Ok(())
}

/// Byte offsets within one advertising report, counted from the
/// `num_reports` byte that follows the LE meta sub-event code.
const REPORT_ADDR: usize = 3;
const REPORT_DATA_LEN: usize = 9;
const REPORT_DATA: usize = 10;
/// RSSI byte meaning "not available" in an LE advertising report.
const RSSI_UNAVAILABLE: u8 = 0x7F;

/// Parse the first report of an LE advertising report event.
///
/// `packet` is the full HCI event packet. The AD data is passed through
/// untouched; the RSSI is the signed byte that follows it. A missing or
/// unavailable RSSI is reported as `0`.
fn parse_advertising_report(packet: &[u8]) -> Option<Sighting> {
    // packet type, event code, parameter length, sub-event
    let report = packet.get(4..)?;
    if *report.first()? == 0 {
        return None;
    }

    let mut addr = [0u8; 6];
    addr.copy_from_slice(report.get(REPORT_ADDR..REPORT_ADDR + 6)?);

    let data_len = usize::from(*report.get(REPORT_DATA_LEN)?);
    let ad_data = report.get(REPORT_DATA..REPORT_DATA + data_len)?;
    let rssi = report
        .get(REPORT_DATA + data_len)
        .filter(|&&b| b != RSSI_UNAVAILABLE)
        .map_or(0, |&b| i16::from(b as i8));

    Some(Sighting {
        address: MacAddress::from_le_bytes(addr),
        rssi,
        advertisement: ad_data.to_vec(),
        name: local_name(ad_data),
    })
}

/// Find the shortened or complete local name AD structure.
fn local_name(ad_data: &[u8]) -> Option<String> {
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = usize::from(ad_data[offset]);
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        if matches!(ad_type, AD_TYPE_SHORT_LOCAL_NAME | AD_TYPE_COMPLETE_LOCAL_NAME) {
            let name = &ad_data[offset + 2..offset + 1 + len];
            return (!name.is_empty()).then(|| String::from_utf8_lossy(name).into_owned());
        }

        offset += 1 + len;
    }
    None
}

/// Start scanning using raw HCI sockets on `hci0`.
///
/// Every LE advertising report becomes one sighting carrying the raw AD
/// data, so no scan-record reconstruction is needed. Runs until the
/// receiver is dropped or the socket fails.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<Sighting>, ScanError> {
    // Open and configure HCI socket for receiving events
    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, 0)?;
    set_hci_filter(&fd)?;

    // We need a separate socket for sending commands (bound to specific device)
    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, 0)?;
    configure_le_scan(&cmd_fd)?;

    let (tx, rx) = mpsc::channel(SIGHTING_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let _cmd_fd = cmd_fd; // Keep command socket alive
        let mut buf = [0u8; 258]; // Max HCI event size

        'events: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, "HCI socket failed");
                    break;
                }
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
                    Ok(Ok(_)) => break,  // EOF or empty read
                    Ok(Err(_)) => break, // Read error
                    Err(_) => break,     // WouldBlock - no more data
                };

                if is_advertising_report(&buf[..n])
                    && let Some(sighting) = parse_advertising_report(&buf[..n])
                    && tx.send(sighting).await.is_err()
                {
                    break 'events;
                }
            }
        }
    });

    Ok(rx)
}

fn is_advertising_report(packet: &[u8]) -> bool {
    packet.len() >= 4
        && packet[0] == HCI_EVENT_PKT
        && packet[1] == EVT_LE_META_EVENT
        && packet[3] == EVT_LE_ADVERTISING_REPORT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, ibeacon_record};

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        // Verify filter is set correctly
        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);

        assert_eq!(packet[0], 0x01); // Command packet type
        assert_eq!(packet.len(), 6); // Header + 2 params
    }
    /// Build an LE advertising report event carrying one report.
    fn report_packet(addr_le: [u8; 6], ad_data: &[u8], rssi: Option<i8>) -> Vec<u8> {
        let mut packet = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, 0, EVT_LE_ADVERTISING_REPORT];
        packet.extend_from_slice(&[1, 0x03, 0x01]); // one report, non-connectable, random
        packet.extend_from_slice(&addr_le);
        packet.push(ad_data.len() as u8);
        packet.extend_from_slice(ad_data);
        if let Some(rssi) = rssi {
            packet.push(rssi as u8);
        }
        packet[2] = (packet.len() - 3) as u8;
        packet
    }

    #[test]
    fn test_parse_advertising_report_passes_ad_data_through() {
        let record = ibeacon_record([0x33; 16], 7, 8, 0xC5);
        let packet = report_packet([0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA], &record, Some(-67));

        assert!(is_advertising_report(&packet));
        let sighting = parse_advertising_report(&packet).unwrap();

        assert_eq!(sighting.address, TEST_MAC);
        assert_eq!(sighting.rssi, -67);
        assert_eq!(sighting.advertisement, record);
        assert_eq!(sighting.name, None);
    }

    #[test]
    fn test_parse_advertising_report_reads_local_name() {
        let mut ad_data = ibeacon_record([0x33; 16], 7, 8, 0xC5);
        ad_data.extend_from_slice(&[0x05, AD_TYPE_COMPLETE_LOCAL_NAME, b'd', b'e', b's', b'k']);
        let packet = report_packet([1, 2, 3, 4, 5, 6], &ad_data, Some(-50));

        let sighting = parse_advertising_report(&packet).unwrap();
        assert_eq!(sighting.name.as_deref(), Some("desk"));
        assert_eq!(sighting.address.to_string(), "06:05:04:03:02:01");
    }

    #[test]
    fn test_parse_advertising_report_without_rssi_byte() {
        let packet = report_packet([1, 2, 3, 4, 5, 6], &[0x02, 0x01, 0x06], None);
        assert_eq!(parse_advertising_report(&packet).unwrap().rssi, 0);
    }

    #[test]
    fn test_parse_advertising_report_rssi_not_available() {
        let record = ibeacon_record([0x11; 16], 1, 2, 0xC5);
        let packet = report_packet([1, 2, 3, 4, 5, 6], &record, Some(127));
        let sighting = parse_advertising_report(&packet).unwrap();
        assert_eq!(sighting.rssi, 0);

        let identity =
            crate::decode(&sighting.address.to_string(), &sighting.advertisement).unwrap();
        let distance = crate::distance::estimate(sighting.rssi, identity.reference_level);
        assert!(distance.is_infinite());
    }

    #[test]
    fn test_parse_advertising_report_empty_local_name() {
        let ad_data = [0x02, 0x01, 0x06, 0x01, 0x09];
        let packet = report_packet([1, 2, 3, 4, 5, 6], &ad_data, Some(-70));
        assert_eq!(parse_advertising_report(&packet).unwrap().name, None);
    }

    #[test]
    fn test_parse_advertising_report_truncated() {
        let record = ibeacon_record([0x33; 16], 7, 8, 0xC5);
        let packet = report_packet([1, 2, 3, 4, 5, 6], &record, Some(-50));

        assert!(parse_advertising_report(&packet[..20]).is_none());
        assert!(parse_advertising_report(&packet[..4]).is_none());
        assert!(parse_advertising_report(&[]).is_none());
    }

    #[test]
    fn test_parse_advertising_report_zero_reports() {
        let mut packet = report_packet([1, 2, 3, 4, 5, 6], &[], Some(-50));
        packet[4] = 0;
        assert!(parse_advertising_report(&packet).is_none());
    }

    #[test]
    fn test_is_advertising_report_rejects_other_events() {
        let mut packet = report_packet([1, 2, 3, 4, 5, 6], &[], Some(-50));
        packet[3] = 0x01; // connection complete
        assert!(!is_advertising_report(&packet));
        assert!(!is_advertising_report(&[HCI_EVENT_PKT]));
    }
}
