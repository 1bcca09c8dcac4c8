//! Transfer planning (spec §4.f "Transfers"): pure logic for how many TDs
//! a transaction needs and what each one should carry, kept free of the
//! hardware ring so it can be tested without a controller. The UHCI
//! driver ([`super::uhci`]) turns a [`Plan`] into an actual linked TD
//! chain.

use alloc::vec::Vec;

use crate::usb::device::DeviceRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

/// USB PIDs a TD's token field carries (spec §3 "Transfer descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pid {
    Setup,
    In,
    Out,
}

/// One planned data stage: how many bytes, which direction, and the
/// data-toggle value it must carry (spec §4.f step 4: "alternating
/// data-toggle per successful TD").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTd {
    pub pid: Pid,
    pub length: usize,
    pub toggle: bool,
}

/// `USB_MIN_TRANSFER_SIZE` (spec §4.f: "minimum per-transfer size is 8") —
/// the floor applied to the packet size used when sizing data stages, so a
/// low-speed control pipe (8-byte max packet) never plans a zero-size
/// chunk count for a non-empty transfer.
pub const MIN_TRANSFER_SIZE: usize = 8;

fn ceil_div(n: usize, d: usize) -> usize {
    if n == 0 {
        0
    } else {
        (n + d - 1) / d
    }
}

/// Describes a complete transaction: SETUP (for control) + data stage(s)
/// + STATUS (for control), per spec §4.f steps 1-6.
#[derive(Debug, Clone)]
pub struct Plan {
    pub transfer_type: TransferType,
    pub tds: Vec<PlannedTd>,
}

/// Plans the TD sequence for one transaction (spec §4.f step 1-5):
/// - control: SETUP + ceil(length/maxPacketSize) data TDs + STATUS.
/// - bulk/interrupt/isoch: ceil(length/maxPacketSize) data TDs.
///
/// `length` is the payload length requested in the direction `data_in`
/// indicates; `start_toggle` is the endpoint's toggle going into the data
/// stage (ignored for control, which always starts its data stage at 1
/// per spec — the SETUP stage itself carries toggle 0).
pub fn plan(transfer_type: TransferType, length: usize, max_packet_size: u16, data_in: bool, start_toggle: bool) -> Plan {
    let packet_size = (max_packet_size as usize).max(MIN_TRANSFER_SIZE);
    let data_count = ceil_div(length, packet_size);
    let data_pid = if data_in { Pid::In } else { Pid::Out };

    let mut tds = Vec::new();
    match transfer_type {
        TransferType::Control => {
            tds.push(PlannedTd { pid: Pid::Setup, length: 8, toggle: false });
            let mut toggle = true;
            let mut remaining = length;
            for _ in 0..data_count {
                let chunk = remaining.min(packet_size);
                tds.push(PlannedTd { pid: data_pid, length: chunk, toggle });
                toggle = !toggle;
                remaining -= chunk;
            }
            let status_pid = if data_in { Pid::Out } else { Pid::In };
            tds.push(PlannedTd { pid: status_pid, length: 0, toggle: true });
        }
        TransferType::Bulk | TransferType::Interrupt | TransferType::Isochronous => {
            let mut toggle = start_toggle;
            let mut remaining = length;
            for _ in 0..data_count.max(if length == 0 { 0 } else { 1 }) {
                let chunk = remaining.min(packet_size);
                tds.push(PlannedTd { pid: data_pid, length: chunk, toggle });
                toggle = !toggle;
                remaining -= chunk;
            }
        }
    }
    Plan { transfer_type, tds }
}

/// A fully-specified request the caller hands the controller (spec §4.f:
/// `usbTransaction`). `setup` is only consulted for [`TransferType::Control`].
pub struct Transaction<'a> {
    pub transfer_type: TransferType,
    pub address: u8,
    pub endpoint: u8,
    pub setup: Option<DeviceRequest>,
    pub buffer: &'a mut [u8],
    pub timeout_ms: u32,
}

/// Default transfer timeout (spec §4.f step 7: "honor timeout (default
/// 2000 ms)").
pub const DEFAULT_TIMEOUT_MS: u32 = 2000;

#[cfg(test)]
mod tests {
    use super::*;

    /// Spec §8 scenario 5: GET_DESCRIPTOR(device, 18 bytes) plans exactly
    /// three TDs (SETUP, one IN, STATUS) with toggles 0, 1, 1.
    #[test]
    fn control_get_descriptor_plans_three_tds_with_expected_toggles() {
        let plan = plan(TransferType::Control, 18, 64, true, false);
        assert_eq!(plan.tds.len(), 3);
        assert_eq!(plan.tds[0], PlannedTd { pid: Pid::Setup, length: 8, toggle: false });
        assert_eq!(plan.tds[1], PlannedTd { pid: Pid::In, length: 18, toggle: true });
        assert_eq!(plan.tds[2], PlannedTd { pid: Pid::Out, length: 0, toggle: true });
    }

    #[test]
    fn control_data_stage_splits_across_max_packet_size() {
        let plan = plan(TransferType::Control, 130, 64, true, false);
        // SETUP + ceil(130/64)=3 data TDs + STATUS
        assert_eq!(plan.tds.len(), 5);
        assert_eq!(plan.tds[1].length, 64);
        assert_eq!(plan.tds[2].length, 64);
        assert_eq!(plan.tds[3].length, 2);
        assert!(plan.tds[1].toggle);
        assert!(!plan.tds[2].toggle);
        assert!(plan.tds[3].toggle);
    }

    #[test]
    fn zero_length_control_transfer_has_no_data_stage() {
        let plan = plan(TransferType::Control, 0, 64, false, false);
        assert_eq!(plan.tds.len(), 2);
        assert_eq!(plan.tds[0].pid, Pid::Setup);
        assert_eq!(plan.tds[1].pid, Pid::In);
    }

    #[test]
    fn bulk_transfer_alternates_toggle_from_the_endpoints_current_state() {
        let plan = plan(TransferType::Bulk, 192, 64, true, true);
        assert_eq!(plan.tds.len(), 3);
        assert!(plan.tds[0].toggle);
        assert!(!plan.tds[1].toggle);
        assert!(plan.tds[2].toggle);
    }

    #[test]
    fn low_speed_packet_size_floor_avoids_zero_chunking() {
        let plan = plan(TransferType::Control, 4, 0, true, false);
        assert_eq!(plan.tds.len(), 3);
        assert_eq!(plan.tds[1].length, 4);
    }
}
