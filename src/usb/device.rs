//! USB device / interface / endpoint records (spec §3 "USB device /
//! interface / endpoint") and the 8-byte `usbDeviceRequest` SETUP packet
//! shape every control transfer carries.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    Low,
    Full,
}

/// `usbEndpointAttr`: the four transfer types a pipe may be configured
/// for, matching the low two bits of the descriptor's `bmAttributes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointAttribute {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint on an interface. `number`'s high bit marks IN direction
/// per spec §3; [`Endpoint::is_in`] reads it back out.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub number: u8,
    pub max_packet_size: u16,
    pub attribute: EndpointAttribute,
    pub interval: u8,
    /// Data toggle (spec §3 invariant): flips per successful non-control
    /// transfer; forced to 0 by SETUP, 1 by STATUS.
    pub data_toggle: bool,
}

pub const ENDPOINT_DIR_IN: u8 = 0x80;

impl Endpoint {
    pub fn new(number: u8, max_packet_size: u16, attribute: EndpointAttribute, interval: u8) -> Self {
        Endpoint { number, max_packet_size, attribute, interval, data_toggle: false }
    }

    pub fn is_in(&self) -> bool {
        self.number & ENDPOINT_DIR_IN != 0
    }

    pub fn address(&self) -> u8 {
        self.number & 0x0F
    }

    /// Alternates the toggle after a successful non-control data TD (spec
    /// §3 invariant: "data-toggle alternates per endpoint per successful
    /// non-control transfer").
    pub fn flip_toggle(&mut self) {
        self.data_toggle = !self.data_toggle;
    }

    /// `SETUP forces toggle to 0`.
    pub fn force_setup_toggle(&mut self) {
        self.data_toggle = false;
    }

    /// `STATUS forces toggle to 1`.
    pub fn force_status_toggle(&mut self) {
        self.data_toggle = true;
    }
}

/// One interface on a device: class triple, its endpoints, and whatever
/// opaque state the class driver that claimed it (spec §4.f hot-plug:
/// "whichever claims the interface stores its per-device handle in
/// `interface.data`") wants to keep alongside it.
pub struct Interface {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<Endpoint>,
    pub driver_name: Option<&'static str>,
    pub driver: Option<&'static dyn crate::usb::UsbClassDriver>,
    pub data: Option<Box<dyn Any + Send + Sync>>,
}

impl Interface {
    pub fn new(class: u8, subclass: u8, protocol: u8) -> Self {
        Interface { class, subclass, protocol, endpoints: Vec::new(), driver_name: None, driver: None, data: None }
    }

    pub fn endpoint_mut(&mut self, number: u8) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|e| e.number == number)
    }
}

pub struct UsbDevice {
    pub address: u8,
    pub speed: UsbSpeed,
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub interfaces: Vec<Interface>,
}

impl UsbDevice {
    pub fn new(address: u8, speed: UsbSpeed) -> Self {
        UsbDevice { address, speed, vendor_id: 0, product_id: 0, class: 0, subclass: 0, protocol: 0, interfaces: Vec::new() }
    }
}

/// `usbDeviceRequest`: the 8-byte SETUP packet (spec §3 "Transfer
/// descriptor" / §4.f step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

/// Standard request codes this driver issues itself (spec §4.f: SET_PROTOCOL,
/// GET_DESCRIPTOR; §4.f keyboard class driver: SET_PROTOCOL/SET_REPORT).
pub const REQ_GET_DESCRIPTOR: u8 = 6;
pub const REQ_SET_CONFIGURATION: u8 = 9;
pub const REQ_SET_PROTOCOL: u8 = 0x0B;
pub const REQ_SET_REPORT: u8 = 0x09;

pub const DESC_TYPE_DEVICE: u16 = 1 << 8;
pub const DEVICE_DESCRIPTOR_LEN: u16 = 18;

impl DeviceRequest {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = self.request_type;
        out[1] = self.request;
        out[2..4].copy_from_slice(&self.value.to_le_bytes());
        out[4..6].copy_from_slice(&self.index.to_le_bytes());
        out[6..8].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// `GET_DESCRIPTOR(device, 18 bytes)` (spec §8 scenario 5).
    pub fn get_device_descriptor() -> Self {
        DeviceRequest { request_type: 0x80, request: REQ_GET_DESCRIPTOR, value: DESC_TYPE_DEVICE, index: 0, length: DEVICE_DESCRIPTOR_LEN }
    }

    pub fn set_boot_protocol(interface: u16) -> Self {
        DeviceRequest { request_type: 0x21, request: REQ_SET_PROTOCOL, value: 0, index: interface, length: 0 }
    }

    pub fn set_report_leds(interface: u16) -> Self {
        DeviceRequest { request_type: 0x21, request: REQ_SET_REPORT, value: 0x0200, index: interface, length: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_bit_of_endpoint_number_marks_in_direction() {
        let ep = Endpoint::new(0x81, 8, EndpointAttribute::Interrupt, 10);
        assert!(ep.is_in());
        assert_eq!(ep.address(), 1);
    }

    #[test]
    fn setup_forces_toggle_zero_status_forces_toggle_one() {
        let mut ep = Endpoint::new(0x02, 64, EndpointAttribute::Bulk, 0);
        ep.data_toggle = true;
        ep.force_setup_toggle();
        assert!(!ep.data_toggle);
        ep.force_status_toggle();
        assert!(ep.data_toggle);
    }

    #[test]
    fn toggle_flips_each_successful_transfer() {
        let mut ep = Endpoint::new(0x81, 64, EndpointAttribute::Bulk, 0);
        assert!(!ep.data_toggle);
        ep.flip_toggle();
        assert!(ep.data_toggle);
        ep.flip_toggle();
        assert!(!ep.data_toggle);
    }

    #[test]
    fn device_request_encodes_little_endian_fields() {
        let req = DeviceRequest::get_device_descriptor();
        let bytes = req.to_bytes();
        assert_eq!(bytes[0], 0x80);
        assert_eq!(bytes[1], REQ_GET_DESCRIPTOR);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), DEVICE_DESCRIPTOR_LEN);
    }
}
