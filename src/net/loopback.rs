//! The loopback device (spec §4.g "Loopback"): a virtual device with a
//! circular packet queue, always link-up and auto-everything, used for
//! intra-host delivery (spec §8 scenario 1's ping round-trip) and as the
//! target for a connection whose destination is the device's own IP.

use alloc::collections::VecDeque;
use spin::Mutex;

use crate::lib::error::Result;
use crate::net::address::NetworkAddress;
use crate::net::device::{DeviceFlags, NetworkDevice, NetworkDeviceOps};
use crate::net::packet::LinkProtocol;

/// Queue depth for the loopback device (spec §4.g: "a circular packet
/// queue (length 16)").
pub const QUEUE_LEN: usize = 16;

static QUEUE: Mutex<VecDeque<alloc::vec::Vec<u8>>> = Mutex::new(VecDeque::new());

pub struct LoopbackOps;

impl NetworkDeviceOps for LoopbackOps {
    fn driver_interrupt(&self, dev: &mut NetworkDevice) {
        let mut queue = QUEUE.lock();
        while let Some(bytes) = queue.pop_front() {
            let mut packet = match crate::net::packet::Packet::from_pool(&dev.pool) {
                Some(p) => p,
                None => break,
            };
            packet.length = bytes.len();
            packet.set_payload(0, &bytes);
            dev.hook_copy_in(&bytes);
            dev.input.push_back(packet);
            dev.stats.recv_packets += 1;
        }
    }

    fn set_flags(&self, _flags: DeviceFlags) -> Result<()> {
        Ok(())
    }

    fn write_data(&self, data: &[u8]) -> Result<()> {
        let mut queue = QUEUE.lock();
        if queue.len() >= QUEUE_LEN {
            queue.pop_front();
        }
        queue.push_back(data.to_vec());
        Ok(())
    }
}

static LOOPBACK_OPS: LoopbackOps = LoopbackOps;

/// Registers the loopback device with host 127.0.0.1/8, as spec §8
/// scenario 1 assumes at boot.
pub fn register() -> alloc::string::String {
    let mut dev = NetworkDevice::new(alloc::string::String::from("loop"), LinkProtocol::Loop, &LOOPBACK_OPS);
    dev.host_address = NetworkAddress::ipv4(127, 0, 0, 1);
    dev.netmask = NetworkAddress::ipv4(255, 0, 0, 0);
    dev.flags = DeviceFlags::LINK | DeviceFlags::RUNNING | DeviceFlags::PROMISCUOUS | DeviceFlags::AUTOCRC | DeviceFlags::AUTOSTRIP;
    crate::net::device::with_registry(|r| r.register(dev).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_bytes_come_back_through_driver_interrupt() {
        let mut dev = NetworkDevice::new(alloc::string::String::from("loop"), LinkProtocol::Loop, &LOOPBACK_OPS);
        LOOPBACK_OPS.write_data(b"hello").unwrap();
        LOOPBACK_OPS.driver_interrupt(&mut dev);
        assert_eq!(dev.input.len(), 1);
        assert_eq!(&dev.input[0].bytes()[0..5], b"hello");
    }
}
