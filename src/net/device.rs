//! Network device records and the trait seam NIC drivers register through
//! (spec §3 "Network device", §4.g device registration; spec §9's "trait
//! object per role" design note, the same shape as [`crate::pic::PicOps`]
//! and [`crate::text::output::TextOutputDriver`]).

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use spin::Mutex;

use crate::lib::error::{KernelError, Result};
use crate::net::address::NetworkAddress;
use crate::net::arp::ArpCache;
use crate::net::connection::Connection;
use crate::net::packet::{new_pool, LinkProtocol, Packet, PacketPool};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u16 {
        const LINK = 1 << 0;
        const RUNNING = 1 << 1;
        const AUTOCONF = 1 << 2;
        const DISABLED = 1 << 3;
        const PROMISCUOUS = 1 << 4;
        const AUTOCRC = 1 << 5;
        const AUTOSTRIP = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceStats {
    pub recv_packets: u64,
    pub trans_packets: u64,
    pub recv_drops: u64,
    pub trans_drops: u64,
}

/// A sniffer attachment: observer streams registered via `deviceHook()`
/// (spec §4.g: "Emit hook copies on receive and send").
pub type Hook = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// `kernelNetworkDeviceOps` (spec §4.g): the seam a concrete NIC driver
/// implements. Out of scope per spec §1 ("individual NIC drivers"); only
/// [`crate::net::loopback`] is provided in-tree as the one always-present
/// implementation.
pub trait NetworkDeviceOps: Send + Sync {
    /// Drains whatever the hardware has ready into the device's input
    /// queue. Called both from the shared interrupt handler and, for
    /// polling-style devices like loopback, from the network thread tick.
    fn driver_interrupt(&self, dev: &mut NetworkDevice);
    fn set_flags(&self, flags: DeviceFlags) -> Result<()>;
    fn write_data(&self, data: &[u8]) -> Result<()>;
}

pub struct NetworkDevice {
    pub name: String,
    pub link_protocol: LinkProtocol,
    pub irq: Option<u8>,
    pub hardware_address: NetworkAddress,
    pub host_address: NetworkAddress,
    pub netmask: NetworkAddress,
    pub broadcast_address: NetworkAddress,
    pub gateway_address: NetworkAddress,
    pub dns_address: NetworkAddress,
    pub flags: DeviceFlags,
    pub stats: DeviceStats,
    pub input: VecDeque<Packet>,
    pub output: VecDeque<Packet>,
    pub pool: Arc<PacketPool>,
    pub connections: Vec<Connection>,
    pub input_hooks: Vec<Hook>,
    pub output_hooks: Vec<Hook>,
    pub arp_cache: ArpCache,
    /// Saved DHCP ACK payload, kept for lease renewal (spec §3 "saved last
    /// DHCP response for lease renewal/release").
    pub dhcp_last_ack: Option<Vec<u8>>,
    pub lease_expiry_uptime_secs: Option<u64>,
    /// Populated from the DHCP ACK's hostname/domain options, if the server
    /// supplied them (spec §4.g step 5).
    pub host_name: Option<String>,
    pub domain_name: Option<String>,
    pub ops: &'static dyn NetworkDeviceOps,
}

impl NetworkDevice {
    pub fn new(name: String, link_protocol: LinkProtocol, ops: &'static dyn NetworkDeviceOps) -> Self {
        NetworkDevice {
            name,
            link_protocol,
            irq: None,
            hardware_address: NetworkAddress::zero(),
            host_address: NetworkAddress::zero(),
            netmask: NetworkAddress::zero(),
            broadcast_address: NetworkAddress::zero(),
            gateway_address: NetworkAddress::zero(),
            dns_address: NetworkAddress::zero(),
            flags: DeviceFlags::empty(),
            stats: DeviceStats::default(),
            input: VecDeque::new(),
            output: VecDeque::new(),
            pool: new_pool(),
            connections: Vec::new(),
            input_hooks: Vec::new(),
            output_hooks: Vec::new(),
            arp_cache: ArpCache::new(),
            dhcp_last_ack: None,
            lease_expiry_uptime_secs: None,
            host_name: None,
            domain_name: None,
            ops,
        }
    }

    pub fn hook_copy_in(&self, bytes: &[u8]) {
        for hook in &self.input_hooks {
            hook.lock().push_back(bytes.to_vec());
        }
    }

    pub fn hook_copy_out(&self, bytes: &[u8]) {
        for hook in &self.output_hooks {
            hook.lock().push_back(bytes.to_vec());
        }
    }
}

/// Registry of all registered network devices, keyed by assigned name
/// ("net0", "net1", ... spec §4.g device registration).
pub struct Registry {
    devices: Vec<NetworkDevice>,
    next_index: u32,
}

impl Registry {
    const fn new() -> Self {
        Registry { devices: Vec::new(), next_index: 0 }
    }

    /// Assigns the next "netN" name and installs the device, mirroring
    /// device registration in spec §4.g (IRQ chaining/ISR install/packet
    /// pool allocation happen in the device's own constructor and in
    /// [`super::register_irq_device`]).
    pub fn register(&mut self, mut device: NetworkDevice) -> &str {
        if device.link_protocol != LinkProtocol::Loop {
            device.name = alloc::format!("net{}", self.next_index);
            self.next_index += 1;
        }
        self.devices.push(device);
        self.devices.last().unwrap().name.as_str()
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut NetworkDevice> {
        self.devices.iter_mut().find(|d| d.name == name)
    }

    pub fn find(&self, name: &str) -> Option<&NetworkDevice> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NetworkDevice> {
        self.devices.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkDevice> {
        self.devices.iter()
    }

    pub fn by_irq_mut(&mut self, irq: u8) -> Option<&mut NetworkDevice> {
        self.devices.iter_mut().find(|d| d.irq == Some(irq))
    }

    /// `open()`'s device-selection policy (spec §4.g): a device whose
    /// subnet contains `address`, else a running non-loopback device with
    /// a gateway configured.
    pub fn route_for(&self, address: &NetworkAddress) -> Result<&str> {
        if let Some(d) = self.devices.iter().find(|d| {
            d.flags.contains(DeviceFlags::RUNNING) && address.ipv4_same_subnet(&d.host_address, &d.netmask)
        }) {
            return Ok(d.name.as_str());
        }
        if let Some(d) = self.devices.iter().find(|d| {
            d.flags.contains(DeviceFlags::RUNNING)
                && d.link_protocol != LinkProtocol::Loop
                && !d.gateway_address.is_zero(4)
        }) {
            return Ok(d.name.as_str());
        }
        Err(KernelError::NoRouteToHost)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

pub fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    f(&mut REGISTRY.lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::loopback::LoopbackOps;

    static LOOP_OPS: LoopbackOps = LoopbackOps;

    #[test]
    fn registering_assigns_sequential_net_names() {
        let mut r = Registry::new();
        let d0 = NetworkDevice::new(String::from(""), LinkProtocol::Ethernet, &LOOP_OPS);
        let d1 = NetworkDevice::new(String::from(""), LinkProtocol::Ethernet, &LOOP_OPS);
        assert_eq!(r.register(d0), "net0");
        assert_eq!(r.register(d1), "net1");
    }

    #[test]
    fn loop_device_keeps_its_given_name() {
        let mut r = Registry::new();
        let d = NetworkDevice::new(String::from("loop"), LinkProtocol::Loop, &LOOP_OPS);
        assert_eq!(r.register(d), "loop");
    }
}
