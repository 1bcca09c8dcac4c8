//! ARP: cache, packet encode/decode, and address resolution (spec §3 "ARP
//! cache", §4.g ARP handling and `getAddress`; grounded on
//! `kernelNetworkArp.c`).

use alloc::collections::VecDeque;

use crate::lib::error::{KernelError, Result};
use crate::net::address::{NetworkAddress, ADDR_LEN_ETHERNET, ADDR_LEN_IP4, BROADCAST_ETHERNET};
use crate::net::device::NetworkDevice;
use crate::net::ethernet;
use crate::net::packet::Packet;
use crate::process::scheduler;
use crate::support::rtc;

pub const HEADER_LEN: usize = 28;
pub const PACKET_LEN: usize = ethernet::HEADER_LEN + HEADER_LEN;
pub const HARDWARE_ETHERNET: u16 = 1;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

/// `NETWORK_ARPCACHE_SIZE`: most-recently-used entry is always index 0
/// (spec §8 invariant: "at most 64 entries, ordered most-recent-first;
/// inserting an address already present moves it to index 0 without
/// duplicating").
pub const CACHE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub logical: NetworkAddress,
    pub physical: NetworkAddress,
}

#[derive(Default)]
pub struct ArpCache {
    entries: VecDeque<CacheEntry>,
}

impl ArpCache {
    pub fn new() -> Self {
        ArpCache { entries: VecDeque::with_capacity(CACHE_SIZE) }
    }

    pub fn search(&self, logical: &NetworkAddress) -> Option<NetworkAddress> {
        self.entries
            .iter()
            .find(|e| e.logical.equals(logical, ADDR_LEN_IP4))
            .map(|e| e.physical)
    }

    /// Cache-on-sight insert/update, moving the entry to the front whether
    /// it was new or already present (`addArpCache` in the original).
    pub fn insert(&mut self, logical: NetworkAddress, physical: NetworkAddress) {
        self.entries.retain(|e| !e.logical.equals(&logical, ADDR_LEN_IP4));
        self.entries.push_front(CacheEntry { logical, physical });
        while self.entries.len() > CACHE_SIZE {
            self.entries.pop_back();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ArpMessage {
    pub op_code: u16,
    pub src_hardware: NetworkAddress,
    pub src_logical: NetworkAddress,
    pub dst_hardware: NetworkAddress,
    pub dst_logical: NetworkAddress,
}

/// Decodes an Ethernet-ARP frame already known to carry ARP (ethertype
/// 0x0806). Returns `None` for anything but Ethernet/IPv4 ARP.
pub fn decode(packet: &Packet) -> Option<ArpMessage> {
    let body = packet.bytes();
    if body.len() < PACKET_LEN {
        return None;
    }
    let arp = &body[ethernet::HEADER_LEN..ethernet::HEADER_LEN + HEADER_LEN];
    let hw_space = u16::from_be_bytes([arp[0], arp[1]]);
    let hw_len = arp[4];
    if hw_space != HARDWARE_ETHERNET || hw_len as usize != ADDR_LEN_ETHERNET {
        return None;
    }
    let op_code = u16::from_be_bytes([arp[6], arp[7]]);
    let sha: [u8; 6] = arp[8..14].try_into().unwrap();
    let spa: [u8; 4] = arp[14..18].try_into().unwrap();
    let tha: [u8; 6] = arp[18..24].try_into().unwrap();
    let tpa: [u8; 4] = arp[24..28].try_into().unwrap();
    Some(ArpMessage {
        op_code,
        src_hardware: NetworkAddress::from_ethernet_slice(&sha),
        src_logical: NetworkAddress::from_ipv4_slice(&spa),
        dst_hardware: NetworkAddress::from_ethernet_slice(&tha),
        dst_logical: NetworkAddress::from_ipv4_slice(&tpa),
    })
}

/// Builds a full Ethernet+ARP request or reply packet by hand (the
/// original deliberately does not reuse the IPv4 header-prepend helpers
/// for this — `kernelNetworkArpSend`'s comment: "rather than calling
/// kernelNetworkEthernetPrependHeader ... which might generate its own ARP
/// request").
pub fn build(
    our_mac: NetworkAddress,
    our_ip: NetworkAddress,
    op_code: u16,
    dest_logical: NetworkAddress,
    dest_physical: Option<NetworkAddress>,
) -> Packet {
    let mut packet = Packet::boxed();
    packet.length = PACKET_LEN;

    let eth_dest = if op_code == OP_REPLY {
        dest_physical.unwrap_or(BROADCAST_ETHERNET)
    } else {
        BROADCAST_ETHERNET
    };
    let mut header = [0u8; ethernet::HEADER_LEN];
    header[0..6].copy_from_slice(&eth_dest.ethernet_octets());
    header[6..12].copy_from_slice(&our_mac.ethernet_octets());
    header[12..14].copy_from_slice(&ethernet::ETHERTYPE_ARP.to_be_bytes());
    packet.set_payload(0, &header);

    let mut arp = [0u8; HEADER_LEN];
    arp[0..2].copy_from_slice(&HARDWARE_ETHERNET.to_be_bytes());
    arp[2..4].copy_from_slice(&ethernet::ETHERTYPE_IP4.to_be_bytes());
    arp[4] = ADDR_LEN_ETHERNET as u8;
    arp[5] = ADDR_LEN_IP4 as u8;
    arp[6..8].copy_from_slice(&op_code.to_be_bytes());
    arp[8..14].copy_from_slice(&our_mac.ethernet_octets());
    arp[14..18].copy_from_slice(&our_ip.ipv4_octets());
    if op_code == OP_REPLY {
        if let Some(phys) = dest_physical {
            arp[18..24].copy_from_slice(&phys.ethernet_octets());
        }
    }
    arp[24..28].copy_from_slice(&dest_logical.ipv4_octets());
    packet.set_payload(ethernet::HEADER_LEN, &arp);

    packet
}

/// Number of cache-probe attempts `get_address` makes before giving up
/// (spec §4.g: "Probe up to six times").
pub const MAX_PROBES: u32 = 6;
/// Sleep between probes after the first, which only yields the slice
/// (spec §4.g: "the first attempt yields the slice once; subsequent
/// attempts sleep 500 ms").
pub const PROBE_SLEEP_MS: u64 = 500;

/// The suspension half of `get_address`'s probe loop, factored out behind
/// a trait so the cache/broadcast/substitution policy below can be unit
/// tested without a live scheduler. This crate models process suspension
/// as a data-structure transition rather than a running executor (spec §9:
/// no real kernel thread ever resumes mid-call), so both methods just
/// record the intended wait on the calling process and return immediately.
pub trait Waiter {
    fn yield_once(&self);
    fn sleep_ms(&self, ms: u64);
}

/// The real backend: records the yield/sleep against whichever process is
/// current on the scheduler, the same state transitions
/// [`crate::process::scheduler::Scheduler::yield_now`] and a `wait(ms)`
/// primitive would apply to a live process.
pub struct SchedulerWaiter;

impl Waiter for SchedulerWaiter {
    fn yield_once(&self) {
        if let Some(pid) = scheduler::current_pid() {
            scheduler::with_scheduler(|s| s.yield_now(pid));
        }
    }

    fn sleep_ms(&self, ms: u64) {
        if let Some(pid) = scheduler::current_pid() {
            let deadline = rtc::uptime_millis() + ms;
            scheduler::with_scheduler(|s| {
                if let Some(p) = s.process_mut(pid) {
                    p.wait_condition = crate::process::task::WaitCondition::UntilMillis(deadline);
                }
            });
        }
    }
}

/// `getAddress(device, ip, outMac)` (spec §4.g): resolves `ip` to a
/// hardware address, substituting the gateway for anything outside the
/// device's subnet and probing the cache/network up to [`MAX_PROBES`]
/// times before failing with [`KernelError::NoSuchEntry`] ("no such
/// entry").
pub fn get_address(dev: &mut NetworkDevice, ip: NetworkAddress, waiter: &dyn Waiter) -> Result<NetworkAddress> {
    if ip.equals(&dev.host_address, ADDR_LEN_IP4) {
        return Ok(dev.hardware_address);
    }
    let target = if ip.ipv4_same_subnet(&dev.host_address, &dev.netmask) { ip } else { dev.gateway_address };

    for attempt in 0..MAX_PROBES {
        if let Some(mac) = dev.arp_cache.search(&target) {
            return Ok(mac);
        }
        let request = build(dev.hardware_address, dev.host_address, OP_REQUEST, target, None);
        let _ = dev.ops.write_data(&request.bytes()[..request.length]);
        if attempt == 0 {
            waiter.yield_once();
        } else {
            waiter.sleep_ms(PROBE_SLEEP_MS);
        }
    }
    Err(KernelError::NoSuchEntry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mru_insert_moves_existing_entry_to_front() {
        let mut cache = ArpCache::new();
        let a = NetworkAddress::ipv4(10, 0, 0, 1);
        let b = NetworkAddress::ipv4(10, 0, 0, 2);
        cache.insert(a, NetworkAddress::ethernet([1; 6]));
        cache.insert(b, NetworkAddress::ethernet([2; 6]));
        cache.insert(a, NetworkAddress::ethernet([3; 6]));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.search(&a), Some(NetworkAddress::ethernet([3; 6])));
    }

    #[test]
    fn cache_caps_at_64_entries() {
        let mut cache = ArpCache::new();
        for i in 0..70u8 {
            cache.insert(NetworkAddress::ipv4(10, 0, 0, i), NetworkAddress::ethernet([i; 6]));
        }
        assert_eq!(cache.len(), CACHE_SIZE);
    }

    #[test]
    fn build_then_decode_round_trips() {
        let mac = NetworkAddress::ethernet([1, 2, 3, 4, 5, 6]);
        let ip = NetworkAddress::ipv4(192, 168, 1, 1);
        let target = NetworkAddress::ipv4(192, 168, 1, 2);
        let packet = build(mac, ip, OP_REQUEST, target, None);
        let msg = decode(&packet).unwrap();
        assert_eq!(msg.op_code, OP_REQUEST);
        assert_eq!(msg.src_logical, ip);
        assert_eq!(msg.dst_logical, target);
    }

    struct NoopWaiter;
    impl Waiter for NoopWaiter {
        fn yield_once(&self) {}
        fn sleep_ms(&self, _ms: u64) {}
    }

    fn test_device() -> NetworkDevice {
        use crate::net::loopback::LoopbackOps;
        static LOOP_OPS: LoopbackOps = LoopbackOps;
        let mut dev = NetworkDevice::new(alloc::string::String::from("net0"), crate::net::packet::LinkProtocol::Ethernet, &LOOP_OPS);
        dev.hardware_address = NetworkAddress::ethernet([1, 2, 3, 4, 5, 6]);
        dev.host_address = NetworkAddress::ipv4(10, 0, 0, 1);
        dev.netmask = NetworkAddress::ipv4(255, 255, 255, 0);
        dev.gateway_address = NetworkAddress::ipv4(10, 0, 0, 254);
        dev
    }

    #[test]
    fn own_ip_resolves_to_device_mac_without_probing() {
        let mut dev = test_device();
        let mac = get_address(&mut dev, dev.host_address, &NoopWaiter).unwrap();
        assert_eq!(mac, dev.hardware_address);
    }

    #[test]
    fn cache_hit_returns_without_exhausting_probes() {
        let mut dev = test_device();
        let dest = NetworkAddress::ipv4(10, 0, 0, 55);
        let dest_mac = NetworkAddress::ethernet([9; 6]);
        dev.arp_cache.insert(dest, dest_mac);
        let mac = get_address(&mut dev, dest, &NoopWaiter).unwrap();
        assert_eq!(mac, dest_mac);
    }

    #[test]
    fn off_subnet_destination_resolves_via_gateway() {
        let mut dev = test_device();
        let gateway_mac = NetworkAddress::ethernet([7; 6]);
        dev.arp_cache.insert(dev.gateway_address, gateway_mac);
        let far = NetworkAddress::ipv4(192, 168, 50, 1);
        let mac = get_address(&mut dev, far, &NoopWaiter).unwrap();
        assert_eq!(mac, gateway_mac);
    }

    #[test]
    fn unresolvable_destination_fails_after_max_probes() {
        let mut dev = test_device();
        let unreachable = NetworkAddress::ipv4(10, 0, 0, 99);
        assert_eq!(get_address(&mut dev, unreachable, &NoopWaiter), Err(KernelError::NoSuchEntry));
    }
}
