//! Network stack entry points (spec §4.g): `open()`/`close()`/`sendData()`
//! as seen by a caller that already has a device name and a filter, plus
//! the shared transmit-pipeline helpers [`net::dhcp`] reuses to avoid
//! duplicating the Ethernet+IPv4+UDP header-prepend sequence.

pub mod address;
pub mod arp;
pub mod connection;
pub mod device;
pub mod dhcp;
pub mod ethernet;
pub mod icmp;
pub mod ip4;
pub mod loopback;
pub mod packet;
pub mod thread;
pub mod udp;

use alloc::string::String;

use crate::lib::error::{KernelError, Result};
use crate::net::address::NetworkAddress;
use crate::net::connection::{Connection, ConnectionFilter, ConnectionMode, FilterFlags};
use crate::net::device::NetworkDevice;
use crate::net::packet::{LinkProtocol, Packet, TransProtocol};
use crate::process::task::Pid;

/// Registers a device with the registry and prepares it for traffic: save
/// any existing IRQ vector owner for chaining, unmask the line, and leave
/// the packet pool it was constructed with ready to hand out buffers (spec
/// §4.g device registration). IRQ chaining itself lives with whichever
/// driver owns the vector; this just records the line the device claims so
/// [`thread::tick`] and the shared interrupt entry point can find it by IRQ.
pub fn register_irq_device(mut dev: NetworkDevice, irq: Option<u8>) -> String {
    dev.irq = irq;
    if let Some(line) = irq {
        crate::pic::unmask(line);
    }
    device::with_registry(|r| String::from(r.register(dev)))
}

/// A handle returned by [`open`]: which device the connection lives on and
/// the id [`connection::Connection::new`] assigned it, enough to find it
/// again later without holding a borrow across the registry lock.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionHandle {
    pub device_name: [u8; 16],
    pub device_name_len: usize,
    pub id: u64,
}

impl ConnectionHandle {
    fn new(device_name: &str, id: u64) -> Self {
        let mut buf = [0u8; 16];
        let n = device_name.len().min(16);
        buf[..n].copy_from_slice(&device_name.as_bytes()[..n]);
        ConnectionHandle { device_name: buf, device_name_len: n, id }
    }

    pub fn device_name(&self) -> &str {
        core::str::from_utf8(&self.device_name[..self.device_name_len]).unwrap_or("")
    }
}

/// `networkOpen()` (spec §4.g): picks a device by [`device::Registry::route_for`]
/// unless the filter already names one, rejects TCP filters
/// (`ERR_NOTIMPLEMENTED`, TCP is out of scope), and installs a
/// [`Connection`] on that device.
pub fn open(owner_pid: Pid, mode: ConnectionMode, remote_address: NetworkAddress, mut filter: ConnectionFilter) -> Result<ConnectionHandle> {
    if filter.trans_protocol == TransProtocol::Tcp {
        return Err(KernelError::NotImplemented);
    }
    device::with_registry(|r| {
        let name = String::from(r.route_for(&remote_address)?);
        let dev = r.find_mut(&name).ok_or(KernelError::NoSuchEntry)?;
        if filter.net_protocol == crate::net::packet::NetProtocol::Ip4
            && !filter.flags.contains(FilterFlags::LOCAL_PORT)
        {
            filter.local_port = allocate_free_port(dev);
            filter.flags |= FilterFlags::LOCAL_PORT;
        }
        let conn = Connection::new(owner_pid, mode, remote_address, filter);
        let id = conn.id;
        dev.connections.push(conn);
        Ok(ConnectionHandle::new(&name, id))
    })
}

/// Picks a random port above 1024 that no existing connection on `dev` is
/// already using as its local port (spec §4.g open policy: "allocate a
/// random free port > 1024 that does not collide with any existing
/// connection on the device").
fn allocate_free_port(dev: &NetworkDevice) -> u16 {
    loop {
        let candidate = 1025 + crate::support::prng::next_bounded(u16::MAX as u32 - 1024) as u16;
        let taken = dev.connections.iter().any(|c| {
            c.filter.flags.contains(FilterFlags::LOCAL_PORT) && c.filter.local_port == candidate
        });
        if !taken {
            return candidate;
        }
    }
}

/// `networkClose()`: removes one connection from its device.
pub fn close(handle: ConnectionHandle) -> Result<()> {
    device::with_registry(|r| {
        let dev = r.find_mut(handle.device_name()).ok_or(KernelError::NoSuchEntry)?;
        let before = dev.connections.len();
        dev.connections.retain(|c| c.id != handle.id);
        if dev.connections.len() == before {
            return Err(KernelError::NoSuchEntry);
        }
        Ok(())
    })
}

/// `networkCloseAll(pid)`: called on process termination (spec §4.g) to
/// tear down every connection the dying process still owned, across every
/// device, rather than leaking them.
pub fn close_all(owner_pid: Pid) {
    device::with_registry(|r| {
        for dev in r.iter_mut() {
            dev.connections.retain(|c| c.owner_pid != owner_pid);
        }
    });
}

/// Builds a fresh outgoing UDP-over-IPv4 datagram with `reserve` bytes of
/// room below the payload already accounted for (the Ethernet+IPv4+UDP
/// budget [`transmit_immediate`] expects), ready for [`udp::prepend_header`]/
/// [`ip4::prepend_header`]/[`ethernet::prepend_header`] to write into in
/// that order. Shared by [`send_data`] and [`dhcp`] so neither duplicates
/// the header-prepend sequence.
pub(crate) fn build_udp_datagram(src_port: u16, dst_port: u16, payload: &[u8], reserve: usize) -> Packet {
    let mut packet = Packet::boxed();
    packet.trans_protocol = TransProtocol::Udp;
    packet.data_offset = reserve;
    packet.data_length = payload.len();
    packet.length = reserve + payload.len();
    packet.set_payload(reserve, payload);
    udp::prepend_header(&mut packet, src_port, dst_port);
    packet
}

/// Reserve budget (link + network + transport headers) a caller must leave
/// below its payload before calling [`build_udp_datagram`], per device link
/// type (spec §4.g transmit pipeline).
pub(crate) fn udp_reserve(link_protocol: LinkProtocol) -> usize {
    match link_protocol {
        LinkProtocol::Ethernet => ethernet::HEADER_LEN + ip4::HEADER_LEN + udp::HEADER_LEN,
        LinkProtocol::Loop => ip4::HEADER_LEN + udp::HEADER_LEN,
    }
}

/// Finishes a packet already carrying a transport header (UDP already
/// prepended, or an ICMP reply whose body already sits at `data_offset`):
/// resolves the destination MAC through ARP, prepends IPv4 and (on
/// Ethernet) the link header, stamps the rolling identification counter,
/// and hands the finished frame to the device's `write_data`. Grounded on
/// `kernelNetworkSendData`'s pipeline order: transport, then network, then
/// link, outermost header last.
pub fn transmit_immediate(dev: &mut NetworkDevice, mut packet: Packet, dst_ip: NetworkAddress, identification: u16) -> Result<()> {
    packet.src_address = dev.host_address;
    packet.dst_address = dst_ip;
    ip4::prepend_header(&mut packet, dev.host_address, dst_ip);
    if packet.trans_protocol == TransProtocol::Udp {
        udp::finalize_send(&mut packet, dev.host_address.ipv4_octets(), dst_ip.ipv4_octets());
    }
    ip4::finalize_send(&mut packet, identification);

    if dev.link_protocol == LinkProtocol::Ethernet {
        let broadcast = dst_ip.equals(&NetworkAddress::ipv4(255, 255, 255, 255), crate::net::address::ADDR_LEN_IP4)
            || dst_ip.is_ipv4_broadcast(&dev.host_address, &dev.netmask);
        let dst_mac = if broadcast {
            crate::net::address::BROADCAST_ETHERNET
        } else {
            arp::get_address(dev, dst_ip, &arp::SchedulerWaiter)?
        };
        ethernet::prepend_header(&mut packet, dev.hardware_address, dst_mac, ethernet::ETHERTYPE_IP4);
        let link_off = packet.link_header_offset;
        dev.hook_copy_out(&packet.bytes()[link_off..packet.length]);
        dev.ops.write_data(&packet.bytes()[link_off..packet.length])?;
    } else {
        let net_off = packet.net_header_offset;
        dev.hook_copy_out(&packet.bytes()[net_off..packet.length]);
        dev.ops.write_data(&packet.bytes()[net_off..packet.length])?;
    }
    dev.stats.trans_packets += 1;
    Ok(())
}

/// `networkSendData()` (spec §4.g): looks the connection's device up by
/// name, builds a UDP datagram from `payload`, and transmits it to the
/// connection's remote address over the connection's own ports.
pub fn send_data(handle: ConnectionHandle, payload: &[u8]) -> Result<()> {
    device::with_registry(|r| {
        let dev = r.find_mut(handle.device_name()).ok_or(KernelError::NoSuchEntry)?;
        let conn_idx = dev.connections.iter().position(|c| c.id == handle.id).ok_or(KernelError::NoSuchEntry)?;
        if !dev.connections[conn_idx].mode.contains(ConnectionMode::WRITE) {
            return Err(KernelError::Permission);
        }
        let dst = dev.connections[conn_idx].remote_address;
        let (src_port, dst_port) = (dev.connections[conn_idx].filter.local_port, dev.connections[conn_idx].filter.remote_port);
        let reserve = udp_reserve(dev.link_protocol);
        let packet = build_udp_datagram(src_port, dst_port, payload, reserve);
        let ident = dev.connections[conn_idx].next_ip_id();
        transmit_immediate(dev, packet, dst, ident)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::device::NetworkDeviceOps;
    use crate::net::loopback::LoopbackOps;

    /// Registers a loopback device if one isn't already present in this
    /// test binary's shared registry — route lookups always resolve to the
    /// first-registered "loop" device, so later calls are no-ops.
    fn fresh_loop_device() -> alloc::string::String {
        if device::with_registry(|r| r.find("loop").is_some()) {
            return alloc::string::String::from("loop");
        }
        loopback::register()
    }

    #[test]
    fn open_on_loopback_destination_installs_a_connection() {
        let _name = fresh_loop_device();
        let mut filter = ConnectionFilter::new();
        filter.flags = FilterFlags::TRANS_PROTOCOL | FilterFlags::LOCAL_PORT;
        filter.trans_protocol = TransProtocol::Udp;
        filter.local_port = 68;
        let handle = open(1, ConnectionMode::READ | ConnectionMode::WRITE, NetworkAddress::ipv4(127, 0, 0, 1), filter).unwrap();
        assert_eq!(handle.device_name(), "loop");
        device::with_registry(|r| {
            let dev = r.find_mut("loop").unwrap();
            assert!(dev.connections.iter().any(|c| c.id == handle.id));
        });
        close(handle).unwrap();
    }

    #[test]
    fn tcp_filters_are_rejected() {
        let _name = fresh_loop_device();
        let mut filter = ConnectionFilter::new();
        filter.flags = FilterFlags::TRANS_PROTOCOL;
        filter.trans_protocol = TransProtocol::Tcp;
        assert_eq!(
            open(1, ConnectionMode::READ, NetworkAddress::ipv4(127, 0, 0, 1), filter),
            Err(KernelError::NotImplemented)
        );
    }

    #[test]
    fn close_all_drops_every_connection_for_the_pid() {
        let _name = fresh_loop_device();
        let filter = ConnectionFilter::new();
        let h1 = open(5, ConnectionMode::READ, NetworkAddress::ipv4(127, 0, 0, 1), filter).unwrap();
        let h2 = open(5, ConnectionMode::READ, NetworkAddress::ipv4(127, 0, 0, 1), filter).unwrap();
        close_all(5);
        assert_eq!(close(h1), Err(KernelError::NoSuchEntry));
        assert_eq!(close(h2), Err(KernelError::NoSuchEntry));
    }

    #[test]
    fn send_data_over_loopback_round_trips_through_driver_interrupt() {
        let _name = fresh_loop_device();
        let mut filter = ConnectionFilter::new();
        filter.flags = FilterFlags::TRANS_PROTOCOL | FilterFlags::LOCAL_PORT | FilterFlags::REMOTE_PORT;
        filter.trans_protocol = TransProtocol::Udp;
        filter.local_port = 68;
        filter.remote_port = 67;
        let handle = open(1, ConnectionMode::READ | ConnectionMode::WRITE, NetworkAddress::ipv4(127, 0, 0, 1), filter).unwrap();
        send_data(handle, b"hello").unwrap();

        static LOOP_OPS: LoopbackOps = LoopbackOps;
        device::with_registry(|r| {
            let dev = r.find_mut("loop").unwrap();
            LOOP_OPS.driver_interrupt(dev);
            assert_eq!(dev.input.len(), 1);
        });
        close(handle).unwrap();
    }
}
