//! Network connections: per-process filters, open policy, and packet
//! matching (spec §3 "Network connection", §4.g "Match the received packet
//! against each open connection").

use alloc::collections::VecDeque;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::net::address::NetworkAddress;
use crate::net::packet::{LinkProtocol, NetProtocol, Packet, TransProtocol};
use crate::process::task::Pid;

bitflags! {
    /// `mode` flags on a connection (spec §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConnectionMode: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

bitflags! {
    /// Which fields of [`ConnectionFilter`] are required to match (spec
    /// §3: "bitmask of which fields are required to match").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilterFlags: u16 {
        const LINK_PROTOCOL = 1 << 0;
        const NET_PROTOCOL = 1 << 1;
        const TRANS_PROTOCOL = 1 << 2;
        /// ICMP message type, or any other transport sub-discriminator.
        const SUB_PROTOCOL = 1 << 3;
        const LOCAL_PORT = 1 << 4;
        const REMOTE_PORT = 1 << 5;
        const REMOTE_ADDRESS = 1 << 6;
        /// Header-inclusion level selection — not itself a match
        /// predicate, just stored alongside the others.
        const HEADERS = 1 << 7;
    }
}

/// Level of header inclusion a connection wants on delivered data (spec
/// §4.g: "headers included at the level the filter requested").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderInclusion {
    /// The full link-layer frame.
    Raw,
    Link,
    Net,
    Transport,
    /// Payload only, no headers at all.
    DataOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionFilter {
    pub flags: FilterFlags,
    pub link_protocol: LinkProtocol,
    pub net_protocol: NetProtocol,
    pub trans_protocol: TransProtocol,
    pub sub_protocol: u8,
    pub local_port: u16,
    pub remote_port: u16,
    pub remote_address: NetworkAddress,
    pub headers: HeaderInclusion,
}

impl ConnectionFilter {
    pub fn new() -> Self {
        ConnectionFilter {
            flags: FilterFlags::empty(),
            link_protocol: LinkProtocol::Ethernet,
            net_protocol: NetProtocol::Ip4,
            trans_protocol: TransProtocol::None,
            sub_protocol: 0,
            local_port: 0,
            remote_port: 0,
            remote_address: NetworkAddress::zero(),
            headers: HeaderInclusion::DataOnly,
        }
    }

    /// `match(filter, packet)` (spec §8 invariant): every filter bit that
    /// is set must be satisfied by the packet.
    pub fn matches(&self, packet: &Packet) -> bool {
        if self.flags.contains(FilterFlags::LINK_PROTOCOL) && packet.link_protocol != self.link_protocol {
            return false;
        }
        if self.flags.contains(FilterFlags::NET_PROTOCOL) && packet.net_protocol != self.net_protocol {
            return false;
        }
        if self.flags.contains(FilterFlags::TRANS_PROTOCOL) && packet.trans_protocol != self.trans_protocol {
            return false;
        }
        if self.flags.contains(FilterFlags::SUB_PROTOCOL) && packet.sub_protocol != self.sub_protocol {
            return false;
        }
        if self.flags.contains(FilterFlags::LOCAL_PORT) && packet.dst_port != self.local_port {
            return false;
        }
        if self.flags.contains(FilterFlags::REMOTE_PORT) && packet.src_port != self.remote_port {
            return false;
        }
        if self.flags.contains(FilterFlags::REMOTE_ADDRESS)
            && !packet.src_address.equals(&self.remote_address, 4)
        {
            return false;
        }
        true
    }
}

impl Default for ConnectionFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide monotonic connection id source, handed out by
/// [`Connection::new`] so a caller of `net::open()` gets a stable handle to
/// find its connection again later (`close()`, `sendData()`) without
/// holding a borrow across the device registry lock.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Connection {
    pub id: u64,
    pub owner_pid: Pid,
    pub mode: ConnectionMode,
    pub remote_address: NetworkAddress,
    pub filter: ConnectionFilter,
    pub input: VecDeque<Packet>,
    /// Rolling IPv4 identification counter, seeded from the connection's
    /// identity (spec §3): we seed from the owner pid and local port so
    /// two connections don't collide on the first datagram.
    pub ip_identification: u16,
}

impl Connection {
    pub fn new(owner_pid: Pid, mode: ConnectionMode, remote_address: NetworkAddress, filter: ConnectionFilter) -> Self {
        let seed = (owner_pid as u16) ^ filter.local_port;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Connection { id, owner_pid, mode, remote_address, filter, input: VecDeque::new(), ip_identification: seed }
    }

    pub fn next_ip_id(&mut self) -> u16 {
        let id = self.ip_identification;
        self.ip_identification = self.ip_identification.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rejects_on_any_required_mismatch() {
        let mut filter = ConnectionFilter::new();
        filter.flags = FilterFlags::TRANS_PROTOCOL | FilterFlags::LOCAL_PORT;
        filter.trans_protocol = TransProtocol::Udp;
        filter.local_port = 68;

        let mut packet = Packet::boxed();
        packet.trans_protocol = TransProtocol::Udp;
        packet.dst_port = 68;
        assert!(filter.matches(&packet));

        packet.dst_port = 67;
        assert!(!filter.matches(&packet));
    }

    #[test]
    fn unset_flags_are_always_satisfied() {
        let filter = ConnectionFilter::new();
        let packet = Packet::boxed();
        assert!(filter.matches(&packet));
    }
}
