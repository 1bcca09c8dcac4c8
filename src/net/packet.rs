//! Network packet buffers and the per-device preallocated pool (spec §3
//! "Network packet", §9 design note on packet ownership).
//!
//! A received or about-to-be-sent packet is either handed out from a
//! device's fixed-size pool (must be returned when the last reference
//! drops, so interrupt context never has to call into the allocator) or
//! freshly boxed from the free store. Spec §9 asks for "enum { Pooled(arena,
//! idx), Boxed } held by the Packet; drop chooses" — we model the arena as
//! the pool's own ring of spare buffers rather than an index into a fixed
//! array, since the buffer itself (not just a slot number) is what a
//! pooled packet must give back.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::net::address::NetworkAddress;

/// `NETWORK_PACKET_MAX_LENGTH` (Ethernet MTU plus header room).
pub const PACKET_MAX_LENGTH: usize = 1518;
/// `NETWORK_PACKETS_PER_STREAM` (spec §4.g device registration).
pub const PACKETS_PER_POOL: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkProtocol {
    Loop,
    Ethernet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetProtocol {
    None,
    Ip4,
    Arp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransProtocol {
    None,
    Udp,
    Icmp,
    /// Recognised but rejected at connection-open time (spec §4.g: "For TCP
    /// filters, reject with ERR_NOTIMPLEMENTED").
    Tcp,
}

pub type PacketPool = Mutex<VecDeque<Vec<u8>>>;

/// Builds a pool of `PACKETS_PER_POOL` preallocated, zero-filled buffers
/// (spec §4.g device registration: "allocate the packet pool").
pub fn new_pool() -> Arc<PacketPool> {
    let mut pool = VecDeque::with_capacity(PACKETS_PER_POOL);
    for _ in 0..PACKETS_PER_POOL {
        pool.push_back(alloc::vec![0u8; PACKET_MAX_LENGTH]);
    }
    Arc::new(Mutex::new(pool))
}

enum Ownership {
    Pooled(Arc<PacketPool>),
    Boxed,
}

pub struct Packet {
    data: Vec<u8>,
    pub length: usize,
    pub src_address: NetworkAddress,
    pub src_port: u16,
    pub dst_address: NetworkAddress,
    pub dst_port: u16,
    pub link_protocol: LinkProtocol,
    pub net_protocol: NetProtocol,
    pub trans_protocol: TransProtocol,
    /// Sub-protocol discriminator, e.g. the ICMP message type (spec §3
    /// connection filter "sub-proto for ICMP type").
    pub sub_protocol: u8,
    pub link_header_offset: usize,
    pub net_header_offset: usize,
    pub trans_header_offset: usize,
    pub data_offset: usize,
    pub data_length: usize,
    owner: Ownership,
}

impl Packet {
    /// `kernelNetworkPacketGet()` from the free store (no bound pool
    /// available, e.g. for ARP/loopback bootstrap before a device exists).
    pub fn boxed() -> Self {
        Packet {
            data: alloc::vec![0u8; PACKET_MAX_LENGTH],
            length: 0,
            src_address: NetworkAddress::zero(),
            src_port: 0,
            dst_address: NetworkAddress::zero(),
            dst_port: 0,
            link_protocol: LinkProtocol::Ethernet,
            net_protocol: NetProtocol::None,
            trans_protocol: TransProtocol::None,
            sub_protocol: 0,
            link_header_offset: 0,
            net_header_offset: 0,
            trans_header_offset: 0,
            data_offset: 0,
            data_length: 0,
            owner: Ownership::Boxed,
        }
    }

    /// `kernelNetworkPacketGet()` from a device's pool. Returns `None` if
    /// the pool is exhausted (callers must tolerate allocation failure in
    /// interrupt context rather than blocking).
    pub fn from_pool(pool: &Arc<PacketPool>) -> Option<Self> {
        let buf = pool.lock().pop_front()?;
        let mut p = Self::boxed();
        p.data = buf;
        p.owner = Ownership::Pooled(pool.clone());
        Some(p)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length.max(self.data_offset + self.data_length).min(self.data.len())]
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_payload(&mut self, at: usize, bytes: &[u8]) {
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }
}

/// `release()`: pooled packets return their buffer to the pool; free-store
/// packets are simply freed by the normal `Vec` drop.
impl Drop for Packet {
    fn drop(&mut self) {
        if let Ownership::Pooled(pool) = &self.owner {
            let mut buf = core::mem::take(&mut self.data);
            buf.resize(PACKET_MAX_LENGTH, 0);
            pool.lock().push_back(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_packet_returns_its_buffer_on_drop() {
        let pool = new_pool();
        assert_eq!(pool.lock().len(), PACKETS_PER_POOL);
        {
            let _p = Packet::from_pool(&pool).unwrap();
            assert_eq!(pool.lock().len(), PACKETS_PER_POOL - 1);
        }
        assert_eq!(pool.lock().len(), PACKETS_PER_POOL);
    }

    #[test]
    fn exhausted_pool_yields_none() {
        let pool = new_pool();
        let mut held = alloc::vec::Vec::new();
        for _ in 0..PACKETS_PER_POOL {
            held.push(Packet::from_pool(&pool).unwrap());
        }
        assert!(Packet::from_pool(&pool).is_none());
    }
}
