//! Ethernet link-layer framing (spec §4.g: "ETHERNET reads a 14-byte
//! header {dst-MAC, src-MAC, type}. Type 0x0800 => IPv4; 0x0806 => ARP.").

use crate::net::address::NetworkAddress;
use crate::net::packet::{NetProtocol, Packet};

pub const HEADER_LEN: usize = 14;
pub const ETHERTYPE_IP4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Strips the Ethernet header off a received packet, filling in
/// `src_address`/`dst_address` and the net-protocol tag, and advancing
/// `net_header_offset` past the header.
pub fn setup_received(packet: &mut Packet) -> Option<u16> {
    if packet.length < HEADER_LEN {
        return None;
    }
    let header = &packet.bytes()[0..HEADER_LEN];
    let dst: [u8; 6] = header[0..6].try_into().unwrap();
    let src: [u8; 6] = header[6..12].try_into().unwrap();
    let ethertype = u16::from_be_bytes([header[12], header[13]]);

    packet.dst_address = NetworkAddress::from_ethernet_slice(&dst);
    packet.src_address = NetworkAddress::from_ethernet_slice(&src);
    packet.link_header_offset = 0;
    packet.net_header_offset = HEADER_LEN;
    packet.net_protocol = match ethertype {
        ETHERTYPE_IP4 => NetProtocol::Ip4,
        ETHERTYPE_ARP => NetProtocol::None, // ARP is handled as its own packet shape, not via net_protocol
        _ => NetProtocol::None,
    };
    Some(ethertype)
}

/// Prepends the 14-byte Ethernet header ahead of the network header that
/// [`crate::net::ip4::prepend_header`] already wrote, resolving `dest_mac`
/// via ARP (spec §4.g transmit pipeline) beforehand.
pub fn prepend_header(packet: &mut Packet, src_mac: NetworkAddress, dst_mac: NetworkAddress, ethertype: u16) {
    let net_off = packet.net_header_offset;
    let link_off = net_off.saturating_sub(HEADER_LEN);
    let mut header = [0u8; HEADER_LEN];
    header[0..6].copy_from_slice(&dst_mac.ethernet_octets());
    header[6..12].copy_from_slice(&src_mac.ethernet_octets());
    header[12..14].copy_from_slice(&ethertype.to_be_bytes());
    packet.set_payload(link_off, &header);
    packet.link_header_offset = link_off;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields() {
        let mut packet = Packet::boxed();
        packet.net_header_offset = HEADER_LEN;
        packet.data_offset = HEADER_LEN;
        let src = NetworkAddress::ethernet([1, 2, 3, 4, 5, 6]);
        let dst = NetworkAddress::ethernet([6, 5, 4, 3, 2, 1]);
        prepend_header(&mut packet, src, dst, ETHERTYPE_IP4);
        packet.length = HEADER_LEN;
        let ethertype = setup_received(&mut packet).unwrap();
        assert_eq!(ethertype, ETHERTYPE_IP4);
        assert_eq!(packet.src_address, src);
        assert_eq!(packet.dst_address, dst);
    }
}
