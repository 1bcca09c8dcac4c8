//! UDP header encode/decode with pseudo-header checksum (spec §4.g:
//! "validate pseudo-header checksum over (src IP, dst IP, 0, protocol,
//! udpLength, the UDP header+data)"; grounded on `kernelNetworkUdp.c`).

use crate::lib::error::{KernelError, Result};
use crate::net::ip4;
use crate::net::packet::Packet;

pub const HEADER_LEN: usize = 8;

fn pseudo_checksum(src: [u8; 4], dst: [u8; 4], udp_len: u16, udp_and_data: &[u8]) -> u16 {
    let mut buf = alloc::vec::Vec::with_capacity(12 + udp_and_data.len() + 1);
    buf.extend_from_slice(&src);
    buf.extend_from_slice(&dst);
    buf.push(0);
    buf.push(ip4::PROTO_UDP);
    buf.extend_from_slice(&udp_len.to_be_bytes());
    buf.extend_from_slice(udp_and_data);
    if buf.len() % 2 != 0 {
        buf.push(0);
    }
    ip4::checksum16(&buf, None)
}

/// Validates the UDP header in place and fills in `src_port`/`dst_port`.
pub fn setup_received(packet: &mut Packet) -> Result<()> {
    let at = packet.trans_header_offset;
    if packet.bytes().len() < at + HEADER_LEN {
        return Err(KernelError::Range);
    }
    let header = &packet.bytes()[at..at + HEADER_LEN];
    let src_port = u16::from_be_bytes([header[0], header[1]]);
    let dst_port = u16::from_be_bytes([header[2], header[3]]);
    let udp_len = u16::from_be_bytes([header[4], header[5]]);
    let claimed_checksum = u16::from_be_bytes([header[6], header[7]]);

    if claimed_checksum != 0 {
        let src = packet.src_address.ipv4_octets();
        let dst = packet.dst_address.ipv4_octets();
        let udp_and_data = &packet.bytes()[at..at + udp_len as usize];
        let mut verify = alloc::vec::Vec::from(udp_and_data);
        verify[6] = 0;
        verify[7] = 0;
        let computed = pseudo_checksum(src, dst, udp_len, &verify);
        if claimed_checksum != computed {
            return Err(KernelError::BadData);
        }
    }

    packet.src_port = src_port;
    packet.dst_port = dst_port;
    packet.data_offset = at + HEADER_LEN;
    packet.data_length = (udp_len as usize).saturating_sub(HEADER_LEN);
    Ok(())
}

/// Prepends the UDP header immediately below `packet.data_offset` (which
/// must already hold the payload — callers reserve room for this header by
/// setting `data_offset` high enough before writing, the same convention
/// [`crate::net::ip4::prepend_header`] and
/// [`crate::net::ethernet::prepend_header`] use one layer further out, so
/// nothing already written at `data_offset` is clobbered). The checksum is
/// left zero here and finalized by [`finalize_send`] once the IPv4
/// source/destination are known (the pseudo-header needs both).
pub fn prepend_header(packet: &mut Packet, src_port: u16, dst_port: u16) {
    let at = packet.data_offset.saturating_sub(HEADER_LEN);
    packet.trans_header_offset = at;
    let udp_len = (HEADER_LEN + packet.data_length) as u16;
    let mut header = [0u8; HEADER_LEN];
    header[0..2].copy_from_slice(&src_port.to_be_bytes());
    header[2..4].copy_from_slice(&dst_port.to_be_bytes());
    header[4..6].copy_from_slice(&udp_len.to_be_bytes());
    packet.set_payload(at, &header);
}

/// Computes and stamps the UDP checksum once source/destination IPv4
/// addresses are set on the packet (called right before transmission).
pub fn finalize_send(packet: &mut Packet, src_ip: [u8; 4], dst_ip: [u8; 4]) {
    let at = packet.trans_header_offset;
    let udp_len = (packet.data_offset - at) + packet.data_length;
    let udp_and_data = packet.bytes()[at..at + udp_len].to_vec();
    let sum = pseudo_checksum(src_ip, dst_ip, udp_len as u16, &udp_and_data);
    packet.set_payload(at + 6, &sum.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::address::NetworkAddress;

    #[test]
    fn round_trip_checksum_validates() {
        let mut packet = Packet::boxed();
        packet.src_address = NetworkAddress::ipv4(10, 0, 0, 1);
        packet.dst_address = NetworkAddress::ipv4(10, 0, 0, 2);
        packet.data_offset = HEADER_LEN;
        packet.data_length = 4;
        packet.set_payload(HEADER_LEN, b"ping");
        prepend_header(&mut packet, 68, 67);
        assert_eq!(&packet.bytes()[HEADER_LEN..HEADER_LEN + 4], b"ping", "prepend must not clobber the payload");
        finalize_send(&mut packet, packet.src_address.ipv4_octets(), packet.dst_address.ipv4_octets());

        packet.trans_header_offset = 0;
        packet.length = HEADER_LEN + 4;
        setup_received(&mut packet).unwrap();
        assert_eq!(packet.src_port, 68);
        assert_eq!(packet.dst_port, 67);
    }
}
