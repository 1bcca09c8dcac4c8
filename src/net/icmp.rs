//! ICMP echo request/reply (spec §4.g: "validate 16-bit checksum of
//! header+data. Echo-request triggers an immediate crafted echo-reply
//! using the same payload.").

use crate::lib::error::{KernelError, Result};
use crate::net::ip4;
use crate::net::packet::Packet;

pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_ECHO_REPLY: u8 = 0;
pub const HEADER_LEN: usize = 8;

/// Validates the ICMP checksum over header+data and records the message
/// type as the packet's sub-protocol (spec §3 connection filter "sub-proto
/// for ICMP type").
pub fn setup_received(packet: &mut Packet) -> Result<()> {
    let at = packet.trans_header_offset;
    let body = &packet.bytes()[at..packet.length];
    if body.len() < HEADER_LEN {
        return Err(KernelError::Range);
    }
    let claimed = u16::from_be_bytes([body[2], body[3]]);
    let mut verify = body.to_vec();
    verify[2] = 0;
    verify[3] = 0;
    if claimed != ip4::checksum16(&verify, None) {
        return Err(KernelError::BadData);
    }
    packet.sub_protocol = body[0];
    packet.data_offset = at;
    packet.data_length = body.len();
    Ok(())
}

/// Crafts an echo-reply packet carrying the same identifier, sequence
/// number, and payload as `request`, destined back to its sender — the
/// transport-layer half of spec §8 scenario 1's loopback round-trip.
///
/// `reserve` bytes are left below the payload for the network (and, on an
/// Ethernet device, link) headers the caller is about to prepend, the same
/// convention [`crate::net::ip4::prepend_header`] documents: the payload is
/// written starting at `reserve` rather than 0, so nothing is clobbered
/// when those headers are added below it afterwards.
pub fn build_echo_reply(request: &Packet, reserve: usize) -> Packet {
    let at = request.trans_header_offset;
    let body = &request.bytes()[at..request.length];

    let mut reply = Packet::boxed();
    reply.src_address = request.dst_address;
    reply.dst_address = request.src_address;
    reply.trans_protocol = crate::net::packet::TransProtocol::Icmp;
    // ICMP's header is folded into what IPv4 considers "data" (spec §4.g
    // prepend-header convention also documented on `ip4::prepend_header`);
    // keeping the two offsets equal is what makes that boundary lookup
    // resolve to `reserve` instead of 0.
    reply.trans_header_offset = reserve;
    reply.data_offset = reserve;
    reply.data_length = body.len();
    reply.length = reserve + body.len();

    let mut out = body.to_vec();
    out[0] = TYPE_ECHO_REPLY;
    out[1] = 0;
    out[2] = 0;
    out[3] = 0;
    let checksum = ip4::checksum16(&out, None);
    out[2..4].copy_from_slice(&checksum.to_be_bytes());
    reply.set_payload(reserve, &out);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::address::NetworkAddress;

    fn echo_request(payload: &[u8]) -> Packet {
        let mut packet = Packet::boxed();
        packet.trans_header_offset = 0;
        let mut body = alloc::vec![0u8; HEADER_LEN + payload.len()];
        body[0] = TYPE_ECHO_REQUEST;
        body[4..6].copy_from_slice(&1u16.to_be_bytes()); // identifier
        body[6..8].copy_from_slice(&1u16.to_be_bytes()); // sequence
        body[HEADER_LEN..].copy_from_slice(payload);
        let checksum = ip4::checksum16(&body, None);
        body[2..4].copy_from_slice(&checksum.to_be_bytes());
        packet.length = body.len();
        packet.set_payload(0, &body);
        packet.src_address = NetworkAddress::ipv4(127, 0, 0, 1);
        packet.dst_address = NetworkAddress::ipv4(127, 0, 0, 1);
        packet
    }

    #[test]
    fn echo_reply_preserves_payload_and_checksums_to_zero() {
        let payload = b"abcdefghijklmnopqrstuvwxyz012345";
        let mut request = echo_request(payload);
        setup_received(&mut request).unwrap();
        let reply = build_echo_reply(&request, 0);
        let body = &reply.bytes()[0..reply.data_length];
        assert_eq!(&body[HEADER_LEN..], payload);
        assert_eq!(ip4::checksum16(body, None), 0);
    }

    #[test]
    fn reserve_leaves_room_below_the_payload_untouched() {
        let payload = b"ping";
        let mut request = echo_request(payload);
        setup_received(&mut request).unwrap();
        let reserve = 34; // ethernet + ip4 header room
        let reply = build_echo_reply(&request, reserve);
        assert_eq!(reply.data_offset, reserve);
        assert_eq!(&reply.bytes()[0..reserve], &[0u8; 34][..]);
    }
}
