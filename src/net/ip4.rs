//! IPv4 header encode/decode and checksum (spec §4.g receive pipeline /
//! transmit pipeline, grounded on `kernelNetworkIp4.c`).

use crate::lib::error::{KernelError, Result};
use crate::net::address::NetworkAddress;
use crate::net::packet::{NetProtocol, Packet, TransProtocol};

pub const HEADER_LEN: usize = 20;
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_UDP: u8 = 17;

/// One's-complement sum of 16-bit words, skipping the checksum field at
/// byte offset 10 (word index 5) when `skip_checksum_word` is set —
/// `ipChecksum()` in the original driver.
pub fn checksum16(header: &[u8], skip_word: Option<usize>) -> u16 {
    let mut sum: u32 = 0;
    for (i, chunk) in header.chunks(2).enumerate() {
        if Some(i) == skip_word {
            continue;
        }
        let word = if chunk.len() == 2 { u16::from_be_bytes([chunk[0], chunk[1]]) } else { (chunk[0] as u16) << 8 };
        sum += word as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn trans_protocol_of(byte: u8) -> TransProtocol {
    match byte {
        PROTO_ICMP => TransProtocol::Icmp,
        PROTO_UDP => TransProtocol::Udp,
        6 => TransProtocol::Tcp,
        _ => TransProtocol::None,
    }
}

/// Validates and interprets a received IPv4 header in place, mirroring
/// `kernelNetworkIp4SetupReceivedPacket`: header-length sanity, checksum,
/// src/dst copy, trimming `length` to the header's own `totalLength`, and
/// setting up the transport header offset.
pub fn setup_received(packet: &mut Packet) -> Result<()> {
    let net_off = packet.net_header_offset;
    if packet.bytes().len() < net_off + HEADER_LEN {
        return Err(KernelError::Range);
    }
    let header = &packet.bytes()[net_off..net_off + HEADER_LEN];
    let version_ihl = header[0];
    let header_bytes = ((version_ihl & 0x0F) as usize) * 4;
    if header_bytes < HEADER_LEN || net_off + header_bytes > packet.length {
        return Err(KernelError::Range);
    }

    let full_header = &packet.bytes()[net_off..net_off + header_bytes];
    let claimed = u16::from_be_bytes([full_header[10], full_header[11]]);
    if claimed != checksum16(full_header, Some(5)) {
        return Err(KernelError::BadData);
    }

    let src = [full_header[12], full_header[13], full_header[14], full_header[15]];
    let dst = [full_header[16], full_header[17], full_header[18], full_header[19]];
    packet.src_address = NetworkAddress::from_ipv4_slice(&src);
    packet.dst_address = NetworkAddress::from_ipv4_slice(&dst);

    let total_length = u16::from_be_bytes([full_header[2], full_header[3]]) as usize;
    packet.length = net_off + total_length;
    packet.net_protocol = NetProtocol::Ip4;
    packet.trans_protocol = trans_protocol_of(full_header[9]);
    packet.trans_header_offset = net_off + header_bytes;
    packet.data_offset = packet.trans_header_offset;
    packet.data_length = packet.length.saturating_sub(packet.data_offset);
    Ok(())
}

/// Prepends a 20-byte IPv4 header immediately below the transport header
/// (or below the data, if there is no transport header — e.g. ICMP, which
/// folds its header into what IPv4 considers "data"), matching
/// `kernelNetworkIp4PrependHeader`: fixed `version_ihl=0x45`, TTL 64, no
/// fragmentation options, checksum computed immediately (the `id` field is
/// filled in later by [`finalize_send`]).
///
/// Callers must set `packet.data_offset` to a high-enough value before
/// writing their payload to leave room for every header prepended below it
/// — this writes *below* the existing boundary rather than at it, so nothing
/// already written there is clobbered (the same convention
/// [`crate::net::ethernet::prepend_header`] uses one layer further out).
pub fn prepend_header(packet: &mut Packet, src: NetworkAddress, dst: NetworkAddress) {
    let boundary = match packet.trans_protocol {
        TransProtocol::None => packet.data_offset,
        _ => packet.trans_header_offset,
    };
    let at = boundary.saturating_sub(HEADER_LEN);
    packet.net_header_offset = at;
    let mut header = [0u8; HEADER_LEN];
    header[0] = 0x45;
    header[1] = 0; // type of service
    let total_len = ((packet.data_offset + packet.data_length) - at) as u16;
    header[2..4].copy_from_slice(&total_len.to_be_bytes());
    header[4..6].copy_from_slice(&0u16.to_be_bytes()); // identification, stamped by finalize_send
    header[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags/frag offset
    header[8] = 64; // TTL
    header[9] = match packet.trans_protocol {
        TransProtocol::Icmp => PROTO_ICMP,
        TransProtocol::Udp => PROTO_UDP,
        TransProtocol::Tcp => 6,
        TransProtocol::None => 0,
    };
    header[12..16].copy_from_slice(&src.ipv4_octets());
    header[16..20].copy_from_slice(&dst.ipv4_octets());
    let sum = checksum16(&header, Some(5));
    header[10..12].copy_from_slice(&sum.to_be_bytes());

    packet.set_payload(at, &header);
}

/// `kernelNetworkIp4FinalizeSendPacket`: stamps the per-connection rolling
/// identification counter and recomputes `totalLength`/checksum once the
/// transport layer has finished writing its own header and payload.
pub fn finalize_send(packet: &mut Packet, identification: u16) {
    let net_off = packet.net_header_offset;
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&packet.bytes()[net_off..net_off + HEADER_LEN]);
    header[4..6].copy_from_slice(&identification.to_be_bytes());
    let total_len = (packet.data_offset - net_off) + packet.data_length;
    header[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    header[10..12].copy_from_slice(&0u16.to_be_bytes());
    let sum = checksum16(&header, Some(5));
    header[10..12].copy_from_slice(&sum.to_be_bytes());
    packet.set_payload(net_off, &header);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packet::Packet;

    #[test]
    fn round_trip_checksum_recomputes_to_zero() {
        let mut packet = Packet::boxed();
        packet.trans_protocol = TransProtocol::None;
        packet.data_offset = HEADER_LEN;
        packet.data_length = 8;
        prepend_header(&mut packet, NetworkAddress::ipv4(10, 0, 0, 1), NetworkAddress::ipv4(10, 0, 0, 2));
        finalize_send(&mut packet, 7);
        let header = &packet.bytes()[0..HEADER_LEN];
        assert_eq!(checksum16(header, None), 0);
    }

    #[test]
    fn prepend_header_does_not_clobber_payload_already_written() {
        let mut packet = Packet::boxed();
        packet.trans_protocol = TransProtocol::None;
        packet.data_offset = HEADER_LEN;
        packet.data_length = 4;
        packet.set_payload(HEADER_LEN, b"ping");
        prepend_header(&mut packet, NetworkAddress::ipv4(10, 0, 0, 1), NetworkAddress::ipv4(10, 0, 0, 2));
        assert_eq!(&packet.bytes()[HEADER_LEN..HEADER_LEN + 4], b"ping");
    }

    #[test]
    fn setup_received_rejects_bad_checksum() {
        let mut packet = Packet::boxed();
        packet.length = HEADER_LEN;
        packet.bytes_mut()[0] = 0x45;
        packet.bytes_mut()[10] = 0xFF;
        packet.bytes_mut()[11] = 0xFF;
        assert_eq!(setup_received(&mut packet), Err(KernelError::BadData));
    }
}
