//! DHCP client (spec §4.g `dhcpConfigure`; grounded on `kernelNetworkDhcp.c`,
//! whose struct layout and option-walking helpers this reconstructs from
//! RFC 2131's BOOTP/DHCP wire format since the original header wasn't part
//! of the retrieved source).

use alloc::string::String;
use alloc::vec::Vec;

use crate::lib::error::{KernelError, Result};
use crate::net::address::NetworkAddress;
use crate::net::arp::Waiter;
use crate::net::device::{DeviceFlags, NetworkDevice, NetworkDeviceOps};
use crate::net::ethernet;
use crate::net::ip4;
use crate::net::packet::{LinkProtocol, Packet, TransProtocol};
use crate::net::udp;
use crate::support::{prng, rtc};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;
pub const MAGIC_COOKIE: u32 = 0x6382_5363;

const FIXED_LEN: usize = 240;
/// `NETWORK_DHCP_OPTIONS_LEN` — the ceiling a caller should keep a
/// serialized message under; the in-memory representation below only grows
/// as large as the options actually present.
pub const OPTIONS_LEN: usize = 312;
pub const PACKET_LEN: usize = FIXED_LEN + OPTIONS_LEN;

const OFF_OP: usize = 0;
const OFF_HTYPE: usize = 1;
const OFF_HLEN: usize = 2;
const OFF_XID: usize = 4;
const OFF_CIADDR: usize = 12;
const OFF_YIADDR: usize = 16;
const OFF_CHADDR: usize = 28;
const OFF_COOKIE: usize = 236;

pub const OP_BOOTREQUEST: u8 = 1;
pub const OP_BOOTREPLY: u8 = 2;
pub const HARDWARE_ETHERNET: u8 = 1;

pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNSSERVER: u8 = 6;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_DOMAIN: u8 = 15;
pub const OPT_BROADCAST: u8 = 28;
pub const OPT_ADDRESSREQ: u8 = 50;
pub const OPT_LEASETIME: u8 = 51;
pub const OPT_MSGTYPE: u8 = 53;
pub const OPT_PARAMREQ: u8 = 55;
pub const OPT_END: u8 = 255;

pub const MSG_DISCOVER: u8 = 1;
pub const MSG_OFFER: u8 = 2;
pub const MSG_REQUEST: u8 = 3;
pub const MSG_DECLINE: u8 = 4;
pub const MSG_ACK: u8 = 5;
pub const MSG_NAK: u8 = 6;
pub const MSG_RELEASE: u8 = 7;

/// How long to wait for an OFFER or ACK/NAK before retrying (spec §4.g:
/// "wait up to ~1.5 s").
pub const REPLY_TIMEOUT_MS: u64 = 1500;
/// `NETWORK_DHCP_DEFAULT_TIMEOUT`, the default overall budget for
/// [`configure`] when a caller doesn't have its own preference.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// A BOOTP/DHCP message: the 240-byte fixed header plus a variable options
/// area, terminated by an `END` tag. Grows only as large as the options
/// actually set rather than always allocating the full [`PACKET_LEN`].
#[derive(Clone)]
pub struct DhcpMessage {
    data: Vec<u8>,
}

impl DhcpMessage {
    pub fn new(op: u8, xid: u32, chaddr: [u8; 6]) -> Self {
        let mut data = alloc::vec![0u8; FIXED_LEN];
        data[OFF_OP] = op;
        data[OFF_HTYPE] = HARDWARE_ETHERNET;
        data[OFF_HLEN] = 6;
        data[OFF_XID..OFF_XID + 4].copy_from_slice(&xid.to_be_bytes());
        data[OFF_CHADDR..OFF_CHADDR + 6].copy_from_slice(&chaddr);
        data[OFF_COOKIE..OFF_COOKIE + 4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        data.push(OPT_END);
        DhcpMessage { data }
    }

    /// Parses a received message, stopping at the first `END` tag so
    /// trailing padding in the UDP datagram doesn't become part of it.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < FIXED_LEN + 1 {
            return None;
        }
        let cookie = u32::from_be_bytes(raw[OFF_COOKIE..OFF_COOKIE + 4].try_into().unwrap());
        if cookie != MAGIC_COOKIE {
            return None;
        }
        let mut pos = FIXED_LEN;
        loop {
            if pos >= raw.len() {
                return None;
            }
            let code = raw[pos];
            if code == OPT_END {
                pos += 1;
                break;
            }
            if code == OPT_PAD {
                pos += 1;
                continue;
            }
            if pos + 1 >= raw.len() {
                return None;
            }
            let len = raw[pos + 1] as usize;
            pos += 2 + len;
        }
        Some(DhcpMessage { data: raw[..pos].to_vec() })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn xid(&self) -> u32 {
        u32::from_be_bytes(self.data[OFF_XID..OFF_XID + 4].try_into().unwrap())
    }

    pub fn yiaddr(&self) -> [u8; 4] {
        self.data[OFF_YIADDR..OFF_YIADDR + 4].try_into().unwrap()
    }

    pub fn ciaddr(&self) -> [u8; 4] {
        self.data[OFF_CIADDR..OFF_CIADDR + 4].try_into().unwrap()
    }

    /// Advances past one TLV (or one `PAD`/`END` byte) starting at `pos` —
    /// `nextOption` in the original.
    fn next_option_offset(&self, pos: usize) -> usize {
        let code = self.data[pos];
        if code == OPT_PAD || code == OPT_END {
            pos + 1
        } else {
            pos + 2 + self.data[pos + 1] as usize
        }
    }

    /// `getSpecificDhcpOption`: linear scan by code, stopping at `END`.
    pub fn option(&self, code: u8) -> Option<&[u8]> {
        let mut pos = FIXED_LEN;
        loop {
            let c = self.data[pos];
            if c == OPT_END {
                return None;
            }
            if c == OPT_PAD {
                pos += 1;
                continue;
            }
            let len = self.data[pos + 1] as usize;
            if c == code {
                return Some(&self.data[pos + 2..pos + 2 + len]);
            }
            pos = self.next_option_offset(pos);
        }
    }

    /// `getDhcpOption(idx)`: the option at declaration-order index `idx`,
    /// used to check "the first option is the message type" the way the
    /// original validates a reply before trusting it.
    pub fn option_at(&self, index: usize) -> Option<(u8, &[u8])> {
        let mut pos = FIXED_LEN;
        for _ in 0..index {
            if self.data[pos] == OPT_END {
                return None;
            }
            pos = self.next_option_offset(pos);
        }
        let code = self.data[pos];
        if code == OPT_END {
            return None;
        }
        if code == OPT_PAD {
            return Some((OPT_PAD, &[]));
        }
        let len = self.data[pos + 1] as usize;
        Some((code, &self.data[pos + 2..pos + 2 + len]))
    }

    pub fn message_type(&self) -> Option<u8> {
        self.option(OPT_MSGTYPE).and_then(|v| v.first().copied())
    }

    /// `deleteDhcpOption`: removes one TLV by code, shifting everything
    /// after it left — a no-op if the code isn't present.
    pub fn delete_option(&mut self, code: u8) {
        let mut pos = FIXED_LEN;
        while pos < self.data.len() {
            let c = self.data[pos];
            if c == OPT_END {
                return;
            }
            if c == OPT_PAD {
                pos += 1;
                continue;
            }
            let len = self.data[pos + 1] as usize;
            if c == code {
                let tail_len = self.data.len() - (pos + 2 + len);
                self.data.copy_within(pos + 2 + len..pos + 2 + len + tail_len, pos);
                self.data.truncate(self.data.len() - (2 + len));
                return;
            }
            pos += 2 + len;
        }
    }

    /// `setDhcpOption`: deletes any existing option with this code, then
    /// inserts the new TLV immediately before the terminating `END`.
    pub fn set_option(&mut self, code: u8, value: &[u8]) {
        self.delete_option(code);
        let end = self.data.len() - 1;
        let mut tlv = alloc::vec![code, value.len() as u8];
        tlv.extend_from_slice(value);
        self.data.splice(end..end, tlv);
    }
}

fn broadcast(dev: &mut NetworkDevice, msg: &DhcpMessage) -> Result<()> {
    let reserve = crate::net::udp_reserve(dev.link_protocol);
    let packet = crate::net::build_udp_datagram(CLIENT_PORT, SERVER_PORT, msg.bytes(), reserve);
    crate::net::transmit_immediate(dev, packet, NetworkAddress::ipv4(255, 255, 255, 255), 0)
}

fn send_discover(dev: &mut NetworkDevice, xid: u32) -> Result<()> {
    let mut msg = DhcpMessage::new(OP_BOOTREQUEST, xid, dev.hardware_address.ethernet_octets());
    msg.set_option(OPT_MSGTYPE, &[MSG_DISCOVER]);
    msg.set_option(OPT_LEASETIME, &0xFFFF_FFFFu32.to_be_bytes());
    msg.set_option(OPT_PARAMREQ, &[OPT_SUBNET, OPT_ROUTER, OPT_DNSSERVER, OPT_HOSTNAME, OPT_DOMAIN, OPT_BROADCAST, OPT_LEASETIME]);
    broadcast(dev, &msg)
}

fn send_request(dev: &mut NetworkDevice, xid: u32, offer: &DhcpMessage, host_name: Option<&str>, domain_name: Option<&str>) -> Result<()> {
    let mut msg = DhcpMessage::new(OP_BOOTREQUEST, xid, dev.hardware_address.ethernet_octets());
    msg.set_option(OPT_MSGTYPE, &[MSG_REQUEST]);
    msg.set_option(OPT_ADDRESSREQ, &offer.yiaddr());
    if let Some(name) = host_name {
        msg.set_option(OPT_HOSTNAME, name.as_bytes());
    }
    if let Some(name) = domain_name {
        msg.set_option(OPT_DOMAIN, name.as_bytes());
    }
    broadcast(dev, &msg)
}

/// `kernelNetworkDhcpRelease`: rebuilds the saved ACK as a RELEASE and sends
/// it, clearing the assigned addresses and AUTOCONF flag (spec §4.g
/// "stopping a device sends a RELEASE ... and clears the assigned
/// addresses").
pub fn release(dev: &mut NetworkDevice) -> Result<()> {
    if let Some(raw) = dev.dhcp_last_ack.take() {
        if let Some(ack) = DhcpMessage::from_bytes(&raw) {
            let mut msg = DhcpMessage::new(OP_BOOTREQUEST, ack.xid(), dev.hardware_address.ethernet_octets());
            msg.set_option(OPT_MSGTYPE, &[MSG_RELEASE]);
            let _ = broadcast(dev, &msg);
        }
    }
    dev.flags.remove(DeviceFlags::AUTOCONF);
    dev.host_address = NetworkAddress::zero();
    dev.netmask = NetworkAddress::zero();
    dev.gateway_address = NetworkAddress::zero();
    dev.dns_address = NetworkAddress::zero();
    dev.broadcast_address = NetworkAddress::zero();
    dev.host_name = None;
    dev.domain_name = None;
    dev.lease_expiry_uptime_secs = None;
    Ok(())
}

fn decode_reply(packet: &mut Packet, xid: u32, accept: &[u8]) -> Option<DhcpMessage> {
    let ethertype = ethernet::setup_received(packet)?;
    if ethertype != ethernet::ETHERTYPE_IP4 {
        return None;
    }
    ip4::setup_received(packet).ok()?;
    if packet.trans_protocol != TransProtocol::Udp {
        return None;
    }
    udp::setup_received(packet).ok()?;
    if packet.src_port != SERVER_PORT || packet.dst_port != CLIENT_PORT {
        return None;
    }
    let body = &packet.bytes()[packet.data_offset..packet.data_offset + packet.data_length];
    let msg = DhcpMessage::from_bytes(body)?;
    if msg.xid() != xid {
        return None;
    }
    let mt = msg.message_type()?;
    if accept.contains(&mt) {
        Some(msg)
    } else {
        None
    }
}

/// Drains whatever the driver has ready and checks it for a DHCP reply
/// matching `xid`/`accept`, for up to `timeout_ms`. The device is not
/// `RUNNING` during negotiation (spec §4.g: "stop the device so the
/// network thread will not steal replies"), so nothing else is draining
/// `dev.input` concurrently.
fn wait_for_message(dev: &mut NetworkDevice, xid: u32, accept: &[u8], timeout_ms: u64, waiter: &dyn Waiter) -> Option<DhcpMessage> {
    let deadline = rtc::uptime_millis() + timeout_ms;
    loop {
        let ops = dev.ops;
        ops.driver_interrupt(dev);
        while let Some(mut packet) = dev.input.pop_front() {
            if let Some(reply) = decode_reply(&mut packet, xid, accept) {
                return Some(reply);
            }
        }
        if rtc::uptime_millis() >= deadline {
            return None;
        }
        waiter.sleep_ms(50);
    }
}

fn apply_ack(dev: &mut NetworkDevice, ack: &DhcpMessage) {
    dev.host_address = NetworkAddress::from_ipv4_slice(&ack.yiaddr());
    if let Some(v) = ack.option(OPT_SUBNET) {
        if v.len() == 4 {
            dev.netmask = NetworkAddress::from_ipv4_slice(&v.try_into().unwrap());
        }
    }
    if let Some(v) = ack.option(OPT_ROUTER) {
        if v.len() >= 4 {
            dev.gateway_address = NetworkAddress::from_ipv4_slice(&v[0..4].try_into().unwrap());
        }
    }
    if let Some(v) = ack.option(OPT_DNSSERVER) {
        if v.len() >= 4 {
            dev.dns_address = NetworkAddress::from_ipv4_slice(&v[0..4].try_into().unwrap());
        }
    }
    if let Some(v) = ack.option(OPT_BROADCAST) {
        if v.len() == 4 {
            dev.broadcast_address = NetworkAddress::from_ipv4_slice(&v.try_into().unwrap());
        }
    }
    if let Some(v) = ack.option(OPT_HOSTNAME) {
        dev.host_name = core::str::from_utf8(v).ok().map(String::from);
    }
    if let Some(v) = ack.option(OPT_DOMAIN) {
        dev.domain_name = core::str::from_utf8(v).ok().map(String::from);
    }
    let lease_secs = ack
        .option(OPT_LEASETIME)
        .and_then(|v| <[u8; 4]>::try_from(v).ok())
        .map(u32::from_be_bytes)
        .unwrap_or(0) as u64;
    dev.lease_expiry_uptime_secs = Some(rtc::uptime_seconds() + lease_secs);
    dev.dhcp_last_ack = Some(ack.bytes().to_vec());
}

/// `dhcpConfigure(device, host, domain, timeout)` (spec §4.g): negotiates
/// (or renews) a lease, applying the result to `dev` on success.
pub fn configure(dev: &mut NetworkDevice, host_name: Option<&str>, domain_name: Option<&str>, timeout_ms: u64, waiter: &dyn Waiter) -> Result<()> {
    if dev.link_protocol != LinkProtocol::Ethernet {
        return Err(KernelError::Invalid);
    }
    dev.flags.remove(DeviceFlags::RUNNING);
    waiter.yield_once();

    let xid = prng::next_u32();
    let budget = if timeout_ms == 0 { DEFAULT_TIMEOUT_MS } else { timeout_ms };
    let deadline = rtc::uptime_millis() + budget;

    loop {
        if rtc::uptime_millis() >= deadline {
            crate::warn!("DHCP timed out on {}", dev.name);
            return Err(KernelError::Timeout);
        }

        let offer = match dev.dhcp_last_ack.clone().and_then(|raw| DhcpMessage::from_bytes(&raw)) {
            Some(template) => Some(template),
            None => {
                send_discover(dev, xid)?;
                wait_for_message(dev, xid, &[MSG_OFFER], REPLY_TIMEOUT_MS, waiter)
            }
        };
        let offer = match offer {
            Some(o) => o,
            None => continue,
        };

        send_request(dev, xid, &offer, host_name, domain_name)?;
        match wait_for_message(dev, xid, &[MSG_ACK, MSG_NAK], REPLY_TIMEOUT_MS, waiter) {
            Some(reply) if reply.message_type() == Some(MSG_ACK) => {
                apply_ack(dev, &reply);
                dev.flags.insert(DeviceFlags::RUNNING | DeviceFlags::AUTOCONF);
                return Ok(());
            }
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_carries_cookie_chaddr_and_a_bare_end() {
        let msg = DhcpMessage::new(OP_BOOTREQUEST, 0x1234_5678, [1, 2, 3, 4, 5, 6]);
        assert_eq!(msg.xid(), 0x1234_5678);
        assert_eq!(msg.bytes()[FIXED_LEN], OPT_END);
        assert_eq!(msg.bytes().len(), FIXED_LEN + 1);
    }

    #[test]
    fn set_then_get_option_round_trips() {
        let mut msg = DhcpMessage::new(OP_BOOTREQUEST, 1, [0; 6]);
        msg.set_option(OPT_MSGTYPE, &[MSG_DISCOVER]);
        msg.set_option(OPT_PARAMREQ, &[OPT_SUBNET, OPT_ROUTER]);
        assert_eq!(msg.option(OPT_MSGTYPE), Some(&[MSG_DISCOVER][..]));
        assert_eq!(msg.option(OPT_PARAMREQ), Some(&[OPT_SUBNET, OPT_ROUTER][..]));
        assert_eq!(msg.message_type(), Some(MSG_DISCOVER));
        assert_eq!(msg.option_at(0), Some((OPT_MSGTYPE, &[MSG_DISCOVER][..])));
    }

    #[test]
    fn set_option_replaces_rather_than_duplicates() {
        let mut msg = DhcpMessage::new(OP_BOOTREQUEST, 1, [0; 6]);
        msg.set_option(OPT_MSGTYPE, &[MSG_DISCOVER]);
        msg.set_option(OPT_MSGTYPE, &[MSG_REQUEST]);
        assert_eq!(msg.option(OPT_MSGTYPE), Some(&[MSG_REQUEST][..]));
        assert_eq!(msg.bytes().len(), FIXED_LEN + 3 + 1);
    }

    #[test]
    fn delete_option_shifts_remaining_bytes_left() {
        let mut msg = DhcpMessage::new(OP_BOOTREQUEST, 1, [0; 6]);
        msg.set_option(OPT_MSGTYPE, &[MSG_DISCOVER]);
        msg.set_option(OPT_HOSTNAME, b"host");
        msg.delete_option(OPT_MSGTYPE);
        assert_eq!(msg.option(OPT_MSGTYPE), None);
        assert_eq!(msg.option(OPT_HOSTNAME), Some(&b"host"[..]));
    }

    #[test]
    fn from_bytes_rejects_wrong_cookie() {
        let data = alloc::vec![0u8; FIXED_LEN + 1];
        assert!(DhcpMessage::from_bytes(&data).is_none());
    }

    #[test]
    fn from_bytes_stops_at_end_tag_ignoring_trailing_padding() {
        let mut msg = DhcpMessage::new(OP_BOOTREPLY, 7, [9; 6]);
        msg.set_option(OPT_MSGTYPE, &[MSG_ACK]);
        let mut raw = msg.bytes().to_vec();
        raw.extend_from_slice(&[0u8; 16]); // trailing datagram padding
        let parsed = DhcpMessage::from_bytes(&raw).unwrap();
        assert_eq!(parsed.bytes().len(), msg.bytes().len());
        assert_eq!(parsed.xid(), 7);
    }

    #[test]
    fn non_ethernet_device_is_rejected() {
        use crate::net::loopback::LoopbackOps;
        static LOOP_OPS: LoopbackOps = LoopbackOps;
        struct NoopWaiter;
        impl Waiter for NoopWaiter {
            fn yield_once(&self) {}
            fn sleep_ms(&self, _ms: u64) {}
        }
        let mut dev = NetworkDevice::new(String::from("loop"), LinkProtocol::Loop, &LOOP_OPS);
        assert_eq!(configure(&mut dev, None, None, 1000, &NoopWaiter), Err(KernelError::Invalid));
    }
}
