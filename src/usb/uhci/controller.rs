//! The UHCI host controller driver (spec §4.f "Host controller layout",
//! "Device detection", "Transfers", "Interrupt transfers").
//!
//! Frame list, the 11 queue heads, and a transaction's TD array are all
//! treated as living in identity-mapped, DMA-capable memory — the
//! physical-memory allocator is an out-of-scope collaborator (spec §1),
//! so this driver simply takes the address of whatever `alloc` handed it,
//! the same assumption the rest of this crate makes about low kernel
//! memory before a higher-half split exists.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::lib::error::{KernelError, Result};
use crate::net::arp::Waiter as Delay; // sleep-only half of the same seam `arp`/`dhcp` already use
use crate::port::Port;
use crate::support::rtc;
use crate::usb::device::{DeviceRequest, Endpoint};
use crate::usb::transfer::{self, Pid, Plan, TransferType};
use crate::usb::uhci::td::{self, QueueHead, TdNode, TransferDescriptor};

/// Register offsets from the controller's I/O base (spec §6).
pub const REG_COMMAND: u16 = 0x00;
pub const REG_STATUS: u16 = 0x02;
pub const REG_INTERRUPT_ENABLE: u16 = 0x04;
pub const REG_FRAME_NUMBER: u16 = 0x06;
pub const REG_FRAME_LIST_BASE: u16 = 0x08;
pub const REG_SOF: u16 = 0x0C;
pub const REG_PORT1: u16 = 0x10;
pub const REG_PORT2: u16 = 0x12;

pub const CMD_RUN: u16 = 0x0001;
pub const CMD_HCRESET: u16 = 0x0002;
pub const CMD_GRESET: u16 = 0x0004;
pub const CMD_EGSM: u16 = 0x0008;
pub const CMD_FGR: u16 = 0x0010;
pub const CMD_SWDBG: u16 = 0x0020;
pub const CMD_CF: u16 = 0x0040;
pub const CMD_MAXP: u16 = 0x0080;

pub const STATUS_USBINT: u16 = 0x0001;
pub const STATUS_ERRINT: u16 = 0x0002;
pub const STATUS_RESDET: u16 = 0x0004;
pub const STATUS_HSERROR: u16 = 0x0008;
pub const STATUS_HCPERROR: u16 = 0x0010;
pub const STATUS_HCHALTED: u16 = 0x0020;

/// Interrupt-enable bits: IOC and timeout/CRC (spec §4.f startup: "set
/// interrupt mask (IOC + TIMEOUTCRC)").
pub const INTR_TIMEOUT_CRC: u16 = 0x0001;
pub const INTR_RESUME: u16 = 0x0002;
pub const INTR_IOC: u16 = 0x0004;
pub const INTR_SHORT_PACKET: u16 = 0x0008;

pub const PORT_CONNECT: u16 = 0x0001;
pub const PORT_CONNECT_CHANGE: u16 = 0x0002;
pub const PORT_ENABLED: u16 = 0x0004;
pub const PORT_ENABLE_CHANGE: u16 = 0x0008;
pub const PORT_LINESTATE_MASK: u16 = 0x0030;
pub const PORT_RESUME_DETECT: u16 = 0x0040;
pub const PORT_LOW_SPEED: u16 = 0x0100;
pub const PORT_RESET: u16 = 0x0200;
pub const PORT_SUSPEND: u16 = 0x1000;
pub const PORT_RWC_MASK: u16 = PORT_CONNECT_CHANGE | PORT_ENABLE_CHANGE;

/// 1024 32-bit link pointers, one per USB frame (spec §3 "frame-list table").
pub const FRAME_LIST_SIZE: usize = 1024;
/// The 8 interrupt-interval slots, largest first (spec §3: "{128,64,32,16,8,4,2,1}ms").
pub const INTERRUPT_INTERVALS: [u32; 8] = [128, 64, 32, 16, 8, 4, 2, 1];

const QH_INTERRUPT_BASE: usize = 0;
const QH_CONTROL: usize = 8;
const QH_BULK: usize = 9;
const QH_TERMINATING: usize = 10;
const QH_COUNT: usize = 11;

fn phys_of<T>(r: &T) -> u32 {
    r as *const T as usize as u32
}

/// A `Vec<u8>`'s heap allocation keeps a stable address even as the `Vec`
/// itself (and its owning [`TdNode`]) moves, so this is safe to call once
/// and rely on for the lifetime of the transaction.
fn phys_of_bytes(buf: &[u8]) -> u32 {
    buf.as_ptr() as usize as u32
}

/// One registered interrupt-IN transfer (spec §3 "a list of active
/// interrupt registrations").
pub struct InterruptRegistration {
    pub address: u8,
    pub endpoint: u8,
    pub max_length: usize,
    pub period_ms: u32,
    td: TdNode,
    callback: Box<dyn FnMut(&[u8]) + Send>,
    toggle: bool,
}

pub struct Controller {
    io_base: u16,
    frame_list: Vec<u32>,
    queue_heads: [QueueHead; QH_COUNT],
    registrations: Vec<InterruptRegistration>,
}

impl Controller {
    pub fn new(io_base: u16) -> Self {
        Controller {
            io_base,
            frame_list: alloc::vec![0u32; FRAME_LIST_SIZE],
            queue_heads: [QueueHead::empty(); QH_COUNT],
            registrations: Vec::new(),
        }
    }

    fn command_port(&self) -> Port<u16> {
        Port::new(self.io_base + REG_COMMAND)
    }

    fn status_port(&self) -> Port<u16> {
        Port::new(self.io_base + REG_STATUS)
    }

    /// Reads and clears the status register's sticky bits (spec §6: every
    /// STATUS bit is write-1-to-clear), returning the value seen.
    pub fn take_status(&self) -> u16 {
        let mut reg = self.status_port();
        let status = reg.read();
        if status != 0 {
            reg.write(status);
        }
        status
    }

    pub fn is_halted(&self) -> bool {
        self.status_port().read() & STATUS_HCHALTED != 0
    }

    fn interrupt_enable_port(&self) -> Port<u16> {
        Port::new(self.io_base + REG_INTERRUPT_ENABLE)
    }

    fn frame_list_base_port(&self) -> Port<u32> {
        Port::new(self.io_base + REG_FRAME_LIST_BASE)
    }

    fn port_register(&self, port: u8) -> Port<u16> {
        Port::new(self.io_base + if port == 0 { REG_PORT1 } else { REG_PORT2 })
    }

    /// Startup sequence (spec §4.f): stop, global-reset (100 ms), mask,
    /// wire the frame list to the chained queue heads, start.
    pub fn start(&mut self, delay: &dyn Delay) -> Result<()> {
        let mut cmd = self.command_port();
        cmd.write(cmd.read() & !CMD_RUN);

        cmd.write(CMD_GRESET);
        delay.sleep_ms(100);
        cmd.write(0);

        self.interrupt_enable_port().write(INTR_IOC | INTR_TIMEOUT_CRC);

        self.wire_queue_heads();
        self.wire_frame_list();
        self.frame_list_base_port().write(phys_of(&self.frame_list[0]));

        cmd.write(CMD_RUN | CMD_CF | CMD_MAXP);
        Ok(())
    }

    /// Chains interrupt[128] -> interrupt[64] -> ... -> interrupt[1] ->
    /// control -> bulk -> terminating (spec §4.f: "chain interrupt ->
    /// control -> bulk -> terminating").
    fn wire_queue_heads(&mut self) {
        self.queue_heads[QH_TERMINATING] = QueueHead::empty();
        self.queue_heads[QH_BULK].link = td::link_to(phys_of(&self.queue_heads[QH_TERMINATING]), td::LINK_QHEAD);
        self.queue_heads[QH_BULK].element = td::link_terminator();
        self.queue_heads[QH_CONTROL].link = td::link_to(phys_of(&self.queue_heads[QH_BULK]), td::LINK_QHEAD);
        self.queue_heads[QH_CONTROL].element = td::link_terminator();
        let mut next = phys_of(&self.queue_heads[QH_CONTROL]);
        for i in (0..INTERRUPT_INTERVALS.len()).rev() {
            self.queue_heads[QH_INTERRUPT_BASE + i].link = td::link_to(next, td::LINK_QHEAD);
            self.queue_heads[QH_INTERRUPT_BASE + i].element = td::link_terminator();
            next = phys_of(&self.queue_heads[QH_INTERRUPT_BASE + i]);
        }
    }

    /// Each frame links to the slowest interrupt QH whose interval evenly
    /// divides the frame index (spec §3/§4.f: "wire each frame-list entry
    /// to one of the 8 interrupt queue-heads keyed by frame-index mod
    /// interval"); that QH's own link chain reaches every faster interval
    /// below it, plus control/bulk/terminating.
    fn wire_frame_list(&mut self) {
        for i in 0..FRAME_LIST_SIZE {
            let slot = INTERRUPT_INTERVALS
                .iter()
                .position(|&interval| i as u32 % interval == 0)
                .unwrap_or(INTERRUPT_INTERVALS.len() - 1);
            self.frame_list[i] = td::link_to(phys_of(&self.queue_heads[QH_INTERRUPT_BASE + slot]), td::LINK_QHEAD);
        }
    }

    /// Per-port reset sequence (spec §4.f: "set RESET, wait 50 ms, clear
    /// RESET, wait 10 ms, set ENABLED").
    pub fn reset_port(&self, port: u8, delay: &dyn Delay) {
        let mut reg = self.port_register(port);
        let current = reg.read();
        reg.write(current | PORT_RESET);
        delay.sleep_ms(50);
        reg.write(reg.read() & !PORT_RESET);
        delay.sleep_ms(10);
        reg.write(reg.read() | PORT_ENABLED);
    }

    /// Reads the raw port-status word and clears the RWC (connect/enable
    /// change) bits by writing them back as 1 (spec §6: "RWC mask clears
    /// connect-change|enable-change by writing 1").
    pub fn poll_port(&self, port: u8) -> u16 {
        let mut reg = self.port_register(port);
        let status = reg.read();
        if status & PORT_RWC_MASK != 0 {
            reg.write(status & PORT_RWC_MASK);
        }
        status
    }

    /// Builds and links one transaction's TD chain (spec §4.f steps 1-6),
    /// submits it to the control or bulk QH, and polls until every TD is
    /// inactive, any reports an error, or `timeout_ms` elapses (step 7).
    /// Returns the number of bytes actually transferred into `buffer`
    /// (IN direction) on success.
    pub fn transfer(
        &mut self,
        transfer_type: TransferType,
        address: u8,
        endpoint: &mut Endpoint,
        setup: Option<DeviceRequest>,
        buffer: &mut [u8],
        data_in: bool,
        timeout_ms: u32,
        low_speed: bool,
    ) -> Result<usize> {
        let plan = transfer::plan(transfer_type, buffer.len(), endpoint.max_packet_size, data_in, endpoint.data_toggle);
        let setup_bytes = setup.map(|s| s.to_bytes());
        let out_source: &[u8] = if data_in { &[] } else { buffer };
        let mut nodes = build_chain(&plan, address, endpoint.address(), low_speed, setup_bytes, out_source);

        let qh_index = match transfer_type {
            TransferType::Control => QH_CONTROL,
            _ => QH_BULK,
        };
        let head_addr = phys_of(&nodes[0].hw);
        let save_element = self.queue_heads[qh_index].element;
        self.queue_heads[qh_index].element = td::link_to(head_addr, 0);

        let deadline = rtc::uptime_millis() + timeout_ms as u64;
        let result = loop {
            let all_done = nodes.iter().all(|n| !n.hw.is_active());
            if all_done {
                break Ok(());
            }
            if let Some(errored) = nodes.iter().find(|n| n.hw.has_error()) {
                break Err(classify_error(errored.hw.status_byte()));
            }
            if rtc::uptime_millis() >= deadline {
                break Err(KernelError::Timeout);
            }
        };

        // Dequeue regardless of outcome (spec §4.f step 7: "Dequeue
        // regardless"), restoring the QH's element pointer.
        self.queue_heads[qh_index].element = save_element;

        result?;

        let mut written = 0usize;
        for (i, node) in nodes.iter().enumerate() {
            if plan.tds[i].pid == Pid::In && plan.tds[i].length > 0 {
                let n = node.hw.actual_length().min(node.buffer.len());
                buffer[written..written + n].copy_from_slice(&node.buffer[..n]);
                written += n;
            }
        }

        // Data toggle ends up exactly where the last data-stage TD left it
        // (spec §8 invariant / §3: STATUS forces toggle 1).
        if let Some(last_data) = plan.tds.iter().rev().find(|t| t.pid != Pid::Setup) {
            endpoint.data_toggle = last_data.toggle;
        }
        Ok(written)
    }

    /// `scheduleInterrupt` (spec §4.f): registers a recurring interrupt-IN
    /// transfer on the queue head matching the requested period, rounding
    /// down to the nearest supported interval.
    pub fn schedule_interrupt(
        &mut self,
        address: u8,
        endpoint: &Endpoint,
        period_ms: u32,
        max_length: usize,
        callback: Box<dyn FnMut(&[u8]) + Send>,
    ) -> Result<()> {
        let slot = INTERRUPT_INTERVALS.iter().position(|&i| i <= period_ms).unwrap_or(INTERRUPT_INTERVALS.len() - 1);
        let mut td = TransferDescriptor::empty();
        td.set_token(max_length, false, endpoint.address(), address, Pid::In);
        td.set_control_status(true, true, false, false);
        let node = TdNode::new(td, alloc::vec![0u8; max_length.max(1)]);
        let reg = InterruptRegistration {
            address,
            endpoint: endpoint.number,
            max_length,
            period_ms: INTERRUPT_INTERVALS[slot],
            td: node,
            callback,
            toggle: false,
        };
        let td_addr = phys_of(&reg.td.hw);
        self.registrations.push(reg);
        self.queue_heads[QH_INTERRUPT_BASE + slot].element = td::link_to(td_addr, 0);
        Ok(())
    }

    /// Called each USB-thread tick: for every registration whose TD the
    /// controller has marked inactive, copies the buffer out, invokes the
    /// callback, flips the toggle, and re-arms the TD (spec §4.f
    /// "Interrupt transfers").
    pub fn poll_interrupts(&mut self) {
        for reg in self.registrations.iter_mut() {
            if reg.td.hw.is_active() {
                continue;
            }
            let actual = reg.td.hw.actual_length().min(reg.td.buffer.len());
            (reg.callback)(&reg.td.buffer[..actual]);
            reg.toggle = !reg.toggle;
            reg.td.hw.set_token(reg.max_length, reg.toggle, reg.endpoint & 0x0F, reg.address, Pid::In);
            reg.td.hw.set_control_status(true, true, false, false);
        }
    }

    /// `hotplug(unregister)`: cancels a device's scheduled interrupt
    /// transfers (spec §4.f hot-plug).
    pub fn cancel_interrupts(&mut self, address: u8) {
        self.registrations.retain(|r| r.address != address);
    }
}

fn classify_error(status: u8) -> KernelError {
    if status & td::STATUS_STALLED != 0 {
        KernelError::Io
    } else if status & td::STATUS_CRC_TIMEOUT != 0 {
        KernelError::Timeout
    } else {
        KernelError::Io
    }
}

/// Builds a contiguous, linked TD array from a [`Plan`] (spec §4.f steps
/// 2-6): each node's buffer is populated with the SETUP packet or outbound
/// data this TD actually carries (IN TDs get zeroed scratch space for the
/// hardware to fill), its `buffer` field points at that storage, and its
/// `link` points depth-first at the next node; the final one terminates.
fn build_chain(
    plan: &Plan,
    address: u8,
    endpoint: u8,
    low_speed: bool,
    setup_bytes: Option<[u8; 8]>,
    out_source: &[u8],
) -> Vec<TdNode> {
    let mut out_cursor = 0usize;
    let mut nodes: Vec<TdNode> = plan
        .tds
        .iter()
        .map(|planned| {
            let buf = match planned.pid {
                Pid::Setup => setup_bytes.map(|b| b.to_vec()).unwrap_or_default(),
                Pid::Out if planned.length > 0 => {
                    let chunk = out_source[out_cursor..out_cursor + planned.length].to_vec();
                    out_cursor += planned.length;
                    chunk
                }
                _ => alloc::vec![0u8; planned.length],
            };
            let mut hw = TransferDescriptor::empty();
            hw.set_token(planned.length, planned.toggle, endpoint, address, planned.pid);
            hw.set_control_status(true, true, low_speed, false);
            hw.buffer = phys_of_bytes(&buf);
            TdNode::new(hw, buf)
        })
        .collect();

    for i in 0..nodes.len() {
        let is_last = i + 1 == nodes.len();
        let next_link = if is_last {
            td::link_terminator()
        } else {
            td::link_to(phys_of(&nodes[i + 1].hw), td::LINK_DEPTH_FIRST)
        };
        nodes[i].hw.link = next_link;
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::device::{DeviceRequest, EndpointAttribute};

    struct NoopDelay;
    impl Delay for NoopDelay {
        fn yield_once(&self) {}
        fn sleep_ms(&self, _ms: u64) {}
    }

    #[test]
    fn frame_zero_maps_to_the_slowest_interval_qh() {
        let mut c = Controller::new(0x400);
        c.wire_queue_heads();
        c.wire_frame_list();
        let expected = td::link_to(phys_of(&c.queue_heads[QH_INTERRUPT_BASE]), td::LINK_QHEAD);
        assert_eq!(c.frame_list[0], expected);
    }

    #[test]
    fn odd_frame_maps_to_the_1ms_qh() {
        let mut c = Controller::new(0x400);
        c.wire_queue_heads();
        c.wire_frame_list();
        let expected = td::link_to(phys_of(&c.queue_heads[QH_INTERRUPT_BASE + 7]), td::LINK_QHEAD);
        assert_eq!(c.frame_list[1], expected);
    }

    #[test]
    fn queue_heads_chain_interrupt_through_control_bulk_terminating() {
        let mut c = Controller::new(0x400);
        c.wire_queue_heads();
        assert_eq!(c.queue_heads[QH_CONTROL].link & !0xF, phys_of(&c.queue_heads[QH_BULK]) & !0xF);
        assert_eq!(c.queue_heads[QH_BULK].link & !0xF, phys_of(&c.queue_heads[QH_TERMINATING]) & !0xF);
    }

    #[test]
    fn reset_port_sets_then_clears_reset_and_enables() {
        let c = Controller::new(0x400);
        c.reset_port(0, &NoopDelay);
        let status = c.port_register(0).read();
        assert_eq!(status & PORT_RESET, 0);
        assert_ne!(status & PORT_ENABLED, 0);
    }

    /// Spec §8 scenario 5: GET_DESCRIPTOR plans exactly three TDs; with no
    /// real hardware to complete them a zero-timeout transfer times out,
    /// but still dequeues and restores the control QH's element pointer.
    #[test]
    fn control_transfer_times_out_without_hardware_and_restores_qh_element() {
        let mut c = Controller::new(0x400);
        c.wire_queue_heads();
        crate::support::rtc::init();
        let saved_control_element = c.queue_heads[QH_CONTROL].element;

        let mut ep = crate::usb::device::Endpoint::new(0x80, 64, EndpointAttribute::Control, 0);
        let mut buffer = [0u8; 18];

        let plan = transfer::plan(TransferType::Control, 18, 64, true, false);
        assert_eq!(plan.tds.len(), 3);

        let result = c.transfer(
            TransferType::Control,
            1,
            &mut ep,
            Some(DeviceRequest::get_device_descriptor()),
            &mut buffer,
            true,
            0,
            false,
        );
        assert_eq!(result, Err(KernelError::Timeout));
        assert_eq!(c.queue_heads[QH_CONTROL].element, saved_control_element);
    }

    #[test]
    fn device_request_round_trips_through_setup_td_token() {
        let req = DeviceRequest::get_device_descriptor();
        let bytes = req.to_bytes();
        assert_eq!(bytes.len(), 8);
    }
}
