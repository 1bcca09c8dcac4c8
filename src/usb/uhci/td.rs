//! UHCI hardware descriptor layout (spec §3 "Transfer descriptor", §6
//! "TD/QH layout"): the exact 16-byte-aligned `uhciTransDesc` and
//! `uhciQueueHead` shapes the controller's DMA engine reads, plus the
//! software-only shadow fields spec §9 calls for ("prev/next linkage").

use crate::usb::transfer::Pid;

/// Link-pointer flag bits (spec §6: "bit0=TERM, bit1=QHEAD, bit2=DEPTH_FIRST").
pub const LINK_TERMINATE: u32 = 1 << 0;
pub const LINK_QHEAD: u32 = 1 << 1;
pub const LINK_DEPTH_FIRST: u32 = 1 << 2;
const LINK_ADDRESS_MASK: u32 = !0xF;

pub fn link_to(address: u32, flags: u32) -> u32 {
    (address & LINK_ADDRESS_MASK) | (flags & 0xF)
}

pub fn link_terminator() -> u32 {
    LINK_TERMINATE
}

/// Control/status word bits (spec §3 "control/status word").
pub const CS_ACTIVE: u32 = 1 << 23;
pub const CS_IOC: u32 = 1 << 24;
pub const CS_ISOCHRONOUS: u32 = 1 << 25;
pub const CS_LOW_SPEED: u32 = 1 << 26;
const CS_ERROR_COUNT_SHIFT: u32 = 27;
const CS_ERROR_COUNT_MASK: u32 = 0x3 << CS_ERROR_COUNT_SHIFT;
const CS_STATUS_SHIFT: u32 = 16;
const CS_STATUS_MASK: u32 = 0xFF << CS_STATUS_SHIFT;
const CS_ACTUAL_LENGTH_MASK: u32 = 0x7FF;

/// Status byte bits within the control/status word (spec §3: "8-bit status").
pub const STATUS_BITSTUFF: u8 = 1 << 1;
pub const STATUS_CRC_TIMEOUT: u8 = 1 << 2;
pub const STATUS_NAK: u8 = 1 << 3;
pub const STATUS_BABBLE: u8 = 1 << 4;
pub const STATUS_DATA_BUFFER_ERROR: u8 = 1 << 5;
pub const STATUS_STALLED: u8 = 1 << 6;

pub const PID_SETUP: u8 = 0x2D;
pub const PID_IN: u8 = 0x69;
pub const PID_OUT: u8 = 0xE1;

pub fn pid_byte(pid: Pid) -> u8 {
    match pid {
        Pid::Setup => PID_SETUP,
        Pid::In => PID_IN,
        Pid::Out => PID_OUT,
    }
}

/// The 16-byte hardware Transfer Descriptor, 16-byte aligned (spec §3
/// "16-byte aligned hardware descriptor").
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct TransferDescriptor {
    pub link: u32,
    pub control_status: u32,
    pub token: u32,
    pub buffer: u32,
}

const _: () = assert!(core::mem::size_of::<TransferDescriptor>() == 16);

impl TransferDescriptor {
    pub const fn empty() -> Self {
        TransferDescriptor { link: LINK_TERMINATE, control_status: 0, token: 0, buffer: 0 }
    }

    /// Builds the control/status word: active, IOC if requested,
    /// low-speed if requested, 3-bit error count (UHCI always starts
    /// transfers with 3 retries), 11-bit max-length-derived actual-length
    /// field left at 0 until the hardware fills it in.
    pub fn set_control_status(&mut self, active: bool, ioc: bool, low_speed: bool, isochronous: bool) {
        let mut word = self.control_status & !(CS_ACTIVE | CS_IOC | CS_ISOCHRONOUS | CS_LOW_SPEED | CS_ERROR_COUNT_MASK | CS_STATUS_MASK);
        if active {
            word |= CS_ACTIVE;
        }
        if ioc {
            word |= CS_IOC;
        }
        if low_speed {
            word |= CS_LOW_SPEED;
        }
        if isochronous {
            word |= CS_ISOCHRONOUS;
        }
        word |= 0x3 << CS_ERROR_COUNT_SHIFT;
        self.control_status = word;
    }

    pub fn is_active(&self) -> bool {
        self.control_status & CS_ACTIVE != 0
    }

    pub fn status_byte(&self) -> u8 {
        ((self.control_status & CS_STATUS_MASK) >> CS_STATUS_SHIFT) as u8
    }

    pub fn has_error(&self) -> bool {
        self.status_byte() & (STATUS_BITSTUFF | STATUS_CRC_TIMEOUT | STATUS_BABBLE | STATUS_DATA_BUFFER_ERROR | STATUS_STALLED) != 0
    }

    pub fn actual_length(&self) -> usize {
        let raw = self.control_status & CS_ACTUAL_LENGTH_MASK;
        if raw == 0x7FF {
            0
        } else {
            (raw + 1) as usize
        }
    }

    /// Builds the token word: 11-bit max-length-minus-one, toggle bit,
    /// 4-bit endpoint, 7-bit device address, 8-bit PID.
    pub fn set_token(&mut self, max_length: usize, toggle: bool, endpoint: u8, address: u8, pid: Pid) {
        let len_field = if max_length == 0 { 0x7FF } else { (max_length - 1) as u32 & 0x7FF };
        let mut word = len_field << 21;
        if toggle {
            word |= 1 << 19;
        }
        word |= ((endpoint & 0x0F) as u32) << 15;
        word |= ((address & 0x7F) as u32) << 8;
        word |= pid_byte(pid) as u32;
        self.token = word;
    }

    pub fn token_pid(&self) -> u8 {
        (self.token & 0xFF) as u8
    }

    pub fn token_toggle(&self) -> bool {
        self.token & (1 << 19) != 0
    }
}

/// Software-side node wrapping one hardware TD plus the shadow fields
/// spec §3/§9 call for: the virtual buffer backing `hw.buffer`'s physical
/// address, and prev/next linkage used for O(1) removal from a queue
/// (spec §9: "arena + generational index... iterators return indices").
pub struct TdNode {
    pub hw: TransferDescriptor,
    pub buffer: alloc::vec::Vec<u8>,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

impl TdNode {
    pub fn new(hw: TransferDescriptor, buffer: alloc::vec::Vec<u8>) -> Self {
        TdNode { hw, buffer, prev: None, next: None }
    }
}

/// The 8-DWord-minimum Queue Head (link pointer + element pointer; spec §3
/// "11 queue-heads"). Element points either at the head TD of this queue
/// or is terminated.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct QueueHead {
    pub link: u32,
    pub element: u32,
}

const _: () = assert!(core::mem::size_of::<QueueHead>() == 8);

impl QueueHead {
    pub const fn empty() -> Self {
        QueueHead { link: LINK_TERMINATE, element: LINK_TERMINATE }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_pid_and_toggle() {
        let mut td = TransferDescriptor::empty();
        td.set_token(18, true, 0, 1, Pid::In);
        assert_eq!(td.token_pid(), PID_IN);
        assert!(td.token_toggle());
    }

    #[test]
    fn active_flag_round_trips() {
        let mut td = TransferDescriptor::empty();
        assert!(!td.is_active());
        td.set_control_status(true, true, false, false);
        assert!(td.is_active());
    }

    #[test]
    fn error_status_is_detected() {
        let mut td = TransferDescriptor::empty();
        td.control_status |= (STATUS_STALLED as u32) << CS_STATUS_SHIFT;
        assert!(td.has_error());
    }

    #[test]
    fn link_pointer_packs_flags_into_low_bits() {
        let link = link_to(0x1000, LINK_QHEAD | LINK_DEPTH_FIRST);
        assert_eq!(link & LINK_ADDRESS_MASK, 0x1000);
        assert_eq!(link & 0xF, LINK_QHEAD | LINK_DEPTH_FIRST);
    }

    #[test]
    fn actual_length_of_0x7ff_means_zero_bytes() {
        let mut td = TransferDescriptor::empty();
        td.control_status |= CS_ACTUAL_LENGTH_MASK;
        assert_eq!(td.actual_length(), 0);
    }
}
