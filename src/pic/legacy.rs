//! The legacy 8259A PIC cascade.
//!
//! Two chips, master at I/O 0x20/0x21 and slave at 0xA0/0xA1, cascaded
//! through the master's IRQ2 line. Remapped at init so IRQ 0..15 land on
//! IDT vectors 32..47 — the BIOS default (0..15) collides with the CPU's
//! own exception vectors, which is exactly the bug this remap exists to
//! avoid. Constants and the ICW1..4 sequence reinstated from
//! `kernelPic.c`.

use pic8259::ChainedPics;
use spin::Mutex;

use crate::port::Port;

pub const MASTER_COMMAND: u16 = 0x20;
pub const MASTER_DATA: u16 = 0x21;
pub const SLAVE_COMMAND: u16 = 0xA0;
pub const SLAVE_DATA: u16 = 0xA1;

/// First vector the master PIC's IRQ 0 is remapped to.
pub const PIC_1_OFFSET: u8 = 32;
/// First vector the slave PIC's IRQ 8 is remapped to.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// OCW3: read the in-service register on the next read of the command port.
const OCW3_READ_ISR: u8 = 0x0B;

pub struct LegacyPic {
    pics: Mutex<ChainedPics>,
}

impl LegacyPic {
    /// # Safety
    /// Must be called exactly once at boot, before interrupts are enabled,
    /// with both chips otherwise untouched since power-on.
    pub const unsafe fn new() -> Self {
        LegacyPic { pics: Mutex::new(ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET)) }
    }

    /// Runs the ICW1..4 initialization sequence and unmasks nothing (every
    /// line starts masked; drivers unmask their own IRQ on registration).
    ///
    /// # Safety
    /// Must run before any maskable interrupt can fire.
    pub unsafe fn initialize(&self) {
        self.pics.lock().initialize();
    }

    fn read_isr(&self) -> u16 {
        let mut master_cmd: Port<u8> = Port::new(MASTER_COMMAND);
        let mut slave_cmd: Port<u8> = Port::new(SLAVE_COMMAND);
        master_cmd.write(OCW3_READ_ISR);
        slave_cmd.write(OCW3_READ_ISR);
        let master = master_cmd.read() as u16;
        let slave = slave_cmd.read() as u16;
        master | (slave << 8)
    }
}

impl super::PicOps for LegacyPic {
    fn mask(&self, irq: u8) {
        // The initialization handshake through `self.pics` owns the
        // command ports; the OCW1 mask register at each chip's data port
        // is ours to read-modify-write directly.
        let _guard = self.pics.lock();
        let (mut port, bit): (Port<u8>, u8) = if irq < 8 {
            (Port::new(MASTER_DATA), irq)
        } else {
            (Port::new(SLAVE_DATA), irq - 8)
        };
        let current = port.read();
        port.write(current | (1 << bit));
    }

    fn unmask(&self, irq: u8) {
        let _guard = self.pics.lock();
        let (mut port, bit): (Port<u8>, u8) = if irq < 8 {
            (Port::new(MASTER_DATA), irq)
        } else {
            (Port::new(SLAVE_DATA), irq - 8)
        };
        let current = port.read();
        port.write(current & !(1 << bit));
    }

    fn end_of_interrupt(&self, irq: u8) {
        let vector = PIC_1_OFFSET + irq;
        unsafe { self.pics.lock().notify_end_of_interrupt(vector) };
    }

    fn vector_for_irq(&self, irq: u8) -> u8 {
        if irq < 8 { PIC_1_OFFSET + irq } else { PIC_2_OFFSET + (irq - 8) }
    }

    fn in_service(&self) -> u16 {
        self.read_isr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pic::PicOps;

    #[test]
    fn vector_mapping_follows_the_3245_remap() {
        let pic = unsafe { LegacyPic::new() };
        assert_eq!(pic.vector_for_irq(0), 32);
        assert_eq!(pic.vector_for_irq(8), 40);
        assert_eq!(pic.vector_for_irq(15), 47);
    }
}
