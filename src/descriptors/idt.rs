//! The Interrupt Descriptor Table.
//!
//! Two gate shapes are installed here: 32-bit interrupt gates (the normal
//! case — control transfers straight to a handler at [`super::SEL_PRIV_CODE`]
//! with interrupts disabled on entry) and task gates (used for the small
//! set of fault handlers that must work even when the current stack is
//! itself the problem, since a task gate's hardware task switch loads a
//! fresh stack from the target TSS before any handler code runs).

use crate::lib::error::{KernelError, Result};
use alloc::vec::Vec;

use super::gdt::RawDescriptor;
use super::IDT_SIZE;

const GATE_INTERRUPT_32: u8 = 0xE;
const GATE_TASK: u8 = 0x5;

pub struct Idt {
    table: Vec<RawDescriptor>,
}

impl Idt {
    pub fn new() -> Self {
        Idt { table: alloc::vec![RawDescriptor::NULL; IDT_SIZE] }
    }

    /// Installs a 32-bit interrupt gate at `vector` calling `handler` at
    /// [`super::SEL_PRIV_CODE`]:`handler`, DPL 0 (only the CPU itself, via
    /// `int`/exception, may invoke it — not user `int n`).
    pub fn set_interrupt_gate(&mut self, vector: u8, handler: u32) -> Result<()> {
        self.set_gate(vector, super::SEL_PRIV_CODE, handler, GATE_INTERRUPT_32, 0)
    }

    /// Installs a task gate at `vector` referencing `tss_selector`; `handler`
    /// offset is unused by task gates (the CPU task-switches to the TSS's
    /// saved EIP instead), so only the selector field is meaningful.
    pub fn set_task_gate(&mut self, vector: u8, tss_selector: u16) -> Result<()> {
        self.set_gate(vector, tss_selector, 0, GATE_TASK, 0)
    }

    fn set_gate(&mut self, vector: u8, selector: u16, offset: u32, kind: u8, dpl: u8) -> Result<()> {
        if dpl > 3 {
            return Err(KernelError::Range);
        }
        let idx = vector as usize;
        self.table[idx] = RawDescriptor {
            seg_size_byte1: (offset & 0xFF) as u8,
            seg_size_byte2: ((offset >> 8) & 0xFF) as u8,
            base_address1: (selector & 0xFF) as u8,
            base_address2: ((selector >> 8) & 0xFF) as u8,
            base_address3: 0,
            base_address4: (kind & 0x0F) | (1 << 7) | ((dpl & 0x3) << 5),
            attributes1: ((offset >> 16) & 0xFF) as u8,
            attributes2: ((offset >> 24) & 0xFF) as u8,
        };
        Ok(())
    }

    pub fn get(&self, vector: u8) -> RawDescriptor {
        self.table[vector as usize]
    }

    fn decoded_selector(raw: RawDescriptor) -> u16 {
        (raw.base_address1 as u16) | ((raw.base_address2 as u16) << 8)
    }

    fn decoded_kind(raw: RawDescriptor) -> u8 {
        raw.base_address4 & 0x0F
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_gate_targets_privileged_code_selector() {
        let mut idt = Idt::new();
        idt.set_interrupt_gate(14, 0x0010_0000).unwrap();
        let raw = idt.get(14);
        assert_eq!(Idt::decoded_selector(raw), super::super::SEL_PRIV_CODE);
        assert_eq!(Idt::decoded_kind(raw), GATE_INTERRUPT_32);
    }

    #[test]
    fn task_gate_references_tss_selector() {
        let mut idt = Idt::new();
        idt.set_task_gate(8, 0x0048).unwrap();
        let raw = idt.get(8);
        assert_eq!(Idt::decoded_selector(raw), 0x0048);
        assert_eq!(Idt::decoded_kind(raw), GATE_TASK);
    }

    #[test]
    fn boundary_vectors_are_settable() {
        let mut idt = Idt::new();
        assert_eq!(idt.set_interrupt_gate(255, 0).and(idt.set_interrupt_gate(0, 0)), Ok(()));
    }
}
