//! The Global Descriptor Table and its free-list allocator.
//!
//! A [`Gdt`] owns `GDT_SIZE` raw 8-byte descriptor slots. The first
//! [`super::RES_GLOBAL_DESCRIPTORS`] are reserved at boot (see
//! [`super`]'s module doc); everything past that is a free list of slot
//! indices handed out by [`Gdt::request`] and returned by [`Gdt::release`].
//! Each alive process owns exactly one such slot for its TSS descriptor
//! (spec §3 invariant: process table size == GDT size − reserved).

use crate::lib::error::{KernelError, Result};
use alloc::vec::Vec;

use super::{GDT_SIZE, RES_GLOBAL_DESCRIPTORS};

/// The raw 8-byte packed descriptor layout, byte-for-byte as the CPU reads
/// it off the GDT/IDT/LDT. Field names follow `kernelDescriptor.h`.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDescriptor {
    pub seg_size_byte1: u8,
    pub seg_size_byte2: u8,
    pub base_address1: u8,
    pub base_address2: u8,
    pub base_address3: u8,
    pub base_address4: u8,
    pub attributes1: u8,
    pub attributes2: u8,
}

const _: () = assert!(core::mem::size_of::<RawDescriptor>() == 8);

impl RawDescriptor {
    pub const NULL: RawDescriptor = RawDescriptor {
        seg_size_byte1: 0,
        seg_size_byte2: 0,
        base_address1: 0,
        base_address2: 0,
        base_address3: 0,
        base_address4: 0,
        attributes1: 0,
        attributes2: 0,
    };
}

/// The descriptor "type" field (bits 8..11 of a segment descriptor, or the
/// whole low nibble of a system descriptor's type byte). Only the values
/// this kernel actually installs are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    Data = 0x2,
    Code = 0xA,
    Tss = 0x9,
    TssBusy = 0xB,
    CallGate = 0xC,
    TaskGate = 0x5,
    InterruptGate = 0xE,
}

/// Parameters accepted by [`Gdt::set`]; mirrors the original kernel's
/// `kernelDescriptorSet(selector, base, size, present, dpl, system, type,
/// granularity, bitSize)` signature field-for-field.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorParams {
    pub base: u32,
    pub size: u32,
    pub present: bool,
    pub dpl: u8,
    pub system: bool,
    pub kind: DescriptorType,
    pub granularity: u8,
    pub bit_size: u8,
}

pub struct Gdt {
    table: Vec<RawDescriptor>,
    free_list: Vec<u16>,
}

impl Gdt {
    /// Builds a GDT with all `GDT_SIZE` slots present but empty, and the
    /// slots past the reserved eight pushed onto the free list in
    /// ascending order.
    pub fn new() -> Self {
        let table = alloc::vec![RawDescriptor::NULL; GDT_SIZE];
        let free_list = ((RES_GLOBAL_DESCRIPTORS as u16)..(GDT_SIZE as u16)).rev().collect();
        Gdt { table, free_list }
    }

    fn slot_index(selector: u16) -> usize {
        (selector >> 3) as usize
    }

    /// Hands out the next free slot's selector (RPL 0, GDT indicator
    /// already folded into the returned selector's low 3 bits being 0).
    /// Fails with [`KernelError::NoFree`] when the free list is exhausted
    /// (spec §4.c failure semantics).
    pub fn request(&mut self) -> Result<u16> {
        let slot = self.free_list.pop().ok_or(KernelError::NoFree)?;
        Ok(slot << 3)
    }

    /// Returns a previously requested slot to the free list and zeroes its
    /// descriptor.
    pub fn release(&mut self, selector: u16) -> Result<()> {
        let idx = Self::slot_index(selector);
        if idx == 0 || idx >= GDT_SIZE {
            return Err(KernelError::Invalid);
        }
        self.table[idx] = RawDescriptor::NULL;
        self.free_list.push(selector >> 3);
        Ok(())
    }

    /// Validates and fills a descriptor from its logical fields: `size`
    /// must fit 20 bits, `dpl` in 0..=3, `granularity`/`bit_size` are
    /// single bits.
    pub fn set(&mut self, selector: u16, params: DescriptorParams) -> Result<()> {
        if params.size > 0xFFFFF {
            return Err(KernelError::Range);
        }
        if params.dpl > 3 {
            return Err(KernelError::Range);
        }
        if params.granularity > 1 || params.bit_size > 1 {
            return Err(KernelError::Range);
        }
        let idx = Self::slot_index(selector);
        if idx >= GDT_SIZE {
            return Err(KernelError::Range);
        }

        let base = params.base;
        let size = params.size;
        let mut attributes1 = (params.kind as u8) & 0x0F;
        attributes1 |= (params.system as u8) << 4;
        attributes1 |= (params.dpl & 0x3) << 5;
        attributes1 |= (params.present as u8) << 7;

        let mut attributes2 = ((size >> 16) & 0x0F) as u8;
        attributes2 |= (params.granularity & 0x1) << 7;
        attributes2 |= (params.bit_size & 0x1) << 6;

        self.table[idx] = RawDescriptor {
            seg_size_byte1: (size & 0xFF) as u8,
            seg_size_byte2: ((size >> 8) & 0xFF) as u8,
            base_address1: (base & 0xFF) as u8,
            base_address2: ((base >> 8) & 0xFF) as u8,
            base_address3: ((base >> 16) & 0xFF) as u8,
            base_address4: ((base >> 24) & 0xFF) as u8,
            attributes1,
            attributes2,
        };
        Ok(())
    }

    /// Installs eight raw descriptor bytes verbatim, bypassing all of
    /// [`Gdt::set`]'s field validation. Used for the call gate, whose byte
    /// layout (offset split across two halves, selector, param count) does
    /// not match the segment-descriptor shape [`Gdt::set`] assumes.
    pub fn set_unformatted(&mut self, selector: u16, raw: [u8; 8]) -> Result<()> {
        let idx = Self::slot_index(selector);
        if idx >= GDT_SIZE {
            return Err(KernelError::Range);
        }
        self.table[idx] = RawDescriptor {
            seg_size_byte1: raw[0],
            seg_size_byte2: raw[1],
            base_address1: raw[2],
            base_address2: raw[3],
            base_address3: raw[4],
            base_address4: raw[5],
            attributes1: raw[6],
            attributes2: raw[7],
        };
        Ok(())
    }

    pub fn get(&self, selector: u16) -> Result<RawDescriptor> {
        let idx = Self::slot_index(selector);
        if idx >= GDT_SIZE {
            return Err(KernelError::Range);
        }
        Ok(self.table[idx])
    }

    /// Installs the call gate at [`super::SEL_KERNEL_CALLGATE`] (GDT slot
    /// 7), targeting `target_selector:offset` with the given DPL and
    /// parameter-word count.
    pub fn set_call_gate(&mut self, target_selector: u16, offset: u32, dpl: u8, param_count: u8) -> Result<()> {
        if dpl > 3 {
            return Err(KernelError::Range);
        }
        let mut raw = [0u8; 8];
        raw[0] = (offset & 0xFF) as u8;
        raw[1] = ((offset >> 8) & 0xFF) as u8;
        raw[2] = (target_selector & 0xFF) as u8;
        raw[3] = ((target_selector >> 8) & 0xFF) as u8;
        raw[4] = param_count & 0x1F;
        raw[5] = (DescriptorType::CallGate as u8) | (1 << 7) | ((dpl & 0x3) << 5);
        raw[6] = ((offset >> 16) & 0xFF) as u8;
        raw[7] = ((offset >> 24) & 0xFF) as u8;
        self.set_unformatted(super::SEL_KERNEL_CALLGATE, raw)
    }
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_params() -> DescriptorParams {
        DescriptorParams {
            base: 0,
            size: 0xFFFFF,
            present: true,
            dpl: 0,
            system: true,
            kind: DescriptorType::Code,
            granularity: 1,
            bit_size: 1,
        }
    }

    #[test]
    fn request_hands_out_reserved_boundary_first() {
        let mut gdt = Gdt::new();
        let sel = gdt.request().unwrap();
        assert_eq!(sel >> 3, RES_GLOBAL_DESCRIPTORS as u16);
    }

    #[test]
    fn release_then_request_reuses_slot() {
        let mut gdt = Gdt::new();
        let sel = gdt.request().unwrap();
        gdt.release(sel).unwrap();
        let sel2 = gdt.request().unwrap();
        assert_eq!(sel, sel2);
    }

    #[test]
    fn free_list_exhaustion_is_no_free() {
        let mut gdt = Gdt::new();
        let mut selectors = Vec::new();
        loop {
            match gdt.request() {
                Ok(s) => selectors.push(s),
                Err(KernelError::NoFree) => break,
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert_eq!(selectors.len(), GDT_SIZE - RES_GLOBAL_DESCRIPTORS);
    }

    #[test]
    fn set_rejects_oversized_limit() {
        let mut gdt = Gdt::new();
        let sel = gdt.request().unwrap();
        let mut params = default_params();
        params.size = 0x100000;
        assert_eq!(gdt.set(sel, params), Err(KernelError::Range));
    }

    #[test]
    fn set_rejects_bad_dpl() {
        let mut gdt = Gdt::new();
        let sel = gdt.request().unwrap();
        let mut params = default_params();
        params.dpl = 4;
        assert_eq!(gdt.set(sel, params), Err(KernelError::Range));
    }

    #[test]
    fn set_then_get_round_trips_base_and_size() {
        let mut gdt = Gdt::new();
        let sel = gdt.request().unwrap();
        let mut params = default_params();
        params.base = 0xDEAD_BEEF;
        params.size = 0xABCDE;
        gdt.set(sel, params).unwrap();
        let raw = gdt.get(sel).unwrap();
        let base = (raw.base_address1 as u32)
            | ((raw.base_address2 as u32) << 8)
            | ((raw.base_address3 as u32) << 16)
            | ((raw.base_address4 as u32) << 24);
        assert_eq!(base, 0xDEAD_BEEF);
        let size = (raw.seg_size_byte1 as u32)
            | ((raw.seg_size_byte2 as u32) << 8)
            | (((raw.attributes2 & 0x0F) as u32) << 16);
        assert_eq!(size, 0xABCDE);
    }

    #[test]
    fn call_gate_encodes_target_selector() {
        let mut gdt = Gdt::new();
        gdt.set_call_gate(super::super::SEL_PRIV_CODE, 0x1234_5678, 3, 0).unwrap();
        let raw = gdt.get(super::super::SEL_KERNEL_CALLGATE).unwrap();
        let target = (raw.base_address1 as u16) | ((raw.base_address2 as u16) << 8);
        assert_eq!(target, super::super::SEL_PRIV_CODE);
    }
}
