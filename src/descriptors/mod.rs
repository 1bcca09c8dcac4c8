//! Descriptor / IDT manager (spec §4.a).
//!
//! Owns the GDT and IDT. Eight selectors are reserved at fixed slots —
//! privileged code/data/stack, user code/data/stack, the API call gate, and
//! the mandatory null descriptor at slot 0 — leaving the remainder of the
//! GDT as a free list handed out by [`gdt::request`] and returned by
//! [`gdt::release`]. Exact selector values below are reinstated from
//! `kernelDescriptor.h` (see `SUPPLEMENTED FROM ORIGINAL SOURCE`).
//!
//! ```text
//! slot  selector  name             DPL
//! 0     0x00      null             -
//! 1     0x08      PRIV_CODE        0
//! 2     0x10      PRIV_DATA        0
//! 3     0x18      PRIV_STACK       0
//! 4     0x23      USER_CODE        3
//! 5     0x2B      USER_DATA        3
//! 6     0x33      USER_STACK       3
//! 7     0x3B      KERNEL_CALLGATE  3 (callable), gate targets PRIV_CODE
//! ```

pub mod gdt;
pub mod idt;

pub const GDT_SIZE: usize = 1024;
pub const IDT_SIZE: usize = 256;
pub const RES_GLOBAL_DESCRIPTORS: usize = 8;

pub const SEL_NULL: u16 = 0x00;
pub const SEL_PRIV_CODE: u16 = 0x08;
pub const SEL_PRIV_DATA: u16 = 0x10;
pub const SEL_PRIV_STACK: u16 = 0x18;
pub const SEL_USER_CODE: u16 = 0x23;
pub const SEL_USER_DATA: u16 = 0x2B;
pub const SEL_USER_STACK: u16 = 0x33;
pub const SEL_KERNEL_CALLGATE: u16 = 0x3B;

/// `IOBITMAP_OFFSET` past a TSS base, where the per-process I/O permission
/// bitmap starts (spec §4.c).
pub const IOBITMAP_OFFSET: u16 = 0x68;

pub use gdt::{Gdt, RawDescriptor};
pub use idt::Idt;
