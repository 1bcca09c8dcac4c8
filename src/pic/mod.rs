//! PIC abstraction (spec §4.b).
//!
//! A uniform interface over whichever interrupt controller the board
//! actually has: mask/unmask a line, acknowledge (EOI), ask which IRQ is
//! currently being serviced, and map an IRQ number to the IDT vector it was
//! wired to at init. Drivers register themselves at boot (spec §9: "trait
//! object per role + a bounded registry").

pub mod legacy;

use spin::Mutex;

/// Trait object per role, the way [`crate::text::output::TextOutputDriver`]
/// and [`crate::net::device::NetworkDeviceOps`] are also structured: the
/// concrete backend (legacy 8259 cascade or an I/O-APIC) is chosen once at
/// boot and everything else talks through this seam.
pub trait PicOps: Send + Sync {
    /// Masks (disables) one IRQ line.
    fn mask(&self, irq: u8);
    /// Unmasks (enables) one IRQ line.
    fn unmask(&self, irq: u8);
    /// Signals end-of-interrupt for the given IRQ.
    fn end_of_interrupt(&self, irq: u8);
    /// The IDT vector this IRQ line is currently wired to.
    fn vector_for_irq(&self, irq: u8) -> u8;
    /// Reads back which IRQ (if any) the controller reports as in-service,
    /// used to resolve shared lines.
    fn in_service(&self) -> u16;
}

static ACTIVE: Mutex<Option<&'static dyn PicOps>> = Mutex::new(None);

/// Registers the backend chosen at boot. Only one may be active at a time;
/// a later call replaces the earlier registration.
pub fn register(backend: &'static dyn PicOps) {
    *ACTIVE.lock() = Some(backend);
}

pub fn mask(irq: u8) {
    if let Some(p) = *ACTIVE.lock() {
        p.mask(irq);
    }
}

pub fn unmask(irq: u8) {
    if let Some(p) = *ACTIVE.lock() {
        p.unmask(irq);
    }
}

pub fn end_of_interrupt(irq: u8) {
    if let Some(p) = *ACTIVE.lock() {
        p.end_of_interrupt(irq);
    }
}

pub fn vector_for_irq(irq: u8) -> Option<u8> {
    ACTIVE.lock().map(|p| p.vector_for_irq(irq))
}

pub fn in_service() -> u16 {
    ACTIVE.lock().map_or(0, |p| p.in_service())
}
