//! Per-process I/O port permission bitmap (spec §4.c).
//!
//! `getIOPerm`/`setIOPerm` speak in "is this port allowed" terms (1 =
//! allowed), which is the opposite sense of the hardware bit the CPU
//! actually consults (0 = allowed, 1 = denied per spec §3's data model);
//! [`IoBitmap::hardware_bytes`] does the flip when handing the bitmap to
//! the TSS.

use crate::lib::error::{KernelError, Result};
use alloc::vec::Vec;

pub const MAX_BITS: usize = 65536;
pub use crate::descriptors::IOBITMAP_OFFSET;

pub struct IoBitmap {
    /// Our sense: bit set = port allowed. All ports start denied, matching
    /// a freshly created process having no I/O access until granted.
    allowed: Vec<u8>,
}

impl IoBitmap {
    pub fn new() -> Self {
        IoBitmap { allowed: alloc::vec![0u8; MAX_BITS / 8] }
    }

    fn locate(port: u32) -> Result<(usize, u8)> {
        if port as usize >= MAX_BITS {
            return Err(KernelError::Range);
        }
        Ok((port as usize / 8, 1 << (port % 8)))
    }

    pub fn get(&self, port: u32) -> Result<bool> {
        let (byte, mask) = Self::locate(port)?;
        Ok(self.allowed[byte] & mask != 0)
    }

    pub fn set(&mut self, port: u32, allow: bool) -> Result<()> {
        let (byte, mask) = Self::locate(port)?;
        if allow {
            self.allowed[byte] |= mask;
        } else {
            self.allowed[byte] &= !mask;
        }
        Ok(())
    }

    /// The bytes as the CPU's task switch expects them: bit set = denied.
    pub fn hardware_bytes(&self) -> Vec<u8> {
        self.allowed.iter().map(|b| !b).collect()
    }
}

impl Default for IoBitmap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_start_denied() {
        let bitmap = IoBitmap::new();
        assert_eq!(bitmap.get(0x60).unwrap(), false);
    }

    #[test]
    fn set_allow_then_get_round_trips() {
        let mut bitmap = IoBitmap::new();
        bitmap.set(0x60, true).unwrap();
        assert_eq!(bitmap.get(0x60).unwrap(), true);
        assert_eq!(bitmap.get(0x61).unwrap(), false);
    }

    #[test]
    fn hardware_sense_is_inverted() {
        let mut bitmap = IoBitmap::new();
        bitmap.set(0x60, true).unwrap();
        let hw = bitmap.hardware_bytes();
        assert_eq!(hw[0x60 / 8] & (1 << (0x60 % 8)), 0);
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let bitmap = IoBitmap::new();
        assert_eq!(bitmap.get(MAX_BITS as u32), Err(KernelError::Range));
    }
}
