//! Stack trace walker used by the exception handlers installed in
//! [`crate::descriptors`] (spec §7: panics and unhandled exceptions log a
//! backtrace before the process/kernel is torn down).
//!
//! Walks classic EBP-chained frames: `[ebp] -> saved ebp`, `[ebp+4] ->
//! return address`. Requires the kernel to have been built with frame
//! pointers retained; a truncated or corrupt chain just ends the walk
//! early rather than faulting.

use heapless::Vec as HVec;

pub const MAX_FRAMES: usize = 32;

/// A single saved return address plus, where known, a human-readable label.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub return_address: u32,
    pub symbol: Option<&'static str>,
}

/// Looks up a return address against the kernel's symbol table. Out of
/// scope in this crate (no symbol table loader lives here), so this is a
/// seam a loader elsewhere can register into.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, address: u32) -> Option<&'static str>;
}

struct NullResolver;
impl SymbolResolver for NullResolver {
    fn resolve(&self, _address: u32) -> Option<&'static str> {
        None
    }
}

static RESOLVER: spin::Mutex<Option<&'static dyn SymbolResolver>> = spin::Mutex::new(None);
static NULL_RESOLVER: NullResolver = NullResolver;

pub fn register_resolver(resolver: &'static dyn SymbolResolver) {
    *RESOLVER.lock() = Some(resolver);
}

fn resolver() -> &'static dyn SymbolResolver {
    RESOLVER.lock().unwrap_or(&NULL_RESOLVER)
}

/// Walks the EBP chain starting at `frame_pointer`, stopping at a null
/// frame pointer, a frame pointer that doesn't increase (a cycle or a
/// corrupted chain), or after [`MAX_FRAMES`] entries.
///
/// # Safety
/// `frame_pointer` must either be 0 or point at a live, readable stack
/// frame built with the standard `push ebp; mov ebp, esp` prologue.
pub unsafe fn walk(frame_pointer: u32) -> HVec<Frame, MAX_FRAMES> {
    let mut frames = HVec::new();
    let mut ebp = frame_pointer;
    while ebp != 0 && frames.len() < MAX_FRAMES {
        let saved_ebp = core::ptr::read((ebp as *const u32).cast::<u32>());
        let return_address = core::ptr::read(((ebp + 4) as *const u32).cast::<u32>());
        if return_address == 0 {
            break;
        }
        let _ = frames.push(Frame { return_address, symbol: resolver().resolve(return_address) });
        if saved_ebp <= ebp {
            break;
        }
        ebp = saved_ebp;
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_frame_pointer_yields_no_frames() {
        let frames = unsafe { walk(0) };
        assert!(frames.is_empty());
    }

    struct FixedResolver;
    impl SymbolResolver for FixedResolver {
        fn resolve(&self, _address: u32) -> Option<&'static str> {
            Some("kernelTestFunction")
        }
    }

    #[test]
    fn resolver_seam_is_consulted() {
        static R: FixedResolver = FixedResolver;
        register_resolver(&R);
        assert_eq!(resolver().resolve(0x1000), Some("kernelTestFunction"));
    }
}
