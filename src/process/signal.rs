//! Per-process signal mask and delivery stream (spec §4.c).
//!
//! Each process has a bitmask of enabled signal numbers and a FIFO of
//! delivered-but-not-yet-read signal numbers. `SIGINT` additionally wakes
//! the target out of a blocking read (spec §4.e's input stream intercept
//! relies on this for Ctrl-C).

use crate::lib::error::{KernelError, Result};
use heapless::Deque;

/// A deliberately small, kernel-core-relevant subset — this crate does not
/// implement a user-space POSIX signal disposition table, only the
/// enable-mask/stream mechanism spec §4.c describes.
pub const SIGINT: u32 = 2;
pub const SIGKILL: u32 = 9;
pub const SIGTERM: u32 = 15;
pub const SIGSTOP: u32 = 19;
pub const SIGCONT: u32 = 18;

const STREAM_CAPACITY: usize = 32;

pub struct SignalState {
    /// Bit `n` set means signal number `n` is enabled for delivery.
    enabled_mask: u64,
    stream: Deque<u32, STREAM_CAPACITY>,
}

impl SignalState {
    pub fn new() -> Self {
        SignalState { enabled_mask: 0, stream: Deque::new() }
    }

    pub fn set_enabled(&mut self, signal: u32, on: bool) -> Result<()> {
        if signal >= 64 {
            return Err(KernelError::Range);
        }
        if on {
            self.enabled_mask |= 1 << signal;
        } else {
            self.enabled_mask &= !(1 << signal);
        }
        Ok(())
    }

    pub fn is_enabled(&self, signal: u32) -> bool {
        signal < 64 && self.enabled_mask & (1 << signal) != 0
    }

    /// Appends `signal` to the delivery stream if enabled. Returns whether
    /// it was accepted (matching the original kernel's "deliver only if
    /// enabled" rule — the caller decides what, if anything, to do with a
    /// dropped signal).
    pub fn deliver(&mut self, signal: u32) -> bool {
        if !self.is_enabled(signal) {
            return false;
        }
        self.stream.push_back(signal).is_ok()
    }

    pub fn read(&mut self) -> Option<u32> {
        self.stream.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_signal_is_not_delivered() {
        let mut s = SignalState::new();
        assert!(!s.deliver(SIGINT));
        assert!(s.is_empty());
    }

    #[test]
    fn enabled_signal_round_trips_through_stream() {
        let mut s = SignalState::new();
        s.set_enabled(SIGINT, true).unwrap();
        assert!(s.deliver(SIGINT));
        assert_eq!(s.read(), Some(SIGINT));
        assert_eq!(s.read(), None);
    }
}
