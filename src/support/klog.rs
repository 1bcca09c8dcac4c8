//! The kernel log byte stream itself (spec §4.h, §9 persisted state).
//!
//! `append()` is the single entry point the [`crate::log`] macros funnel
//! through: it RTC-timestamps the record and pushes it onto a lock-protected
//! ring (spec §9: "protected by a lock held only across one append"). A
//! low-priority background thread elsewhere drains the ring to
//! `PATH_SYSTEM/visopsys.log` every two seconds until shutdown; this module
//! only owns the buffer and the flush seam, not the thread itself — thread
//! creation belongs to [`crate::process`].

use crate::log::LogLevel;
use crate::support::rtc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;
use spin::Mutex;

/// Path the background flush thread writes to.
pub const LOG_PATH: &str = "PATH_SYSTEM/visopsys.log";

/// Flush interval (spec §4.h: "every 2 s").
pub const FLUSH_INTERVAL_MS: u32 = 2000;

/// Ring capacity before the oldest bytes are dropped to make room. Chosen
/// generously; a single flush period shouldn't normally fill it.
const RING_CAPACITY: usize = 64 * 1024;

struct Ring {
    buf: Vec<u8>,
    /// Bytes already written to disk by the flush thread; `buf[..flushed]`
    /// can be discarded once a flush completes.
    flushed: usize,
}

impl Ring {
    const fn new() -> Self {
        Ring { buf: Vec::new(), flushed: 0 }
    }

    fn push_str(&mut self, s: &str) {
        if self.buf.len() + s.len() > RING_CAPACITY {
            let overflow = (self.buf.len() + s.len()) - RING_CAPACITY;
            let drop_n = overflow.min(self.buf.len());
            self.buf.drain(0..drop_n);
            self.flushed = self.flushed.saturating_sub(drop_n);
        }
        self.buf.extend_from_slice(s.as_bytes());
    }
}

static RING: Mutex<Ring> = Mutex::new(Ring::new());

/// Appends one formatted, RTC-timestamped record. Called by the `error!` /
/// `warn!` / `info!` / `debug!` macros via [`crate::log::emit`].
pub fn append(level: LogLevel, args: core::fmt::Arguments<'_>) {
    let t = rtc::now();
    let attribution = match crate::log::interrupt_context() {
        Some(vector) => {
            let mut s = String::new();
            let _ = write!(s, "interrupt {vector}");
            s
        }
        None => String::from("kernel"),
    };
    let mut line = String::new();
    let _ = write!(
        line,
        "[{:02}:{:02}:{:02}] {} ({}): ",
        t.hours, t.minutes, t.seconds, level.as_str(), attribution
    );
    let _ = core::fmt::write(&mut line, args);
    line.push('\n');
    RING.lock().push_str(&line);
}

/// Copies out whatever hasn't been handed to the flush thread yet, without
/// clearing it — the caller marks it flushed via [`mark_flushed`] only once
/// the write to disk actually succeeds.
pub fn pending() -> Vec<u8> {
    let ring = RING.lock();
    ring.buf[ring.flushed..].to_vec()
}

/// Records that `n` more bytes (from the front of [`pending`]) made it to
/// disk.
pub fn mark_flushed(n: usize) {
    let mut ring = RING.lock();
    ring.flushed = (ring.flushed + n).min(ring.buf.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_is_visible_in_pending() {
        append(LogLevel::Info, format_args!("hello {}", 42));
        let pending = pending();
        let text = core::str::from_utf8(&pending).unwrap();
        assert!(text.ends_with("hello 42\n"));
    }

    #[test]
    fn mark_flushed_advances_past_flushed_bytes() {
        {
            let mut ring = RING.lock();
            ring.buf.clear();
            ring.flushed = 0;
        }
        append(LogLevel::Warn, format_args!("one"));
        let first_len = pending().len();
        mark_flushed(first_len);
        assert!(pending().is_empty());
        append(LogLevel::Warn, format_args!("two"));
        assert!(!pending().is_empty());
    }
}
