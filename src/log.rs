//! Leveled logging front-end.
//!
//! The macros below (`error!`, `warn!`, `info!`, `debug!`) are the ambient
//! logging surface used throughout this crate, in the style of the
//! teacher's `src/log.rs`. Unlike the teacher, the sink is not a bare
//! serial port: every record is appended to the kernel log stream
//! ([`crate::support::klog`]), which RTC-timestamps it and is drained to
//! disk by a background thread (spec §4.h). When the interrupt-active flag
//! is set, records are attributed to "interrupt N" rather than to the
//! running process (spec §5).

use core::sync::atomic::{AtomicU8, AtomicI32, Ordering};

/// Log severity, ordered from most to least urgent.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "kernel_error",
            Self::Warn => "kernel_warn",
            Self::Info => "kernel_info",
            Self::Debug => "kernel_debug",
            Self::Trace => "kernel_trace",
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Non-negative when an interrupt handler is the active context; holds the
/// vector number so log records can be attributed to "interrupt N" per
/// spec §5 instead of to `kernelCurrentProcess`.
static INTERRUPT_ACTIVE: AtomicI32 = AtomicI32::new(-1);

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn get_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Error,
        1 => LogLevel::Warn,
        2 => LogLevel::Info,
        3 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

#[inline]
pub fn is_enabled(level: LogLevel) -> bool {
    level <= get_level()
}

/// Mark the start of an interrupt context; returns the previous vector (or
/// -1) so the handler can restore it on exit.
pub fn enter_interrupt(vector: u32) -> i32 {
    INTERRUPT_ACTIVE.swap(vector as i32, Ordering::Relaxed)
}

pub fn leave_interrupt(previous: i32) {
    INTERRUPT_ACTIVE.store(previous, Ordering::Relaxed);
}

/// The current attribution context: either "interrupt N" or a process id,
/// rendered by the caller.
pub fn interrupt_context() -> Option<i32> {
    let v = INTERRUPT_ACTIVE.load(Ordering::Relaxed);
    if v >= 0 { Some(v) } else { None }
}

/// Routes a formatted record to the kernel log stream. Called only by the
/// macros below; kept free-standing so `support::klog` can depend on `log`
/// without a cycle back through the macros.
pub fn emit(level: LogLevel, args: core::fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    crate::support::klog::append(level, args);
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_urgency() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn interrupt_context_round_trips() {
        assert_eq!(interrupt_context(), None);
        let prev = enter_interrupt(33);
        assert_eq!(interrupt_context(), Some(33));
        leave_interrupt(prev);
        assert_eq!(interrupt_context(), None);
    }
}
