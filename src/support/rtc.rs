//! Real-time clock service.
//!
//! The RTC chip driver itself is out of scope (spec §1 lists it among the
//! external collaborators); this module is the kernel-facing abstraction
//! over whatever backend registers itself, exposing wall-clock fields,
//! packed date/time words, day-of-week via Zeller's congruence, and an
//! uptime counter measured from init.

use core::sync::atomic::{AtomicU32, Ordering};
use spin::Once;

/// Seconds since this module's `init()` was called. Used as the kernel's
/// monotonic "uptime" clock, e.g. for DHCP lease expiry and `wait(ms)`.
static UPTIME_SECONDS: AtomicU32 = AtomicU32::new(0);
static BOOT_EPOCH: Once<RtcTime> = Once::new();

/// A trait object per role: whichever RTC chip driver is wired up at boot
/// (out of scope here) supplies readings through this seam.
pub trait RtcBackend: Send + Sync {
    /// Raw register read, already BCD-decoded: (seconds, minutes, hours,
    /// day, month, year-since-2000).
    fn read_raw(&self) -> (u8, u8, u8, u8, u8, u8);
}

struct NullBackend;
impl RtcBackend for NullBackend {
    fn read_raw(&self) -> (u8, u8, u8, u8, u8, u8) {
        (0, 0, 0, 1, 1, 0)
    }
}

static BACKEND: spin::Mutex<Option<&'static dyn RtcBackend>> = spin::Mutex::new(None);
static NULL_BACKEND: NullBackend = NullBackend;

/// Registers the chip-specific RTC backend. Call once at boot.
pub fn register_backend(backend: &'static dyn RtcBackend) {
    *BACKEND.lock() = Some(backend);
}

fn backend() -> &'static dyn RtcBackend {
    BACKEND.lock().unwrap_or(&NULL_BACKEND)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcTime {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub day: u8,
    pub month: u8,
    /// Full year, e.g. 2026.
    pub year: u16,
}

/// Called once at boot, after the RTC backend has registered itself.
pub fn init() {
    BOOT_EPOCH.call_once(now);
    UPTIME_SECONDS.store(0, Ordering::SeqCst);
}

/// Reads the current wall-clock time.
pub fn now() -> RtcTime {
    let (s, m, h, d, mo, y2) = backend().read_raw();
    RtcTime { seconds: s, minutes: m, hours: h, day: d, month: mo, year: 2000 + y2 as u16 }
}

/// Packed date word: bits 0-4 day, bits 5-8 month, bits 9-15 year-since-2000.
pub fn packed_date(t: RtcTime) -> u16 {
    (t.day as u16 & 0x1F) | ((t.month as u16 & 0xF) << 5) | (((t.year - 2000) & 0x7F) << 9)
}

/// Packed time word: bits 0-5 seconds, bits 6-11 minutes, bits 12-16 hours.
pub fn packed_time(t: RtcTime) -> u32 {
    (t.seconds as u32 & 0x3F) | ((t.minutes as u32 & 0x3F) << 6) | ((t.hours as u32 & 0x1F) << 12)
}

/// Day of week via Zeller's congruence; 0 = Saturday .. 6 = Friday, matched
/// to `[Sat,Sun,Mon,Tue,Wed,Thu,Fri]` the way the original kernel indexes
/// its weekday name table.
pub fn day_of_week(t: RtcTime) -> u8 {
    let (mut month, mut year) = (t.month as i32, t.year as i32);
    if month < 3 {
        month += 12;
        year -= 1;
    }
    let k = year % 100;
    let j = year / 100;
    let day = t.day as i32;
    let h = (day + (13 * (month + 1)) / 5 + k + k / 4 + j / 4 + 5 * j) % 7;
    h as u8
}

/// Should be called once per second by the timer-tick handler.
pub fn tick_one_second() {
    UPTIME_SECONDS.fetch_add(1, Ordering::Relaxed);
}

pub fn uptime_seconds() -> u32 {
    UPTIME_SECONDS.load(Ordering::Relaxed)
}

/// Monotonic milliseconds since boot, as used by `wait(ms)` deadlines.
pub fn uptime_millis() -> u64 {
    uptime_seconds() as u64 * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeller_congruence_known_date() {
        // 2000-01-01 was a Saturday.
        let t = RtcTime { seconds: 0, minutes: 0, hours: 0, day: 1, month: 1, year: 2000 };
        assert_eq!(day_of_week(t), 0);
    }

    #[test]
    fn packed_date_round_trips_fields() {
        let t = RtcTime { seconds: 12, minutes: 34, hours: 5, day: 28, month: 7, year: 2026 };
        let pd = packed_date(t);
        assert_eq!(pd & 0x1F, 28);
        assert_eq!((pd >> 5) & 0xF, 7);
        let pt = packed_time(t);
        assert_eq!(pt & 0x3F, 12);
        assert_eq!((pt >> 6) & 0x3F, 34);
        assert_eq!((pt >> 12) & 0x1F, 5);
    }
}
