//! Boot-protocol USB keyboard class driver (spec §4.f "keyboard class
//! driver"): SET_PROTOCOL(boot)/SET_REPORT(LEDs) request construction,
//! 8-byte interrupt-IN report diffing, a HID usage -> byte mapping table,
//! and key-repeat timing. Kept free of the controller so the decode logic
//! is unit-testable the way [`super::transfer::plan`] is.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::lib::error::Result;
use crate::usb::device::{DeviceRequest, Interface, UsbDevice};
use crate::usb::UsbClassDriver;

pub const BOOT_PROTOCOL_REPORT_LEN: usize = 8;

pub const HID_CLASS: u8 = 0x03;
pub const HID_SUBCLASS_BOOT: u8 = 0x01;
pub const HID_PROTOCOL_KEYBOARD: u8 = 0x01;

pub const MOD_LEFT_CTRL: u8 = 1 << 0;
pub const MOD_LEFT_SHIFT: u8 = 1 << 1;
pub const MOD_LEFT_ALT: u8 = 1 << 2;
pub const MOD_RIGHT_CTRL: u8 = 1 << 4;
pub const MOD_RIGHT_SHIFT: u8 = 1 << 5;
pub const MOD_RIGHT_ALT: u8 = 1 << 6;

pub const LED_NUM_LOCK: u8 = 1 << 0;
pub const LED_CAPS_LOCK: u8 = 1 << 1;
pub const LED_SCROLL_LOCK: u8 = 1 << 2;

/// Key-repeat timing (spec §4.f: "500 ms initial delay, 32 ms repeat
/// interval" for the most-recently-pressed key).
pub const REPEAT_INITIAL_DELAY_MS: u64 = 500;
pub const REPEAT_INTERVAL_MS: u64 = 32;

/// A decoded 8-byte boot-protocol report: modifier byte plus up to 6
/// simultaneously held HID usage codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    pub modifiers: u8,
    pub keys: [u8; 6],
}

impl Report {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut keys = [0u8; 6];
        let n = bytes.len().saturating_sub(2).min(6);
        keys[..n].copy_from_slice(&bytes[2..2 + n]);
        Report { modifiers: bytes.first().copied().unwrap_or(0), keys }
    }

    fn holds(&self, usage: u8) -> bool {
        usage != 0 && self.keys.contains(&usage)
    }
}

pub fn is_ctrl(modifiers: u8) -> bool {
    modifiers & (MOD_LEFT_CTRL | MOD_RIGHT_CTRL) != 0
}

pub fn is_shift(modifiers: u8) -> bool {
    modifiers & (MOD_LEFT_SHIFT | MOD_RIGHT_SHIFT) != 0
}

/// One HID-level transition a report diff can produce (spec §4.f:
/// "modifier-bit changes emit key-down/key-up for Ctrl/Shift/Alt...
/// keycodes present in the new report but not the old are down events;
/// vice versa for up").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    ModifierDown(u8),
    ModifierUp(u8),
    KeyDown(u8),
    KeyUp(u8),
}

const MODIFIER_BITS: [u8; 6] = [MOD_LEFT_CTRL, MOD_LEFT_SHIFT, MOD_LEFT_ALT, MOD_RIGHT_CTRL, MOD_RIGHT_SHIFT, MOD_RIGHT_ALT];

/// Diffs two reports into the full set of HID-level transitions: modifier
/// bit changes first (in a fixed bit order), then keycode down/up events
/// in report order.
pub fn diff_report(prev: &Report, current: &Report) -> Vec<KeyEvent> {
    let mut events = Vec::new();
    for &bit in &MODIFIER_BITS {
        let was = prev.modifiers & bit != 0;
        let is = current.modifiers & bit != 0;
        if is && !was {
            events.push(KeyEvent::ModifierDown(bit));
        } else if was && !is {
            events.push(KeyEvent::ModifierUp(bit));
        }
    }
    for &usage in current.keys.iter() {
        if usage != 0 && !prev.holds(usage) {
            events.push(KeyEvent::KeyDown(usage));
        }
    }
    for &usage in prev.keys.iter() {
        if usage != 0 && !current.holds(usage) {
            events.push(KeyEvent::KeyUp(usage));
        }
    }
    events
}

/// Diffs two reports and returns the usage codes newly present in
/// `current` (key-down events only), the subset of [`diff_report`] that
/// feeds the text input stream.
pub fn newly_pressed(prev: &Report, current: &Report) -> Vec<u8> {
    current.keys.iter().copied().filter(|&u| u != 0 && !prev.holds(u)).collect()
}

/// HID usage -> byte mapping for letters, digits, and the control keys
/// this driver cares about (spec §3 "USB HID usage -> PS/2-style scancode
/// mapping"); `shift` selects the upper/symbol half of a pair. Ctrl
/// combinations with a letter are handled separately in [`decode_key`]
/// so Ctrl-C reaches the text stream as byte 3, not 'c'/'C'.
fn usage_to_byte(usage: u8, shift: bool) -> Option<u8> {
    match usage {
        4..=29 => {
            let lower = b'a' + (usage - 4);
            Some(if shift { lower - 0x20 } else { lower })
        }
        30..=38 => {
            const SHIFTED: &[u8; 9] = b"!@#$%^&*(";
            Some(if shift { SHIFTED[(usage - 30) as usize] } else { b'1' + (usage - 30) })
        }
        39 => Some(if shift { b')' } else { b'0' }),
        40 => Some(crate::text::input::NEWLINE),
        42 => Some(crate::text::input::BACKSPACE),
        43 => Some(crate::text::input::TAB),
        44 => Some(b' '),
        _ => None,
    }
}

/// Decodes one held usage code into the byte this driver hands the text
/// input stream, folding in Ctrl-as-control-code per the usual terminal
/// convention (Ctrl-A -> 1, ..., Ctrl-C -> 3, matching
/// [`crate::text::input::CTRL_C`]).
pub fn decode_key(usage: u8, modifiers: u8) -> Option<u8> {
    if is_ctrl(modifiers) && (4..=29).contains(&usage) {
        return Some(usage - 4 + 1);
    }
    usage_to_byte(usage, is_shift(modifiers))
}

/// Tracks the single most-recently-pressed key eligible for auto-repeat
/// (spec §4.f: repeat applies to "the most-recently-pressed key").
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatTimer {
    usage: Option<u8>,
    modifiers: u8,
    next_fire_ms: u64,
}

impl RepeatTimer {
    pub const fn new() -> Self {
        RepeatTimer { usage: None, modifiers: 0, next_fire_ms: 0 }
    }

    pub fn press(&mut self, usage: u8, modifiers: u8, now_ms: u64) {
        self.usage = Some(usage);
        self.modifiers = modifiers;
        self.next_fire_ms = now_ms + REPEAT_INITIAL_DELAY_MS;
    }

    pub fn release_if_held(&mut self, current: &Report) {
        if let Some(usage) = self.usage {
            if !current.holds(usage) {
                self.usage = None;
            }
        }
    }

    /// Call once per USB-thread tick; returns the byte to re-emit when the
    /// held key's repeat deadline has passed, rescheduling the next one.
    pub fn poll(&mut self, now_ms: u64) -> Option<u8> {
        let usage = self.usage?;
        if now_ms < self.next_fire_ms {
            return None;
        }
        self.next_fire_ms = now_ms + REPEAT_INTERVAL_MS;
        decode_key(usage, self.modifiers)
    }
}

/// Per-device decode state, stashed in the claimed interface's `data` slot.
pub struct KeyboardState {
    pub previous: Report,
    pub repeat: RepeatTimer,
    pub leds: u8,
}

impl KeyboardState {
    pub fn new() -> Self {
        KeyboardState { previous: Report::default(), repeat: RepeatTimer::new(), leds: 0 }
    }
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds one freshly arrived interrupt-IN report through the diff/decode
/// pipeline, returning the bytes (in report order) to push onto the
/// device's input stream, and arms the repeat timer on the last key found
/// newly pressed.
pub fn process_report(state: &mut KeyboardState, report_bytes: &[u8], now_ms: u64) -> Vec<u8> {
    let current = Report::from_bytes(report_bytes);
    let pressed = newly_pressed(&state.previous, &current);

    let mut out = Vec::new();
    for &usage in &pressed {
        if let Some(byte) = decode_key(usage, current.modifiers) {
            out.push(byte);
        }
    }
    if let Some(&last) = pressed.last() {
        state.repeat.press(last, current.modifiers, now_ms);
    }
    state.repeat.release_if_held(&current);
    state.previous = current;
    out
}

pub fn set_protocol_boot_request(interface_number: u16) -> DeviceRequest {
    DeviceRequest::set_boot_protocol(interface_number)
}

pub fn set_leds_request(interface_number: u16) -> DeviceRequest {
    DeviceRequest::set_report_leds(interface_number)
}

/// Recovers the shared decode state [`KeyboardDriver::attach`] stashed on
/// the interface, for the USB thread to wire into an interrupt-IN
/// registration once enumeration hands the interface back.
pub fn keyboard_state(interface: &Interface) -> Option<Arc<Mutex<KeyboardState>>> {
    interface.data.as_ref()?.downcast_ref::<Arc<Mutex<KeyboardState>>>().cloned()
}

pub struct KeyboardDriver;

impl UsbClassDriver for KeyboardDriver {
    fn name(&self) -> &'static str {
        "usbkbd"
    }

    fn probe(&self, class: u8, subclass: u8, protocol: u8) -> bool {
        class == HID_CLASS && subclass == HID_SUBCLASS_BOOT && protocol == HID_PROTOCOL_KEYBOARD
    }

    /// SET_PROTOCOL(boot) and the interrupt-IN transfer registration are
    /// driven by the caller holding the control pipe (the enumeration
    /// path in [`super::hub`]); this hook only installs per-device decode
    /// state for the reports that transfer will hand back.
    fn attach(&self, device: &mut UsbDevice, interface_index: usize) -> Result<()> {
        let state: Arc<Mutex<KeyboardState>> = Arc::new(Mutex::new(KeyboardState::new()));
        device.interfaces[interface_index].data = Some(Box::new(state));
        Ok(())
    }

    fn hotplug_unregister(&self, interface: &mut Interface) {
        interface.data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_letter_decodes_lowercase() {
        assert_eq!(decode_key(7, 0), Some(b'd')); // usage 7 = 'd'
    }

    #[test]
    fn shifted_letter_decodes_uppercase() {
        assert_eq!(decode_key(7, MOD_LEFT_SHIFT), Some(b'D'));
    }

    #[test]
    fn ctrl_c_decodes_to_the_text_streams_interrupt_byte() {
        let usage_c = 6; // 'a'=4 -> 'c'=6
        assert_eq!(decode_key(usage_c, MOD_LEFT_CTRL), Some(crate::text::input::CTRL_C));
    }

    #[test]
    fn shifted_digit_decodes_to_symbol() {
        assert_eq!(decode_key(30, MOD_RIGHT_SHIFT), Some(b'!')); // usage 30 = '1'/'!'
    }

    #[test]
    fn report_diff_only_reports_newly_pressed_keys() {
        let prev = Report { modifiers: 0, keys: [7, 0, 0, 0, 0, 0] };
        let current = Report { modifiers: 0, keys: [7, 8, 0, 0, 0, 0] };
        assert_eq!(newly_pressed(&prev, &current), alloc::vec![8]);
    }

    #[test]
    fn diff_report_emits_modifier_down_and_key_down() {
        let prev = Report { modifiers: 0, keys: [0; 6] };
        let current = Report { modifiers: MOD_LEFT_SHIFT, keys: [7, 0, 0, 0, 0, 0] };
        let events = diff_report(&prev, &current);
        assert!(events.contains(&KeyEvent::ModifierDown(MOD_LEFT_SHIFT)));
        assert!(events.contains(&KeyEvent::KeyDown(7)));
    }

    #[test]
    fn diff_report_emits_modifier_up_and_key_up_on_release() {
        let prev = Report { modifiers: MOD_LEFT_CTRL, keys: [7, 0, 0, 0, 0, 0] };
        let current = Report { modifiers: 0, keys: [0; 6] };
        let events = diff_report(&prev, &current);
        assert!(events.contains(&KeyEvent::ModifierUp(MOD_LEFT_CTRL)));
        assert!(events.contains(&KeyEvent::KeyUp(7)));
    }

    #[test]
    fn process_report_arms_repeat_on_the_last_new_key() {
        let mut state = KeyboardState::new();
        let bytes = [0u8, 0, 7, 0, 0, 0, 0, 0];
        let out = process_report(&mut state, &bytes, 1_000);
        assert_eq!(out, alloc::vec![b'd']);
        assert!(state.repeat.poll(1_000).is_none());
        assert_eq!(state.repeat.poll(1_500), Some(b'd'));
    }

    #[test]
    fn releasing_the_repeating_key_clears_the_timer() {
        let mut state = KeyboardState::new();
        let pressed = [0u8, 0, 7, 0, 0, 0, 0, 0];
        process_report(&mut state, &pressed, 0);
        let released = [0u8, 0, 0, 0, 0, 0, 0, 0];
        process_report(&mut state, &released, 100);
        assert!(state.repeat.poll(10_000).is_none());
    }
}
