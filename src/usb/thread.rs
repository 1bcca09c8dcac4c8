//! The cooperative USB thread (spec §4.f: "The root hub is polled
//! cooperatively by a shared USB thread (`threadCall`) every iteration").
//!
//! Modelled the same way [`crate::net::thread::tick`] is: a single `tick`
//! a `spawnKernelThread` loop calls repeatedly, rather than a thread that
//! blocks on its own (spec §9: no executor lives in this crate).

use alloc::boxed::Box;

use crate::net::arp::Waiter as Delay;
use crate::support::rtc;
use crate::usb::device::{Endpoint, EndpointAttribute, Interface, UsbDevice};
use crate::usb::hub;
use crate::usb::keyboard;
use crate::usb::uhci::Controller;

/// Which device address currently occupies each root hub port, so a
/// disconnect-change can be resolved back to the address `hub::disconnect`
/// needs without the controller itself tracking port/address pairing.
pub struct UsbThread {
    port_devices: [Option<u8>; 2],
}

impl UsbThread {
    pub const fn new() -> Self {
        UsbThread { port_devices: [None, None] }
    }

    /// One pass: drains completed interrupt transfers (keyboard reports
    /// among them), then polls both root hub ports and enumerates or tears
    /// down whichever one changed.
    pub fn tick(&mut self, controller: &mut Controller, delay: &dyn Delay, on_key_byte: &'static (dyn Fn(u8) + Sync)) {
        controller.poll_interrupts();
        for (port, state) in hub::poll_ports(controller) {
            if state.connected {
                self.connect(controller, port, state.low_speed, delay, on_key_byte);
            } else {
                self.disconnect(controller, port);
            }
        }
    }

    fn connect(&mut self, controller: &mut Controller, port: u8, low_speed: bool, delay: &dyn Delay, on_key_byte: &'static (dyn Fn(u8) + Sync)) {
        let Ok(mut device) = hub::enumerate(controller, port, low_speed, delay) else {
            return;
        };

        // Interface descriptor parsing beyond the device descriptor is an
        // out-of-scope collaborator's job (spec §1); a device whose device
        // descriptor itself advertises the HID boot keyboard triple is
        // dispatched directly, the same shortcut a boot-protocol BIOS
        // takes before a full driver stack is loaded.
        if device.class == keyboard::HID_CLASS && device.subclass == keyboard::HID_SUBCLASS_BOOT && device.protocol == keyboard::HID_PROTOCOL_KEYBOARD {
            device.interfaces.push(Interface::new(device.class, device.subclass, device.protocol));
            let interface_index = device.interfaces.len() - 1;
            if let Ok(Some(name)) = crate::usb::dispatch_interface(&mut device, interface_index) {
                if name == "usbkbd" {
                    arm_keyboard(controller, &mut device, interface_index, low_speed, on_key_byte);
                }
            }
        }

        self.port_devices[port as usize] = Some(device.address);
        crate::usb::register_device(device);
    }

    fn disconnect(&mut self, controller: &mut Controller, port: u8) {
        if let Some(address) = self.port_devices[port as usize].take() {
            hub::disconnect(controller, address);
        }
    }
}

impl Default for UsbThread {
    fn default() -> Self {
        Self::new()
    }
}

/// Puts the device in boot protocol and arms a recurring interrupt-IN
/// transfer on endpoint 1 IN, wiring each completed report through the
/// keyboard decode pipeline and out to `on_key_byte`.
fn arm_keyboard(controller: &mut Controller, device: &mut UsbDevice, interface_index: usize, low_speed: bool, on_key_byte: &'static (dyn Fn(u8) + Sync)) {
    let Some(state) = keyboard::keyboard_state(&device.interfaces[interface_index]) else {
        return;
    };

    let mut control_ep = Endpoint::new(0, 8, EndpointAttribute::Control, 0);
    let mut empty = [0u8; 0];
    let _ = controller.transfer(
        crate::usb::transfer::TransferType::Control,
        device.address,
        &mut control_ep,
        Some(keyboard::set_protocol_boot_request(interface_index as u16)),
        &mut empty,
        false,
        crate::usb::transfer::DEFAULT_TIMEOUT_MS,
        low_speed,
    );

    let interrupt_ep = Endpoint::new(0x81, keyboard::BOOT_PROTOCOL_REPORT_LEN as u16, EndpointAttribute::Interrupt, 10);
    let callback: Box<dyn FnMut(&[u8]) + Send> = Box::new(move |bytes: &[u8]| {
        let now = rtc::uptime_millis();
        let decoded = {
            let mut guard = state.lock();
            keyboard::process_report(&mut guard, bytes, now)
        };
        for byte in decoded {
            on_key_byte(byte);
        }
    });
    let _ = controller.schedule_interrupt(device.address, &interrupt_ep, 10, keyboard::BOOT_PROTOCOL_REPORT_LEN, callback);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopDelay;
    impl Delay for NoopDelay {
        fn yield_once(&self) {}
        fn sleep_ms(&self, _ms: u64) {}
    }

    fn discard_byte(_: u8) {}

    #[test]
    fn a_tick_with_no_port_changes_does_nothing() {
        let mut controller = Controller::new(0x400);
        let mut usb_thread = UsbThread::new();
        usb_thread.tick(&mut controller, &NoopDelay, &discard_byte);
        assert!(usb_thread.port_devices.iter().all(|slot| slot.is_none()));
    }

    #[test]
    fn disconnect_with_no_tracked_device_on_the_port_is_a_no_op() {
        let mut controller = Controller::new(0x400);
        let mut usb_thread = UsbThread::new();
        usb_thread.disconnect(&mut controller, 0);
    }
}
