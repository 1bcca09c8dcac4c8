//! USB core (spec §4.f): the device/endpoint model, hardware-free transfer
//! planning, the UHCI host controller driver, root-hub enumeration, and the
//! boot-protocol keyboard class driver.

pub mod device;
pub mod hub;
pub mod keyboard;
pub mod thread;
pub mod transfer;
pub mod uhci;

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

use crate::lib::error::{KernelError, Result};
use crate::usb::device::{Interface, UsbDevice};

/// `kernelUsbDeviceClass`: a class driver's probe predicate, matched against
/// an enumerated interface's class/subclass/protocol triple (spec §4.f
/// "enumeration ... dispatches to the class-driver chain").
pub trait UsbClassDriver: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether this driver claims the given interface.
    fn probe(&self, class: u8, subclass: u8, protocol: u8) -> bool;
    /// Called once per matching interface right after enumeration finishes
    /// (descriptors read, configuration set). The driver stashes whatever
    /// per-device state it needs in `interface.data`.
    fn attach(&self, device: &mut UsbDevice, interface_index: usize) -> Result<()>;
    /// Called when the owning device disappears (spec §4.f hot-plug:
    /// "calling `hotplug_unregister` on the interface's stored driver
    /// data").
    fn hotplug_unregister(&self, interface: &mut Interface);
}

/// Trait object per role, the same shape as [`crate::pic::PicOps`] and
/// [`crate::net::device::NetworkDeviceOps`] (spec §9).
pub trait UsbControllerOps: Send + Sync {
    fn name(&self) -> &'static str;
}

/// The class-driver chain and enumerated-device table, kept separable from
/// the global static so its dispatch/address logic is unit-testable
/// against a local instance the way [`crate::net::device::Registry`] is.
pub struct Registry {
    drivers: Vec<&'static dyn UsbClassDriver>,
    devices: Vec<UsbDevice>,
    next_address: u8,
}

impl Registry {
    const fn new() -> Self {
        Registry { drivers: Vec::new(), devices: Vec::new(), next_address: 1 }
    }

    pub fn register_class_driver(&mut self, driver: &'static dyn UsbClassDriver) {
        self.drivers.push(driver);
    }

    /// Hands out the next free USB device address (1-127); addresses are
    /// never reused until USB address space wraps, matching real
    /// host-controller behavior of not recycling an address on a quick
    /// disconnect/reconnect.
    pub fn next_device_address(&mut self) -> Result<u8> {
        if self.next_address == 0 {
            return Err(KernelError::NoFree);
        }
        let address = self.next_address;
        self.next_address = self.next_address.wrapping_add(1);
        Ok(address)
    }

    /// Walks the registered class drivers in order and attaches the first
    /// one that claims the interface (spec §4.f: "dispatches to the
    /// class-driver chain").
    pub fn dispatch_interface(&mut self, device: &mut UsbDevice, interface_index: usize) -> Result<Option<String>> {
        let (class, subclass, protocol) = {
            let iface = &device.interfaces[interface_index];
            (iface.class, iface.subclass, iface.protocol)
        };
        for driver in self.drivers.iter().copied() {
            if driver.probe(class, subclass, protocol) {
                driver.attach(device, interface_index)?;
                device.interfaces[interface_index].driver_name = Some(driver.name());
                device.interfaces[interface_index].driver = Some(driver);
                return Ok(Some(String::from(driver.name())));
            }
        }
        Ok(None)
    }

    pub fn register_device(&mut self, device: UsbDevice) {
        self.devices.push(device);
    }

    pub fn remove_device(&mut self, address: u8) -> Option<UsbDevice> {
        let idx = self.devices.iter().position(|d| d.address == address)?;
        Some(self.devices.remove(idx))
    }

    pub fn with_device_mut<R>(&mut self, address: u8, f: impl FnOnce(&mut UsbDevice) -> R) -> Option<R> {
        self.devices.iter_mut().find(|d| d.address == address).map(f)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

pub fn register_class_driver(driver: &'static dyn UsbClassDriver) {
    REGISTRY.lock().register_class_driver(driver);
}

pub fn next_device_address() -> Result<u8> {
    REGISTRY.lock().next_device_address()
}

pub fn dispatch_interface(device: &mut UsbDevice, interface_index: usize) -> Result<Option<String>> {
    REGISTRY.lock().dispatch_interface(device, interface_index)
}

pub fn register_device(device: UsbDevice) {
    REGISTRY.lock().register_device(device);
}

pub fn remove_device(address: u8) -> Option<UsbDevice> {
    REGISTRY.lock().remove_device(address)
}

pub fn with_device_mut<R>(address: u8, f: impl FnOnce(&mut UsbDevice) -> R) -> Option<R> {
    REGISTRY.lock().with_device_mut(address, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::device::UsbSpeed;

    struct NullDriver;
    impl UsbClassDriver for NullDriver {
        fn name(&self) -> &'static str {
            "null"
        }
        fn probe(&self, class: u8, _subclass: u8, _protocol: u8) -> bool {
            class == 0xFF
        }
        fn attach(&self, _device: &mut UsbDevice, _interface_index: usize) -> Result<()> {
            Ok(())
        }
        fn hotplug_unregister(&self, _interface: &mut Interface) {}
    }

    static NULL_DRIVER: NullDriver = NullDriver;

    #[test]
    fn dispatch_skips_drivers_that_do_not_probe() {
        let mut reg = Registry::new();
        reg.register_class_driver(&NULL_DRIVER);
        let mut dev = UsbDevice::new(5, UsbSpeed::Full);
        dev.interfaces.push(Interface::new(0x03, 1, 1)); // HID boot keyboard, not class 0xFF
        let result = reg.dispatch_interface(&mut dev, 0).unwrap();
        assert_eq!(result, None);
        assert!(dev.interfaces[0].driver_name.is_none());
    }

    #[test]
    fn dispatch_attaches_the_first_matching_driver() {
        let mut reg = Registry::new();
        reg.register_class_driver(&NULL_DRIVER);
        let mut dev = UsbDevice::new(5, UsbSpeed::Full);
        dev.interfaces.push(Interface::new(0xFF, 0, 0));
        let result = reg.dispatch_interface(&mut dev, 0).unwrap();
        assert_eq!(result, Some(String::from("null")));
        assert_eq!(dev.interfaces[0].driver_name, Some("null"));
    }

    #[test]
    fn device_addresses_are_handed_out_sequentially() {
        let mut reg = Registry::new();
        let a = reg.next_device_address().unwrap();
        let b = reg.next_device_address().unwrap();
        assert_eq!(b, a.wrapping_add(1));
    }

    #[test]
    fn remove_device_returns_none_for_unknown_address() {
        let mut reg = Registry::new();
        assert!(reg.remove_device(42).is_none());
    }
}
