//! # Visopsys kernel core
//!
//! This crate is the kernel-core slice of a small, self-hosted i386
//! operating system: the preemptive multitasking engine, the descriptor
//! manager and call-gate syscall ABI, the text-terminal stream layer, the
//! UHCI USB host controller driver with generic device/hub/keyboard
//! plumbing, and the TCP/IP-style network stack (Ethernet/ARP/IPv4/UDP/
//! ICMP, DHCP client, loopback device).
//!
//! Out of scope, treated as external collaborators reached only through
//! the trait seams named below: filesystem drivers and the VFS, the
//! graphical window manager, PCI/device enumeration, the physical memory
//! allocator, the RTC/PIT timer chips, individual NIC drivers, user-space
//! utilities, disk drivers, the bootloader and ELF loader.
#![no_std]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

#[macro_use]
pub mod log;

#[allow(special_module_name)]
pub mod lib;
pub mod support;
pub mod port;

pub mod descriptors;
pub mod pic;
pub mod process;
pub mod api;
pub mod text;
pub mod usb;
pub mod net;

pub use lib::error::{KernelError, Result};
