//! UHCI host controller driver (spec §4.f).

pub mod controller;
pub mod td;

pub use controller::Controller;
