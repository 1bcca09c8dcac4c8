//! Crate-wide support types that don't belong to a single subsystem:
//! the `ERR_*` error enum, and nothing else — printk/ringbuf/panic live
//! in [`crate::log`] and [`crate::support::klog`] instead.

pub mod error;
