//! Process / scheduler (spec §4.c).
//!
//! TSS-per-process hardware task switching, 8 priority levels with a
//! starvation-prevention ratio, cooperative yield/wait/block, a signal
//! stream per process, and a per-process I/O port permission bitmap.

pub mod io_bitmap;
pub mod scheduler;
pub mod signal;
pub mod task;
pub mod wait;

pub use scheduler::Scheduler;
pub use task::{Pid, Privilege, Process, ProcessState};
