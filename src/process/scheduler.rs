//! The 8-priority-level process scheduler.
//!
//! Per spec §9's design note on "volatile mutable singletons", the single
//! `kernelCurrentProcess` global becomes a `Scheduler` owned exclusively by
//! this module; everything else reaches it through [`current_pid`] /
//! [`with_scheduler`], which take the interrupt-disable scope
//! ([`crate::port::InterruptGuard`]) the mutation invariant in spec §5
//! requires ("GDT and the process table are mutated only during ...
//! operations, which run with interrupts disabled").

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;

use crate::descriptors::gdt::{DescriptorParams, DescriptorType};
use crate::descriptors::Gdt;
use crate::lib::error::{KernelError, Result};
use crate::port::InterruptGuard;
use crate::process::task::{
    Pid, Privilege, Process, ProcessState, DEFAULT_PRIORITY, KERNEL_THREAD_PRIORITY, PRIORITY_LEVELS,
};
use crate::process::wait;

/// Size of the rolling window, in scheduled slices, over which the 3:1
/// starvation-prevention ratio is measured (spec §4.c).
pub const CPU_PERCENT_TIMESLICES: u32 = 300;
/// A level may run at most this many times for every one slice a level
/// below it is owed.
pub const STARVATION_RATIO: u32 = 3;

pub struct Scheduler {
    gdt: Gdt,
    processes: BTreeMap<Pid, Process>,
    ready: [VecDeque<Pid>; PRIORITY_LEVELS as usize],
    current: Option<Pid>,
    next_pid: Pid,
    level_slices: [u32; PRIORITY_LEVELS as usize],
    window_slices: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            gdt: Gdt::new(),
            processes: BTreeMap::new(),
            ready: core::array::from_fn(|_| VecDeque::new()),
            current: None,
            next_pid: 1,
            level_slices: [0; PRIORITY_LEVELS as usize],
            window_slices: 0,
        }
    }

    fn allocate_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// `createProcess(name, privilege, processImage)`: allocates a GDT
    /// slot, a TSS, and a 32 KiB user stack (plus a 32 KiB supervisor
    /// stack if privileged). Fails "no free" if the GDT is exhausted or
    /// the process table already uses every non-reserved slot (spec §3
    /// invariant: table size == GDT size − reserved).
    pub fn create_process(&mut self, name: &str, privilege: Privilege, user_id: u32) -> Result<Pid> {
        let selector = self.gdt.request()?;
        self.gdt.set(
            selector,
            DescriptorParams {
                base: 0,
                size: core::mem::size_of::<crate::process::task::Tss>() as u32,
                present: true,
                dpl: 0,
                system: false,
                kind: DescriptorType::Tss,
                granularity: 0,
                bit_size: 0,
            },
        )?;
        let pid = self.allocate_pid();
        let process = Process::new(pid, String::from(name), privilege, user_id, selector);
        self.processes.insert(pid, process);
        self.enqueue_ready(pid, DEFAULT_PRIORITY);
        Ok(pid)
    }

    /// `spawnKernelThread`: supervisor privilege, priority 1, no separate
    /// address space (out of scope here — memory management is an external
    /// collaborator).
    pub fn spawn_kernel_thread(&mut self, name: &str) -> Result<Pid> {
        let pid = self.create_process(name, Privilege::Supervisor, 0)?;
        if let Some(p) = self.processes.get_mut(&pid) {
            p.priority = KERNEL_THREAD_PRIORITY;
        }
        self.move_ready(pid, DEFAULT_PRIORITY, KERNEL_THREAD_PRIORITY);
        Ok(pid)
    }

    fn enqueue_ready(&mut self, pid: Pid, level: u8) {
        self.ready[level as usize].push_back(pid);
    }

    fn move_ready(&mut self, pid: Pid, from: u8, to: u8) {
        self.ready[from as usize].retain(|&p| p != pid);
        self.ready[to as usize].push_back(pid);
    }

    /// Changes a process's priority level. Only a supervisor-privilege
    /// caller may raise a process above its current level or touch another
    /// user's process; out-of-range levels are rejected outright (spec
    /// §4.c failure semantics).
    pub fn set_priority(&mut self, pid: Pid, level: u8, caller_privilege: Privilege) -> Result<()> {
        if level >= PRIORITY_LEVELS {
            return Err(KernelError::Range);
        }
        let _guard = unsafe { InterruptGuard::new() };
        let (old_level, proc_privilege) = {
            let p = self.processes.get(&pid).ok_or(KernelError::NoSuchProcess)?;
            (p.priority, p.privilege)
        };
        if caller_privilege == Privilege::User && matches!(proc_privilege, Privilege::Supervisor) {
            return Err(KernelError::Permission);
        }
        if let Some(p) = self.processes.get_mut(&pid) {
            p.priority = level;
        }
        self.move_ready(pid, old_level, level);
        Ok(())
    }

    /// `setIOPerm(pid, port, onOff)`: supervisor-only (spec §4.c). Resolves
    /// `pid` to its process and flips the port's bit in its I/O bitmap;
    /// rejects any non-supervisor caller, including one setting its own
    /// permissions, before touching the bitmap.
    pub fn set_io_perm(&mut self, pid: Pid, port: u32, allow: bool, caller_privilege: Privilege) -> Result<()> {
        if caller_privilege != Privilege::Supervisor {
            return Err(KernelError::Permission);
        }
        let _guard = unsafe { InterruptGuard::new() };
        let process = self.processes.get_mut(&pid).ok_or(KernelError::NoSuchProcess)?;
        process.io_bitmap.set(port, allow)
    }

    /// `getIOPerm(pid, port)`: reads back a bit set by [`Scheduler::set_io_perm`].
    pub fn get_io_perm(&self, pid: Pid, port: u32) -> Result<bool> {
        let process = self.processes.get(&pid).ok_or(KernelError::NoSuchProcess)?;
        process.io_bitmap.get(port)
    }

    /// Picks the next ready process to run, applying the 3:1
    /// starvation-prevention ratio: the highest ready priority runs unless
    /// a lower level has gone unscheduled more than `STARVATION_RATIO`
    /// times relative to the level directly above it, in which case that
    /// lower level is owed the slice instead. Rotates the chosen level's
    /// ready queue so later picks round-robin within the level.
    pub fn pick_next(&mut self) -> Option<Pid> {
        let top = (0..PRIORITY_LEVELS).find(|&l| !self.ready[l as usize].is_empty())?;
        let mut chosen = top;
        for level in (top + 1)..PRIORITY_LEVELS {
            if self.ready[level as usize].is_empty() {
                continue;
            }
            let above = self.level_slices[(level - 1) as usize];
            let this = self.level_slices[level as usize];
            if above >= STARVATION_RATIO * (this + 1) {
                chosen = level;
                break;
            }
        }

        let pid = self.ready[chosen as usize].pop_front()?;
        self.ready[chosen as usize].push_back(pid);
        self.level_slices[chosen as usize] += 1;
        self.window_slices += 1;
        if self.window_slices >= CPU_PERCENT_TIMESLICES {
            self.level_slices = [0; PRIORITY_LEVELS as usize];
            self.window_slices = 0;
        }
        self.current = Some(pid);
        if let Some(p) = self.processes.get_mut(&pid) {
            p.state = ProcessState::Running;
        }
        Some(pid)
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    /// `yield()`: the calling process gives up the remainder of its slice
    /// and goes back to the ready queue behind its peers at the same
    /// level.
    pub fn yield_now(&mut self, pid: Pid) {
        if let Some(p) = self.processes.get_mut(&pid) {
            p.state = ProcessState::Ready;
            let level = p.priority;
            self.ready[level as usize].retain(|&x| x != pid);
            self.ready[level as usize].push_back(pid);
        }
        if self.current == Some(pid) {
            self.current = None;
        }
    }

    /// `terminate(exitCode)`: marks the process finished, resolves any
    /// waiter blocked on it via `block(pid)`, removes it from the ready
    /// queue, and releases its GDT slot. The record itself is kept as a
    /// zombie until a parent reaps it, unless it has no parent.
    pub fn terminate(&mut self, pid: Pid, exit_code: i32) -> Result<()> {
        let _guard = unsafe { InterruptGuard::new() };
        let (level, selector, parent) = {
            let p = self.processes.get_mut(&pid).ok_or(KernelError::NoSuchProcess)?;
            p.state = ProcessState::Zombie;
            p.exit_code = exit_code;
            (p.priority, p.gdt_selector, p.parent_pid)
        };
        self.ready[level as usize].retain(|&x| x != pid);
        if self.current == Some(pid) {
            self.current = None;
        }
        self.gdt.release(selector)?;

        let waiting_parents: alloc::vec::Vec<Pid> = self
            .processes
            .values()
            .filter(|p| matches!(p.wait_condition, crate::process::task::WaitCondition::ForPid(t) if t == pid))
            .map(|p| p.pid)
            .collect();
        for waiter_pid in waiting_parents {
            if let Some(waiter) = self.processes.get_mut(&waiter_pid) {
                wait::resolve(waiter, pid, exit_code);
            }
        }

        if parent.is_none() {
            self.processes.remove(&pid);
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

static SCHEDULER: spin::Mutex<Option<Scheduler>> = spin::Mutex::new(None);

/// Initializes the global scheduler singleton. Call once at boot.
pub fn init() {
    *SCHEDULER.lock() = Some(Scheduler::new());
}

/// Runs `f` with exclusive access to the scheduler, with interrupts
/// disabled for the duration (spec §5 shared-resource rule).
pub fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let _guard = unsafe { InterruptGuard::new() };
    let mut lock = SCHEDULER.lock();
    let scheduler = lock.get_or_insert_with(Scheduler::new);
    f(scheduler)
}

pub fn current_pid() -> Option<Pid> {
    SCHEDULER.lock().as_ref().and_then(|s| s.current_pid())
}
