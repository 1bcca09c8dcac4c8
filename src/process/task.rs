//! The process record and its hardware task state segment.
//!
//! Field layout and names follow spec §3's data model. The TSS mirrors the
//! i386 hardware layout exactly — every 16-bit selector field is paired
//! with the reserved high word the CPU ignores but still occupies — so
//! that [`super::io_bitmap::IOBITMAP_OFFSET`] (0x68, immediately past
//! `iomap_base`) lines up without padding tricks.

use alloc::string::String;
use alloc::vec::Vec;

use crate::descriptors::SEL_PRIV_CODE;
use crate::process::io_bitmap::IoBitmap;
use crate::process::signal::SignalState;

pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Supervisor,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Ready,
    Waiting,
    IoWait,
    Sleeping,
    Stopped,
    Finished,
    Zombie,
}

/// A pending suspension condition (spec §4.c suspension points): at most
/// one of these applies to a waiting process at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    None,
    /// Sleeping until `rtc::uptime_millis()` reaches this deadline.
    UntilMillis(u64),
    /// Blocked on another process's exit.
    ForPid(Pid),
    /// Voluntarily yielded the rest of this quantum.
    YieldedSlice,
}

/// The i386 hardware Task State Segment. `#[repr(C, packed)]` so the
/// layout is exactly what the CPU's task switch reads and writes; no Rust
/// struct padding is permitted to sneak in.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct Tss {
    pub link: u16,
    _res0: u16,
    pub esp0: u32,
    pub ss0: u16,
    _res1: u16,
    pub esp1: u32,
    pub ss1: u16,
    _res2: u16,
    pub esp2: u32,
    pub ss2: u16,
    _res3: u16,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u16,
    _res4: u16,
    pub cs: u16,
    _res5: u16,
    pub ss: u16,
    _res6: u16,
    pub ds: u16,
    _res7: u16,
    pub fs: u16,
    _res8: u16,
    pub gs: u16,
    _res9: u16,
    pub ldt: u16,
    _res10: u16,
    pub trap: u16,
    /// Byte offset from the TSS base to the I/O permission bitmap.
    pub iomap_base: u16,
}

const _: () = assert!(core::mem::offset_of!(Tss, iomap_base) + 2 == super::io_bitmap::IOBITMAP_OFFSET as usize);
const _: () = assert!(core::mem::size_of::<Tss>() == super::io_bitmap::IOBITMAP_OFFSET as usize);

impl Tss {
    pub const fn new() -> Self {
        Tss {
            link: 0,
            _res0: 0,
            esp0: 0,
            ss0: 0,
            _res1: 0,
            esp1: 0,
            ss1: 0,
            _res2: 0,
            esp2: 0,
            ss2: 0,
            _res3: 0,
            cr3: 0,
            eip: 0,
            eflags: 0x0200, // IF set
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            _res4: 0,
            cs: 0,
            _res5: 0,
            ss: 0,
            _res6: 0,
            ds: 0,
            _res7: 0,
            fs: 0,
            _res8: 0,
            gs: 0,
            _res9: 0,
            ldt: 0,
            _res10: 0,
            trap: 0,
            iomap_base: super::io_bitmap::IOBITMAP_OFFSET,
        }
    }
}

impl Default for Tss {
    fn default() -> Self {
        Self::new()
    }
}

/// Cumulative CPU-time accounting for the scheduler's starvation window
/// (spec §4.c).
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuTime {
    pub start_ms: u64,
    pub cumulative_ms: u64,
    pub percent_last_window: u8,
}

pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub user_id: u32,
    pub priority: u8,
    pub privilege: Privilege,
    pub state: ProcessState,
    pub parent_pid: Option<Pid>,

    pub cpu_time: CpuTime,
    pub wait_condition: WaitCondition,
    pub exit_code: i32,

    pub user_stack: Vec<u8>,
    pub supervisor_stack: Option<Vec<u8>>,

    pub tss: Tss,
    pub gdt_selector: u16,

    pub cwd: String,
    pub env: Vec<(String, String)>,

    pub signals: SignalState,
    pub io_bitmap: IoBitmap,

    pub fpu_save_area: [u8; 512],
    pub fpu_valid: bool,
}

pub const USER_STACK_SIZE: usize = 32 * 1024;
pub const SUPERVISOR_STACK_SIZE: usize = 32 * 1024;
/// A newly created process defaults to level `(PRIORITY_LEVELS/2 - 1)`
/// (spec §4.c). Kernel threads instead get priority 1.
pub const PRIORITY_LEVELS: u8 = 8;
pub const DEFAULT_PRIORITY: u8 = PRIORITY_LEVELS / 2 - 1;
pub const KERNEL_THREAD_PRIORITY: u8 = 1;

impl Process {
    /// Builds a new process record; the caller (the scheduler) is
    /// responsible for allocating the GDT slot this TSS lives at and
    /// wiring `gdt_selector` to it.
    pub fn new(pid: Pid, name: String, privilege: Privilege, user_id: u32, gdt_selector: u16) -> Self {
        let supervisor_stack = matches!(privilege, Privilege::Supervisor)
            .then(|| alloc::vec![0u8; SUPERVISOR_STACK_SIZE]);
        let mut tss = Tss::new();
        tss.cs = SEL_PRIV_CODE;
        Process {
            pid,
            name,
            user_id,
            priority: DEFAULT_PRIORITY,
            privilege,
            state: ProcessState::Ready,
            parent_pid: None,
            cpu_time: CpuTime::default(),
            wait_condition: WaitCondition::None,
            exit_code: 0,
            user_stack: alloc::vec![0u8; USER_STACK_SIZE],
            supervisor_stack,
            tss,
            gdt_selector,
            cwd: String::from("/"),
            env: Vec::new(),
            signals: SignalState::new(),
            io_bitmap: IoBitmap::new(),
            fpu_save_area: [0u8; 512],
            fpu_valid: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tss_size_matches_iobitmap_offset() {
        assert_eq!(core::mem::size_of::<Tss>(), 0x68);
    }

    #[test]
    fn new_process_gets_default_priority() {
        let p = Process::new(1, String::from("init"), Privilege::User, 0, 0x40);
        assert_eq!(p.priority, DEFAULT_PRIORITY);
        assert_eq!(p.user_stack.len(), USER_STACK_SIZE);
        assert!(p.supervisor_stack.is_none());
    }

    #[test]
    fn supervisor_process_gets_a_supervisor_stack() {
        let p = Process::new(2, String::from("kthread"), Privilege::Supervisor, 0, 0x48);
        assert_eq!(p.supervisor_stack.as_ref().unwrap().len(), SUPERVISOR_STACK_SIZE);
    }
}
