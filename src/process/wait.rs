//! `block(pid)` bookkeeping: a process waiting on another's exit (spec
//! §4.c). Kept as a small free function plus a result type rather than a
//! stateful struct — the actual wait queue lives on [`super::task::Process`]
//! via `wait_condition`; this module is just the shared outcome shape and
//! the scheduler-facing resolution helper.

use super::task::{Pid, Process, ProcessState, WaitCondition};
use crate::lib::error::{KernelError, Result};

/// What `block(pid)` returns once the target process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub pid: Pid,
    pub exit_code: i32,
}

/// Marks `waiter` as blocked on `target`'s exit.
pub fn block_on(waiter: &mut Process, target: Pid) {
    waiter.wait_condition = WaitCondition::ForPid(target);
    waiter.state = ProcessState::Waiting;
}

/// Called by the scheduler when `finished` exits: resolves any waiter
/// blocked on it.
pub fn resolve(waiter: &mut Process, finished_pid: Pid, finished_exit_code: i32) -> Option<ExitStatus> {
    match waiter.wait_condition {
        WaitCondition::ForPid(target) if target == finished_pid => {
            waiter.wait_condition = WaitCondition::None;
            waiter.state = ProcessState::Ready;
            Some(ExitStatus { pid: finished_pid, exit_code: finished_exit_code })
        }
        _ => None,
    }
}

/// `block(pid)` on a pid that isn't a live process (already reaped, or
/// never existed) fails outright rather than hanging forever.
pub fn validate_target(target_exists: bool) -> Result<()> {
    if target_exists {
        Ok(())
    } else {
        Err(KernelError::NoSuchProcess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::task::Privilege;
    use alloc::string::String;

    fn proc(pid: Pid) -> Process {
        Process::new(pid, String::from("p"), Privilege::User, 0, 0x40)
    }

    #[test]
    fn resolve_only_fires_for_the_blocked_target() {
        let mut waiter = proc(1);
        block_on(&mut waiter, 2);
        assert!(resolve(&mut waiter, 3, 0).is_none());
        assert_eq!(waiter.state, ProcessState::Waiting);
        let status = resolve(&mut waiter, 2, 7).unwrap();
        assert_eq!(status, ExitStatus { pid: 2, exit_code: 7 });
        assert_eq!(waiter.state, ProcessState::Ready);
    }
}
