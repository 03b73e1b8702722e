mod mm;
mod process;

pub use mm::*;
pub use process::*;

use alloc::sync::Arc;

use strum::{Display, FromRepr};

use systype::SysError;

use crate::{Kernel, task::Process};

/// Syscall numbers.
#[allow(non_camel_case_types)]
#[derive(FromRepr, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SyscallNo {
    FORK = 1,
    EXIT = 2,
    WAIT = 3,
    KILL = 6,
    GETPID = 11,
    SBRK = 12,
    SLEEP = 13,
    UPTIME = 14,
    MAP_SHARED_PAGES = 22,
    UNMAP_SHARED_PAGES = 23,
    GETPPID = 24,
}

/// Dispatches a syscall made by `caller`.
///
/// Every failure surfaces as `-1`; the cause is logged but not visible to
/// user space.
pub fn syscall(kernel: &Kernel, caller: &Arc<Process>, syscall_no: usize, args: [usize; 6]) -> usize {
    use SyscallNo::*;

    let result = match SyscallNo::from_repr(syscall_no) {
        None => {
            log::error!("Syscall number not included: {syscall_no}");
            Err(SysError::ENOSYS)
        }
        Some(syscall_no) => {
            let result = match syscall_no {
                FORK => sys_fork(kernel, caller),
                EXIT => sys_exit(kernel, caller, args[0] as i32),
                WAIT => sys_wait(kernel, caller, args[0]),
                KILL => sys_kill(kernel, args[0]),
                GETPID => sys_getpid(caller),
                SBRK => sys_sbrk(caller, args[0] as isize),
                SLEEP => sys_sleep(kernel, caller, args[0]),
                UPTIME => sys_uptime(kernel),
                MAP_SHARED_PAGES => {
                    sys_map_shared_pages(kernel, args[0], args[1], args[2], args[3])
                }
                UNMAP_SHARED_PAGES => sys_unmap_shared_pages(caller, args[0], args[1]),
                GETPPID => sys_getppid(caller),
            };
            if let Err(e) = result {
                log::warn!("[syscall] {syscall_no} return err {e:?}");
            }
            result
        }
    };

    match result {
        Ok(ret) => ret,
        Err(_) => usize::MAX,
    }
}
