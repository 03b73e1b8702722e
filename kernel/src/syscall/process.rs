use alloc::sync::Arc;

use config::mm::USER_SPACE_END;
use mm::address::VirtAddr;
use systype::{SysError, SyscallResult};

use crate::{Kernel, task::Process};

/// `fork` creates a child process with a copy of the caller's address
/// space and returns the child's pid.
pub fn sys_fork(kernel: &Kernel, caller: &Arc<Process>) -> SyscallResult {
    let child = kernel.fork(caller)?;
    Ok(child.pid())
}

/// `exit` terminates the calling process with the given status code.
pub fn sys_exit(kernel: &Kernel, caller: &Arc<Process>, code: i32) -> SyscallResult {
    kernel.exit(caller, code);
    // On real hardware this is not reached; the model returns to its host.
    Ok(0)
}

/// `wait` blocks until a child exits, reaps it, and returns its pid. When
/// `status_addr` is non-zero the child's exit code is stored there as a
/// 4-byte word.
pub fn sys_wait(kernel: &Kernel, caller: &Arc<Process>, status_addr: usize) -> SyscallResult {
    let (pid, code) = kernel.wait(caller)?;
    if status_addr != 0 {
        if status_addr >= USER_SPACE_END {
            return Err(SysError::EFAULT);
        }
        caller.store_user_u32(VirtAddr::new(status_addr), code as u32)?;
    }
    Ok(pid)
}

/// `kill` marks the process with the given pid as killed. The flag is
/// polled at sleep and wait; it does not interrupt a running syscall.
pub fn sys_kill(kernel: &Kernel, pid: usize) -> SyscallResult {
    kernel.kill(pid)?;
    Ok(0)
}

/// `getpid` returns the pid of the calling process.
pub fn sys_getpid(caller: &Arc<Process>) -> SyscallResult {
    Ok(caller.pid())
}

/// `getppid` returns the pid of the caller's parent.
pub fn sys_getppid(caller: &Arc<Process>) -> SyscallResult {
    caller.parent_pid()
}

/// `sleep` waits until `ticks` clock ticks have elapsed.
///
/// # Errors
/// Returns [`EINTR`] if the process is killed while sleeping.
///
/// [`EINTR`]: SysError::EINTR
pub fn sys_sleep(kernel: &Kernel, caller: &Arc<Process>, ticks: usize) -> SyscallResult {
    let start = kernel.clock().ticks();
    while kernel.clock().ticks().wrapping_sub(start) < ticks {
        if caller.is_killed() {
            return Err(SysError::EINTR);
        }
        core::hint::spin_loop();
    }
    Ok(0)
}

/// `uptime` returns how many clock ticks have occurred since start.
pub fn sys_uptime(kernel: &Kernel) -> SyscallResult {
    Ok(kernel.clock().ticks())
}
