use strum::FromRepr;

/// Type alias for syscall result. A syscall returns an `usize` if successful.
pub type SyscallResult = Result<usize, SysError>;
/// Type alias for result of general functions.
pub type SysResult<T> = Result<T, SysError>;

/// Error codes defined in `errno.h`, trimmed to the ones the kernel
/// actually raises.
// See in "asm-generic/errno-base.h".
#[derive(FromRepr, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum SysError {
    /// Operation not permitted
    EPERM = 1,
    /// No such process
    ESRCH = 3,
    /// Interrupted system call
    EINTR = 4,
    /// No child processes
    ECHILD = 10,
    /// Out of memory
    ENOMEM = 12,
    /// Bad address
    EFAULT = 14,
    /// Invalid argument
    EINVAL = 22,
    /// Invalid system call number
    ENOSYS = 38,
}
