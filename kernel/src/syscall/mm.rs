use alloc::sync::Arc;

use config::mm::USER_SPACE_END;
use mm::address::VirtAddr;
use systype::{SysError, SyscallResult};

use crate::{
    Kernel,
    task::{Process, lock_pair},
    vm::{map_shared_pages, unmap_shared_pages},
};

/// `sbrk()` grows or shrinks the caller's heap by `delta` bytes, rounded
/// up to whole pages, and returns the heap top from before the call.
/// `sbrk(0)` reads the current heap top.
pub fn sys_sbrk(caller: &Arc<Process>, delta: isize) -> SyscallResult {
    log::debug!("[sys_sbrk] pid {} delta {delta:#x}", caller.pid());
    let old_top = caller.with_addr_space(|space| space.change_heap_size(delta))?;
    Ok(old_top.to_usize())
}

/// `map_shared_pages()` maps the pages backing `[src_va, src_va + size)`
/// of the process `src_pid` into the address space of `dst_pid`, above its
/// heap top. Returns the destination address of the shared bytes, with the
/// intra-page offset of `src_va` preserved.
///
/// Both processes' locks are taken in canonical order for the duration of
/// the splice; see [`lock_pair`].
pub fn sys_map_shared_pages(
    kernel: &Kernel,
    src_pid: usize,
    dst_pid: usize,
    src_va: usize,
    size: usize,
) -> SyscallResult {
    log::info!(
        "[sys_map_shared_pages] src pid {src_pid} dst pid {dst_pid} va {src_va:#x} size {size:#x}"
    );
    let src = kernel.procs().findproc(src_pid).ok_or(SysError::ESRCH)?;
    let dst = kernel.procs().findproc(dst_pid).ok_or(SysError::ESRCH)?;
    if src_va >= USER_SPACE_END {
        return Err(SysError::EFAULT);
    }
    let mut pair = lock_pair(&src, &dst);
    let dst_va = map_shared_pages(&mut pair, VirtAddr::new(src_va), size)?;
    Ok(dst_va.to_usize())
}

/// `unmap_shared_pages()` removes the borrowed range `[addr, addr + size)`
/// from the caller, widened to page boundaries. The underlying frames stay
/// with their owner. Removing the topmost range lowers the heap top again;
/// see [`crate::vm::AddrSpace::unmap_borrowed_range`].
pub fn sys_unmap_shared_pages(caller: &Arc<Process>, addr: usize, size: usize) -> SyscallResult {
    log::info!(
        "[sys_unmap_shared_pages] pid {} addr {addr:#x} size {size:#x}",
        caller.pid()
    );
    if addr >= USER_SPACE_END {
        return Err(SysError::EFAULT);
    }
    caller.with_addr_space(|space| unmap_shared_pages(space, VirtAddr::new(addr), size))?;
    Ok(0)
}
