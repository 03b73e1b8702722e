use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering};

use mm::address::{PhysPageNum, VirtAddr};
use mutex::SpinLock;
use systype::{SysError, SysResult};

use super::tid::{Pid, PidHandle};
use crate::vm::AddrSpace;

/// State of a process.
///
/// Running: the process may execute and own memory.
///
/// Zombie: the process has exited and waits for its parent to reap it. Its
/// address space is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Zombie,
}

/// A process.
///
/// The address space sits behind the per-process lock that every page-table
/// mutation must hold; it becomes `None` once the process has torn down.
/// All other fields are bookkeeping for the process tree.
pub struct Process {
    pid: PidHandle,
    parent: SpinLock<Option<Weak<Process>>>,
    children: SpinLock<Vec<Arc<Process>>>,
    state: SpinLock<ProcState>,
    exit_code: SpinLock<i32>,
    killed: AtomicBool,
    addr_space: SpinLock<Option<AddrSpace>>,
}

impl Process {
    pub(crate) fn new(pid: PidHandle, parent: Option<Weak<Process>>, space: AddrSpace) -> Self {
        Process {
            pid,
            parent: SpinLock::new(parent),
            children: SpinLock::new(Vec::new()),
            state: SpinLock::new(ProcState::Running),
            exit_code: SpinLock::new(0),
            killed: AtomicBool::new(false),
            addr_space: SpinLock::new(Some(space)),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid.pid()
    }

    /// Pid of the parent process.
    ///
    /// # Errors
    /// Returns [`ESRCH`] if the process has no living parent.
    ///
    /// [`ESRCH`]: SysError::ESRCH
    pub fn parent_pid(&self) -> SysResult<Pid> {
        self.parent
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|parent| parent.pid())
            .ok_or(SysError::ESRCH)
    }

    pub fn state(&self) -> ProcState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ProcState) {
        *self.state.lock() = state;
    }

    pub fn exit_code(&self) -> i32 {
        *self.exit_code.lock()
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        *self.exit_code.lock() = code;
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub(crate) fn set_killed(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub(crate) fn add_child(&self, child: &Arc<Process>) {
        self.children.lock().push(Arc::clone(child));
    }

    /// Removes and returns one zombie child, if any.
    ///
    /// # Errors
    /// Returns [`ECHILD`] if the process has no children at all.
    ///
    /// [`ECHILD`]: SysError::ECHILD
    pub(crate) fn try_reap_child(&self) -> SysResult<Option<(Pid, i32)>> {
        let mut children = self.children.lock();
        if children.is_empty() {
            return Err(SysError::ECHILD);
        }
        let zombie = children
            .iter()
            .position(|child| child.state() == ProcState::Zombie);
        Ok(zombie.map(|index| {
            let child = children.swap_remove(index);
            (child.pid(), child.exit_code())
        }))
    }

    /// Runs `f` with the address space locked.
    ///
    /// # Errors
    /// Returns [`ESRCH`] if the process has already torn down.
    ///
    /// [`ESRCH`]: SysError::ESRCH
    pub fn with_addr_space<R>(&self, f: impl FnOnce(&mut AddrSpace) -> SysResult<R>) -> SysResult<R> {
        let mut guard = self.addr_space.lock();
        let space = guard.as_mut().ok_or(SysError::ESRCH)?;
        f(space)
    }

    /// Detaches the address space, leaving `None` behind. Serializes with
    /// every mapper through the per-process lock.
    pub(crate) fn take_addr_space(&self) -> Option<AddrSpace> {
        self.addr_space.lock().take()
    }

    /// The per-process lock guarding the address space. Two-process
    /// operations go through [`lock_pair`] instead of locking directly.
    ///
    /// [`lock_pair`]: super::pair::lock_pair
    pub(crate) fn addr_space(&self) -> &SpinLock<Option<AddrSpace>> {
        &self.addr_space
    }

    /// Adopts the frame `ppn` if this process currently borrows it.
    pub(crate) fn promote_borrowed(&self, ppn: PhysPageNum) -> bool {
        let mut guard = self.addr_space.lock();
        match guard.as_mut() {
            Some(space) => space.promote_borrowed(ppn),
            None => false,
        }
    }

    /* User-memory access, the model's copyin/copyout. */

    /// Reads process memory at `va` into `buf`.
    pub fn read_user(&self, va: VirtAddr, buf: &mut [u8]) -> SysResult<()> {
        self.with_addr_space(|space| space.read_bytes(va, buf))
    }

    /// Writes `bytes` into process memory at `va`.
    pub fn write_user(&self, va: VirtAddr, bytes: &[u8]) -> SysResult<()> {
        self.with_addr_space(|space| space.write_bytes(va, bytes))
    }

    /// Loads the aligned 4-byte word at `va`.
    pub fn load_user_u32(&self, va: VirtAddr) -> SysResult<u32> {
        self.with_addr_space(|space| space.load_u32(va))
    }

    /// Stores the aligned 4-byte word at `va`.
    pub fn store_user_u32(&self, va: VirtAddr, value: u32) -> SysResult<()> {
        self.with_addr_space(|space| space.store_u32(va, value))
    }

    /// Compare-and-swap on the aligned 4-byte word at `va`. Returns the
    /// value observed before the operation.
    pub fn cas_user_u32(&self, va: VirtAddr, current: u32, new: u32) -> SysResult<u32> {
        self.with_addr_space(|space| space.compare_exchange_u32(va, current, new))
    }
}
