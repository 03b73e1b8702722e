pub mod manager;
pub mod pair;
pub mod task;
pub mod tid;

pub use pair::{AddrSpacePair, lock_pair};
pub use task::{ProcState, Process};
pub use tid::Pid;

use alloc::sync::Arc;

use systype::{SysError, SysResult};

use crate::Kernel;

impl Kernel {
    /// Creates the first process, with an empty heap and a fresh stack.
    ///
    /// # Errors
    /// Returns [`ENOMEM`] if no frame is free for the stack.
    ///
    /// [`ENOMEM`]: SysError::ENOMEM
    pub fn spawn_init(&self) -> SysResult<Arc<Process>> {
        let space = crate::vm::AddrSpace::build(Arc::clone(self.frames()))?;
        let proc = Arc::new(Process::new(self.procs().alloc_pid(), None, space));
        self.procs().register(&proc);
        log::info!("[spawn_init] pid {}", proc.pid());
        Ok(proc)
    }

    /// Forks `parent`: the child gets a copy of the parent's address space
    /// and becomes its child in the process tree.
    ///
    /// Owning pages are copied; borrowed pages stay borrowed, so a forked
    /// borrower keeps seeing the shared bytes.
    ///
    /// # Errors
    /// Returns [`ESRCH`] if the parent has torn down and [`ENOMEM`] if
    /// memory runs out; nothing is left half-created.
    ///
    /// [`ESRCH`]: SysError::ESRCH
    /// [`ENOMEM`]: SysError::ENOMEM
    pub fn fork(&self, parent: &Arc<Process>) -> SysResult<Arc<Process>> {
        let child_space = parent.with_addr_space(|space| space.clone_for_fork())?;
        let child = Arc::new(Process::new(
            self.procs().alloc_pid(),
            Some(Arc::downgrade(parent)),
            child_space,
        ));
        parent.add_child(&child);
        self.procs().register(&child);
        log::info!("[fork] pid {} -> pid {}", parent.pid(), child.pid());
        Ok(child)
    }

    /// Terminates `proc`: tears its address space down and leaves a zombie
    /// for the parent to reap.
    ///
    /// Teardown frees exactly the frames the process owned. A frame some
    /// other space still borrows is not freed: the first such borrower
    /// found adopts it and its PTE becomes the owning one.
    pub fn exit(&self, proc: &Arc<Process>, code: i32) {
        log::info!("[exit] pid {} code {}", proc.pid(), code);
        // Detaching under the lock serializes with mappers; afterwards the
        // dying page table is private to this call.
        if let Some(mut space) = proc.take_addr_space() {
            for ppn in space.dismantle() {
                if !self.procs().adopt_frame(ppn) {
                    self.frames().free_frame(ppn);
                }
            }
        }
        proc.set_exit_code(code);
        proc.set_state(ProcState::Zombie);
    }

    /// Waits for a child of `proc` to exit, reaps it, and returns its pid
    /// and exit code.
    ///
    /// # Errors
    /// Returns [`ECHILD`] if `proc` has no children and [`EINTR`] if the
    /// process is killed while waiting.
    ///
    /// [`ECHILD`]: SysError::ECHILD
    /// [`EINTR`]: SysError::EINTR
    pub fn wait(&self, proc: &Arc<Process>) -> SysResult<(Pid, i32)> {
        loop {
            if let Some((pid, code)) = proc.try_reap_child()? {
                self.procs().remove(pid);
                return Ok((pid, code));
            }
            if proc.is_killed() {
                return Err(SysError::EINTR);
            }
            core::hint::spin_loop();
        }
    }

    /// Marks the process with the given pid as killed.
    ///
    /// The flag is polled at well-defined points (`sleep`, `wait`); a
    /// mapper in progress is never interrupted.
    ///
    /// # Errors
    /// Returns [`ESRCH`] for an unknown pid.
    ///
    /// [`ESRCH`]: SysError::ESRCH
    pub fn kill(&self, pid: Pid) -> SysResult<()> {
        let proc = self.procs().findproc(pid).ok_or(SysError::ESRCH)?;
        proc.set_killed();
        Ok(())
    }
}
