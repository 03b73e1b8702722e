use alloc::{sync::Arc, vec::Vec};

use hashbrown::HashMap;

use mm::address::PhysPageNum;
use mutex::SpinLock;

use super::{
    task::Process,
    tid::{Pid, PidAllocator, PidHandle},
};

/// The process table.
///
/// Maps pids to live processes and owns the pid allocator. Entries are
/// strong references: a process stays findable until its parent reaps it.
pub struct ProcessTable {
    table: SpinLock<HashMap<Pid, Arc<Process>>>,
    pids: PidAllocator,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable {
            table: SpinLock::new(HashMap::new()),
            pids: PidAllocator::new(),
        }
    }

    pub(crate) fn alloc_pid(&self) -> PidHandle {
        self.pids.alloc()
    }

    pub(crate) fn register(&self, proc: &Arc<Process>) {
        self.table.lock().insert(proc.pid(), Arc::clone(proc));
    }

    pub(crate) fn remove(&self, pid: Pid) {
        self.table.lock().remove(&pid);
    }

    /// Looks a process up by pid.
    pub fn findproc(&self, pid: Pid) -> Option<Arc<Process>> {
        self.table.lock().get(&pid).cloned()
    }

    /// Finds a borrower of the frame `ppn` and promotes it to owner.
    ///
    /// Called on owner exit, after the dying address space has been
    /// detached, so at most one address-space lock is held at a time and
    /// the canonical two-lock order of the mapper cannot be inverted.
    pub(crate) fn adopt_frame(&self, ppn: PhysPageNum) -> bool {
        let procs: Vec<Arc<Process>> = self.table.lock().values().cloned().collect();
        procs.iter().any(|proc| proc.promote_borrowed(ppn))
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        ProcessTable::new()
    }
}
