use alloc::{sync::Arc, vec::Vec};

use config::process::INIT_PROC_ID;
use mutex::SpinLock;

pub type Pid = usize;

struct PidAllocatorInner {
    next: Pid,
    recycled: Vec<Pid>,
}

/// Recycling pid allocator, starting at [`INIT_PROC_ID`].
pub struct PidAllocator {
    inner: Arc<SpinLock<PidAllocatorInner>>,
}

impl PidAllocator {
    pub fn new() -> Self {
        PidAllocator {
            inner: Arc::new(SpinLock::new(PidAllocatorInner {
                next: INIT_PROC_ID,
                recycled: Vec::new(),
            })),
        }
    }

    /// Allocates a pid. The pid returns to the pool when the handle drops.
    pub fn alloc(&self) -> PidHandle {
        let mut inner = self.inner.lock();
        let pid = inner.recycled.pop().unwrap_or_else(|| {
            let pid = inner.next;
            inner.next += 1;
            pid
        });
        PidHandle {
            pid,
            allocator: Arc::clone(&self.inner),
        }
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        PidAllocator::new()
    }
}

/// RAII handle for an allocated pid.
#[derive(Debug)]
pub struct PidHandle {
    pid: Pid,
    allocator: Arc<SpinLock<PidAllocatorInner>>,
}

impl PidHandle {
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl Drop for PidHandle {
    fn drop(&mut self) {
        self.allocator.lock().recycled.push(self.pid);
    }
}

impl core::fmt::Debug for PidAllocatorInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PidAllocatorInner")
            .field("next", &self.next)
            .field("recycled", &self.recycled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_start_at_init_and_count_up() {
        let allocator = PidAllocator::new();
        let a = allocator.alloc();
        let b = allocator.alloc();
        assert_eq!(a.pid(), INIT_PROC_ID);
        assert_eq!(b.pid(), INIT_PROC_ID + 1);
    }

    #[test]
    fn dropped_pids_are_recycled() {
        let allocator = PidAllocator::new();
        let a = allocator.alloc();
        let first = a.pid();
        drop(a);
        assert_eq!(allocator.alloc().pid(), first);
    }
}
