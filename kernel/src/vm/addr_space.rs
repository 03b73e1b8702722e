//! Per-process address spaces.
//!
//! An address space is a page table plus the heap top (`sz` in older
//! kernels). The heap occupies `[0, heap_top)` and grows upward; a guard
//! page, one stack page, and the trapframe and trampoline slots are
//! reserved at the top of the user span. The heap top is always
//! page-aligned and may reach, but never cross, the guard page.
//!
//! Ownership of data frames is carried entirely by the leaf PTEs: the one
//! address space whose entry has the borrowed bit clear owns the frame and
//! frees it; every other mapping of the frame is borrowed and never frees.

use alloc::{sync::Arc, vec::Vec};
use core::cmp;

use config::mm::{HEAP_CEILING, PAGE_SIZE, USER_STACK_BASE, USER_STACK_SIZE};
use mm::{
    address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum},
    frame::FrameAllocator,
    page_table::PageTable,
    pte::{PageTableEntry, PteFlags},
};
use systype::{SysError, SysResult};

/// Flags for owning heap and stack pages.
const USER_DATA_FLAGS: PteFlags = PteFlags::V
    .union(PteFlags::R)
    .union(PteFlags::W)
    .union(PteFlags::U);

/// A user address space.
pub struct AddrSpace {
    pub(crate) page_table: PageTable,
    pub(crate) heap_top: VirtAddr,
    pub(crate) frames: Arc<FrameAllocator>,
}

impl AddrSpace {
    /// Builds an address space with an empty heap and a mapped user stack.
    ///
    /// # Errors
    /// Returns [`ENOMEM`] if no frame is free for the stack.
    ///
    /// [`ENOMEM`]: SysError::ENOMEM
    pub fn build(frames: Arc<FrameAllocator>) -> SysResult<Self> {
        let mut space = AddrSpace {
            page_table: PageTable::build(),
            heap_top: VirtAddr::new(0),
            frames,
        };
        let stack_pages = USER_STACK_SIZE / PAGE_SIZE;
        let stack_frames = space.frames.alloc_frames(stack_pages)?;
        let base = VirtAddr::new(USER_STACK_BASE).page_number();
        for (i, &ppn) in stack_frames.iter().enumerate() {
            let vpn = VirtPageNum::new(base.to_usize() + i);
            if let Err(e) = space.page_table.map_page_to(vpn, ppn, USER_DATA_FLAGS) {
                // The mapped prefix is released when `space` drops.
                for &rest in &stack_frames[i..] {
                    space.frames.free_frame(rest);
                }
                return Err(e);
            }
        }
        Ok(space)
    }

    /// The current heap top.
    pub fn heap_top(&self) -> VirtAddr {
        self.heap_top
    }

    /// Grows or shrinks the heap by `delta` bytes, rounded up to whole
    /// pages. Returns the heap top from before the call, which is what
    /// `sbrk` hands back to user space.
    ///
    /// Growth maps freshly allocated owning frames and is all-or-nothing.
    /// Shrinking frees owning frames in the vacated range; borrowed frames
    /// there are unmapped but not freed, as they belong to another space.
    ///
    /// # Errors
    /// Returns [`ENOMEM`] if growth would cross the guard page or no frames
    /// are free, and [`EINVAL`] if shrinking would move the top below zero.
    ///
    /// [`ENOMEM`]: SysError::ENOMEM
    /// [`EINVAL`]: SysError::EINVAL
    pub fn change_heap_size(&mut self, delta: isize) -> SysResult<VirtAddr> {
        let old_top = self.heap_top;
        if delta == 0 {
            return Ok(old_top);
        }
        if delta > 0 {
            let grow = (delta as usize)
                .checked_add(PAGE_SIZE - 1)
                .ok_or(SysError::ENOMEM)?
                & !(PAGE_SIZE - 1);
            let new_top = old_top
                .to_usize()
                .checked_add(grow)
                .filter(|&top| top <= HEAP_CEILING)
                .ok_or(SysError::ENOMEM)?;
            let count = grow / PAGE_SIZE;
            let frames = self.frames.alloc_frames(count)?;
            let base = old_top.page_number();
            for (i, &ppn) in frames.iter().enumerate() {
                let vpn = VirtPageNum::new(base.to_usize() + i);
                if let Err(e) = self.page_table.map_page_to(vpn, ppn, USER_DATA_FLAGS) {
                    for j in 0..i {
                        self.page_table.unmap_page(VirtPageNum::new(base.to_usize() + j));
                    }
                    for &frame in &frames {
                        self.frames.free_frame(frame);
                    }
                    return Err(e);
                }
            }
            self.heap_top = VirtAddr::new(new_top);
        } else {
            let shrink = delta.unsigned_abs();
            if shrink > old_top.to_usize() {
                return Err(SysError::EINVAL);
            }
            let new_top = VirtAddr::new(old_top.to_usize() - shrink).page_round_up();
            let start = new_top.page_number();
            let count = (old_top.to_usize() - new_top.to_usize()) / PAGE_SIZE;
            let frames = &self.frames;
            self.page_table.visit_leaves(start, count, |_, entry| {
                if !entry.is_borrowed() {
                    frames.free_frame(entry.ppn());
                }
                *entry = PageTableEntry::default();
            });
            self.heap_top = new_top;
        }
        Ok(old_top)
    }

    /// Copies this address space for a fork.
    ///
    /// Owning pages are copied into freshly allocated frames; borrowed
    /// pages are re-installed as borrowed mappings of the same frames, so
    /// the child is simply one more borrower.
    ///
    /// # Errors
    /// Returns [`ENOMEM`] if frames or table nodes run out; the partial
    /// copy is released.
    ///
    /// [`ENOMEM`]: SysError::ENOMEM
    pub fn clone_for_fork(&self) -> SysResult<AddrSpace> {
        let mut child = AddrSpace {
            page_table: PageTable::build(),
            heap_top: self.heap_top,
            frames: Arc::clone(&self.frames),
        };
        for (start, count) in self.user_ranges() {
            for i in 0..count {
                let vpn = VirtPageNum::new(start.to_usize() + i);
                let Some(entry) = self.page_table.translate(vpn) else {
                    continue;
                };
                if entry.is_borrowed() {
                    child.page_table.map_page_to(vpn, entry.ppn(), entry.flags())?;
                } else {
                    let frame = self.frames.alloc_frame()?;
                    self.frames.copy_frame(entry.ppn(), frame);
                    if let Err(e) = child.page_table.map_page_to(vpn, frame, entry.flags()) {
                        self.frames.free_frame(frame);
                        return Err(e);
                    }
                }
            }
        }
        Ok(child)
    }

    /// Clears every user mapping and returns the frames this space owned,
    /// without freeing them.
    ///
    /// The caller decides each frame's fate: normally it goes back to the
    /// allocator, but on process exit a frame still borrowed elsewhere is
    /// handed over to the borrower instead. Borrowed mappings are simply
    /// cleared. Calling this twice is allowed; the second call returns
    /// nothing.
    pub fn dismantle(&mut self) -> Vec<PhysPageNum> {
        let mut owned = Vec::new();
        for (start, count) in self.user_ranges() {
            let page_table = &mut self.page_table;
            page_table.visit_leaves(start, count, |_, entry| {
                if !entry.is_borrowed() {
                    owned.push(entry.ppn());
                }
                *entry = PageTableEntry::default();
            });
        }
        self.heap_top = VirtAddr::new(0);
        owned
    }

    /// Makes this space the owner of `ppn` if it currently borrows it.
    ///
    /// Used when the owner exits first: the first borrower found adopts the
    /// frame and becomes responsible for freeing it.
    pub(crate) fn promote_borrowed(&mut self, ppn: PhysPageNum) -> bool {
        let mut promoted = false;
        let heap_pages = self.heap_top.to_usize() / PAGE_SIZE;
        self.page_table
            .visit_leaves(VirtPageNum::new(0), heap_pages, |_, entry| {
                if !promoted && entry.is_borrowed() && entry.ppn() == ppn {
                    entry.clear_borrowed();
                    promoted = true;
                }
            });
        promoted
    }

    /// The mapped user ranges: the heap and the stack.
    fn user_ranges(&self) -> [(VirtPageNum, usize); 2] {
        [
            (VirtPageNum::new(0), self.heap_top.to_usize() / PAGE_SIZE),
            (
                VirtAddr::new(USER_STACK_BASE).page_number(),
                USER_STACK_SIZE / PAGE_SIZE,
            ),
        ]
    }

    fn translate_for_access(&self, va: VirtAddr, write: bool) -> SysResult<PhysAddr> {
        let entry = self
            .page_table
            .translate(va.page_number())
            .ok_or(SysError::EFAULT)?;
        if !entry.is_user() {
            return Err(SysError::EFAULT);
        }
        if write && !entry.is_writable() {
            return Err(SysError::EFAULT);
        }
        if !write && !entry.is_readable() {
            return Err(SysError::EFAULT);
        }
        Ok(PhysAddr::new(
            entry.ppn().address().to_usize() + va.page_offset(),
        ))
    }

    /// Reads user memory at `va` into `buf`, page by page.
    pub fn read_bytes(&self, va: VirtAddr, buf: &mut [u8]) -> SysResult<()> {
        let mut va = va;
        let mut buf = buf;
        while !buf.is_empty() {
            let pa = self.translate_for_access(va, false)?;
            let chunk = cmp::min(PAGE_SIZE - va.page_offset(), buf.len());
            let (head, tail) = buf.split_at_mut(chunk);
            self.frames.read_bytes(pa, head);
            buf = tail;
            va = VirtAddr::new(va.to_usize() + chunk);
        }
        Ok(())
    }

    /// Writes `bytes` into user memory at `va`, page by page.
    pub fn write_bytes(&self, va: VirtAddr, bytes: &[u8]) -> SysResult<()> {
        let mut va = va;
        let mut bytes = bytes;
        while !bytes.is_empty() {
            let pa = self.translate_for_access(va, true)?;
            let chunk = cmp::min(PAGE_SIZE - va.page_offset(), bytes.len());
            let (head, tail) = bytes.split_at(chunk);
            self.frames.write_bytes(pa, head);
            bytes = tail;
            va = VirtAddr::new(va.to_usize() + chunk);
        }
        Ok(())
    }

    /// Loads the naturally-aligned 4-byte word at `va`.
    pub fn load_u32(&self, va: VirtAddr) -> SysResult<u32> {
        if va.to_usize() % 4 != 0 {
            return Err(SysError::EINVAL);
        }
        let pa = self.translate_for_access(va, false)?;
        Ok(self.frames.load_u32(pa))
    }

    /// Stores the naturally-aligned 4-byte word at `va`.
    pub fn store_u32(&self, va: VirtAddr, value: u32) -> SysResult<()> {
        if va.to_usize() % 4 != 0 {
            return Err(SysError::EINVAL);
        }
        let pa = self.translate_for_access(va, true)?;
        self.frames.store_u32(pa, value);
        Ok(())
    }

    /// Atomically replaces the 4-byte word at `va` with `new` if it equals
    /// `current`. Returns the value observed before the operation; the swap
    /// happened iff that value equals `current`.
    pub fn compare_exchange_u32(
        &self,
        va: VirtAddr,
        current: u32,
        new: u32,
    ) -> SysResult<u32> {
        if va.to_usize() % 4 != 0 {
            return Err(SysError::EINVAL);
        }
        let pa = self.translate_for_access(va, true)?;
        Ok(match self.frames.compare_exchange_u32(pa, current, new) {
            Ok(previous) => previous,
            Err(previous) => previous,
        })
    }
}

impl Drop for AddrSpace {
    fn drop(&mut self) {
        let frames = Arc::clone(&self.frames);
        for ppn in self.dismantle() {
            frames.free_frame(ppn);
        }
    }
}
