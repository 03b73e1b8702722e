//! Sharing pages between address spaces.
//!
//! The mapper splices the frames backing a source range into a destination
//! page table, directly above the destination's heap top. No frame changes
//! hands: the new entries carry the borrowed bit, so teardown and unmap
//! know the destination does not own them. The unmapper removes such a
//! range again and, when the range sat at the heap top, gives the virtual
//! space back.

use alloc::vec::Vec;

use config::mm::{HEAP_CEILING, PAGE_SIZE};
use mm::{
    address::{PhysPageNum, VirtAddr, VirtPageNum},
    pte::PteFlags,
};
use systype::{SysError, SysResult};

use super::addr_space::AddrSpace;
use crate::task::pair::AddrSpacePair;

impl AddrSpace {
    /// Walks the source side of a share: records the frame and flags of
    /// every page backing `[src_va, src_va + size)`.
    ///
    /// The range must lie inside the heap and every page must be present
    /// and user-accessible. Nothing is mutated, so a failure here has no
    /// side effects.
    ///
    /// # Errors
    /// Returns [`EFAULT`] if the range leaves the heap or touches an
    /// absent or non-user page.
    ///
    /// [`EFAULT`]: SysError::EFAULT
    pub(crate) fn collect_shared_source(
        &self,
        src_va: VirtAddr,
        size: usize,
    ) -> SysResult<Vec<(PhysPageNum, PteFlags)>> {
        let end = src_va
            .to_usize()
            .checked_add(size)
            .filter(|&end| end <= self.heap_top.to_usize())
            .ok_or(SysError::EFAULT)?;
        let start_page = src_va.page_number().to_usize();
        let end_page = VirtAddr::new(end).page_round_up().page_number().to_usize();
        let mut pages = Vec::with_capacity(end_page - start_page);
        for page in start_page..end_page {
            let entry = self
                .page_table
                .translate(VirtPageNum::new(page))
                .ok_or(SysError::EFAULT)?;
            if !entry.is_user() || !entry.is_leaf() {
                return Err(SysError::EFAULT);
            }
            pages.push((entry.ppn(), entry.flags()));
        }
        Ok(pages)
    }

    /// Installs borrowed mappings of the given frames at the heap top and
    /// advances the top past them. Returns the base of the new range.
    ///
    /// Permissions mirror the source exactly; only the borrowed bit is
    /// added. No frame is allocated, so a partial installation is undone
    /// by clearing the installed entries.
    ///
    /// # Errors
    /// Returns [`ENOMEM`] if the range would cross the guard page or a
    /// table node cannot be created; the heap top is unchanged on error.
    ///
    /// [`ENOMEM`]: SysError::ENOMEM
    pub(crate) fn install_borrowed_frames(
        &mut self,
        pages: &[(PhysPageNum, PteFlags)],
    ) -> SysResult<VirtAddr> {
        let base = self.heap_top;
        let new_top = base
            .to_usize()
            .checked_add(pages.len() * PAGE_SIZE)
            .filter(|&top| top <= HEAP_CEILING)
            .ok_or(SysError::ENOMEM)?;
        let base_page = base.page_number().to_usize();
        for (i, &(ppn, flags)) in pages.iter().enumerate() {
            let vpn = VirtPageNum::new(base_page + i);
            if let Err(e) = self.page_table.map_page_to(vpn, ppn, flags | PteFlags::B) {
                for j in 0..i {
                    self.page_table.unmap_page(VirtPageNum::new(base_page + j));
                }
                return Err(e);
            }
        }
        self.heap_top = VirtAddr::new(new_top);
        Ok(base)
    }

    /// Removes a borrowed range installed by the mapper.
    ///
    /// The range is widened to page boundaries. Every page in it must be
    /// present and borrowed; owning pages cannot be unmapped through this
    /// call, and nothing is mutated unless the whole range qualifies.
    /// Frames are never freed here.
    ///
    /// If the range's upper bound is the heap top, the top slides down past
    /// the vacated pages and any unmapped holes below them, so a LIFO
    /// unmap returns `sbrk(0)` to its old value. Anywhere else the range
    /// becomes a hole and the top stays put.
    ///
    /// # Errors
    /// Returns [`EINVAL`] for a zero size, [`EFAULT`] if a page is absent
    /// or the range leaves the heap, and [`EPERM`] if a page is owned.
    ///
    /// [`EINVAL`]: SysError::EINVAL
    /// [`EFAULT`]: SysError::EFAULT
    /// [`EPERM`]: SysError::EPERM
    pub(crate) fn unmap_borrowed_range(&mut self, va: VirtAddr, size: usize) -> SysResult<()> {
        if size == 0 {
            return Err(SysError::EINVAL);
        }
        let end = va
            .to_usize()
            .checked_add(size)
            .filter(|&end| end <= self.heap_top.to_usize())
            .ok_or(SysError::EFAULT)?;
        let start_page = va.page_number().to_usize();
        let end_page = VirtAddr::new(end).page_round_up().page_number().to_usize();
        for page in start_page..end_page {
            let entry = self
                .page_table
                .translate(VirtPageNum::new(page))
                .ok_or(SysError::EFAULT)?;
            if !entry.is_borrowed() {
                return Err(SysError::EPERM);
            }
        }
        for page in start_page..end_page {
            self.page_table.unmap_page(VirtPageNum::new(page));
        }
        if end_page * PAGE_SIZE == self.heap_top.to_usize() {
            let mut new_top = start_page * PAGE_SIZE;
            while new_top > 0 {
                let below = VirtPageNum::new(new_top / PAGE_SIZE - 1);
                if self.page_table.translate(below).is_some() {
                    break;
                }
                new_top -= PAGE_SIZE;
            }
            self.heap_top = VirtAddr::new(new_top);
        }
        Ok(())
    }
}

/// Splices the frames backing `[src_va, src_va + size)` of the pair's
/// source into its destination, above the destination's heap top.
///
/// Returns the destination address of the shared bytes; the intra-page
/// offset of `src_va` is preserved, so the result points at the same byte
/// the caller named. Both address spaces must be locked, which the pair
/// guard guarantees.
///
/// # Errors
/// Returns [`EINVAL`] for a zero size, [`ESRCH`] if either side has torn
/// down, and the collection and installation errors of
/// [`AddrSpace::collect_shared_source`] and
/// [`AddrSpace::install_borrowed_frames`]. Nothing is mutated on error.
///
/// [`EINVAL`]: SysError::EINVAL
/// [`ESRCH`]: SysError::ESRCH
pub fn map_shared_pages(
    pair: &mut AddrSpacePair<'_>,
    src_va: VirtAddr,
    size: usize,
) -> SysResult<VirtAddr> {
    if size == 0 {
        return Err(SysError::EINVAL);
    }
    let pages = pair.src()?.collect_shared_source(src_va, size)?;
    let base = pair.dst_mut()?.install_borrowed_frames(&pages)?;
    Ok(VirtAddr::new(base.to_usize() + src_va.page_offset()))
}

/// Removes the borrowed range `[va, va + size)` from the given address
/// space, widened to page boundaries. The inverse of
/// [`map_shared_pages`]; see [`AddrSpace::unmap_borrowed_range`] for the
/// heap-top policy.
pub fn unmap_shared_pages(space: &mut AddrSpace, va: VirtAddr, size: usize) -> SysResult<()> {
    space.unmap_borrowed_range(va, size)
}
