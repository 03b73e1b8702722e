//! Module for manipulating page tables.
//!
//! A page table is the usual Sv39 three-level radix tree, with one twist:
//! table nodes live in a typed arena owned by the `PageTable` value rather
//! than in raw frames, and a non-leaf entry's page-number field holds the
//! index of its child node in that arena. Leaf entries hold real frame
//! numbers. The walker therefore never touches physical memory; only leaf
//! mappings do.
//!
//! Data frames are deliberately not allocated here. Mapping and unmapping
//! only edit entries; the caller decides which frames to allocate or free,
//! because that decision depends on ownership the walker cannot see.

use alloc::vec::Vec;

use config::mm::{MAX_TABLE_NODES, PTE_PER_TABLE};
use systype::{SysError, SysResult};

use crate::{
    address::{PhysPageNum, VirtPageNum},
    pte::{PageTableEntry, PteFlags},
};

/// One table node: a full level of 512 entries.
struct TableNode {
    entries: [PageTableEntry; PTE_PER_TABLE],
}

impl TableNode {
    fn empty() -> Self {
        TableNode {
            entries: [PageTableEntry::default(); PTE_PER_TABLE],
        }
    }
}

/// A three-level page table over an arena of table nodes.
///
/// Node 0 is the root. Nodes are created on demand by
/// [`PageTable::find_entry_force`] and released together when the
/// `PageTable` is dropped; empty intermediate nodes are not reclaimed
/// earlier, matching the usual teardown-only free walk.
pub struct PageTable {
    nodes: Vec<TableNode>,
}

impl PageTable {
    /// Builds a page table with an empty root node.
    pub fn build() -> Self {
        let mut nodes = Vec::new();
        nodes.push(TableNode::empty());
        PageTable { nodes }
    }

    /// Allocates a fresh table node.
    ///
    /// Returns an [`ENOMEM`] error if the table-node limit is reached.
    ///
    /// [`ENOMEM`]: SysError::ENOMEM
    fn alloc_node(&mut self) -> SysResult<usize> {
        if self.nodes.len() >= MAX_TABLE_NODES {
            return Err(SysError::ENOMEM);
        }
        self.nodes.push(TableNode::empty());
        Ok(self.nodes.len() - 1)
    }

    /// Returns a mutable reference to the leaf entry mapping the given VPN,
    /// creating absent intermediate nodes on the way. Note that the
    /// returned entry may be invalid.
    ///
    /// Returns an [`ENOMEM`] error if an intermediate node is needed but the
    /// table-node limit is reached.
    ///
    /// [`ENOMEM`]: SysError::ENOMEM
    pub fn find_entry_force(&mut self, vpn: VirtPageNum) -> SysResult<&mut PageTableEntry> {
        let mut node = 0;
        for (level, index) in vpn.indices().into_iter().enumerate().rev() {
            if level == 0 {
                return Ok(&mut self.nodes[node].entries[index]);
            }
            let entry = self.nodes[node].entries[index];
            node = if entry.is_valid() {
                entry.ppn().to_usize()
            } else {
                let child = self.alloc_node()?;
                self.nodes[node].entries[index] =
                    PageTableEntry::new(PhysPageNum::new(child), PteFlags::V);
                child
            };
        }
        unreachable!();
    }

    /// Returns a reference to the leaf entry mapping the given VPN, or
    /// `None` if an intermediate node is absent. The returned entry may be
    /// invalid.
    pub fn find_entry(&self, vpn: VirtPageNum) -> Option<&PageTableEntry> {
        let mut node = 0;
        for (level, index) in vpn.indices().into_iter().enumerate().rev() {
            if level == 0 {
                return Some(&self.nodes[node].entries[index]);
            }
            let entry = self.nodes[node].entries[index];
            if !entry.is_valid() {
                return None;
            }
            node = entry.ppn().to_usize();
        }
        unreachable!();
    }

    /// Like [`PageTable::find_entry`], but mutable.
    pub fn find_entry_mut(&mut self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        let mut node = 0;
        for (level, index) in vpn.indices().into_iter().enumerate().rev() {
            if level == 0 {
                return Some(&mut self.nodes[node].entries[index]);
            }
            let entry = self.nodes[node].entries[index];
            if !entry.is_valid() {
                return None;
            }
            node = entry.ppn().to_usize();
        }
        unreachable!();
    }

    /// Maps a leaf page to the given frame.
    ///
    /// This method does not allocate the frame; it only sets the mapping.
    /// `flags` must include `V`. Mapping an already mapped page is a bug in
    /// the caller.
    ///
    /// Returns an [`ENOMEM`] error if an intermediate node cannot be
    /// created.
    ///
    /// [`ENOMEM`]: SysError::ENOMEM
    pub fn map_page_to(
        &mut self,
        vpn: VirtPageNum,
        ppn: PhysPageNum,
        flags: PteFlags,
    ) -> SysResult<()> {
        debug_assert!(flags.contains(PteFlags::V));
        let entry = self.find_entry_force(vpn)?;
        debug_assert!(!entry.is_valid(), "remapping vpn {:#x}", vpn.to_usize());
        *entry = PageTableEntry::new(ppn, flags);
        Ok(())
    }

    /// Unmaps a leaf page.
    ///
    /// This method does not free the frame; it only clears the mapping.
    /// Clearing an unmapped page is allowed.
    pub fn unmap_page(&mut self, vpn: VirtPageNum) {
        if let Some(entry) = self.find_entry_mut(vpn) {
            *entry = PageTableEntry::default();
        }
    }

    /// Returns the leaf entry mapping the given VPN if it is present.
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.find_entry(vpn).copied().filter(|entry| entry.is_valid())
    }

    /// Calls `f` on every valid leaf entry in `[start, start + count)`.
    ///
    /// The visitor may edit the entry in place, typically to clear it; the
    /// dispatch on ownership happens in the visitor, which is the one place
    /// that can tell a borrowed leaf from an owning one.
    pub fn visit_leaves<F>(&mut self, start: VirtPageNum, count: usize, mut f: F)
    where
        F: FnMut(VirtPageNum, &mut PageTableEntry),
    {
        for i in 0..count {
            let vpn = VirtPageNum::new(start.to_usize() + i);
            if let Some(entry) = self.find_entry_mut(vpn) {
                if entry.is_valid() {
                    f(vpn, entry);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_flags() -> PteFlags {
        PteFlags::V | PteFlags::R | PteFlags::W | PteFlags::U
    }

    #[test]
    fn map_then_translate() {
        let mut table = PageTable::build();
        let vpn = VirtPageNum::new(42);
        let ppn = PhysPageNum::new(7);
        table.map_page_to(vpn, ppn, leaf_flags()).unwrap();
        let entry = table.translate(vpn).unwrap();
        assert_eq!(entry.ppn(), ppn);
        assert!(entry.is_user());
        assert!(table.translate(VirtPageNum::new(43)).is_none());
    }

    #[test]
    fn unmap_clears_the_entry() {
        let mut table = PageTable::build();
        let vpn = VirtPageNum::new(3);
        table.map_page_to(vpn, PhysPageNum::new(1), leaf_flags()).unwrap();
        table.unmap_page(vpn);
        assert!(table.translate(vpn).is_none());
        // Unmapping again is a no-op.
        table.unmap_page(vpn);
    }

    #[test]
    fn distant_pages_share_no_leaf_node() {
        let mut table = PageTable::build();
        let near = VirtPageNum::new(0);
        let far = VirtPageNum::new(PTE_PER_TABLE);
        table.map_page_to(near, PhysPageNum::new(1), leaf_flags()).unwrap();
        table.map_page_to(far, PhysPageNum::new(2), leaf_flags()).unwrap();
        assert_eq!(table.translate(near).unwrap().ppn(), PhysPageNum::new(1));
        assert_eq!(table.translate(far).unwrap().ppn(), PhysPageNum::new(2));
    }

    #[test]
    fn node_limit_is_enforced() {
        let mut table = PageTable::build();
        let mut result = Ok(());
        for i in 0..MAX_TABLE_NODES {
            // Each mapping lands in a distinct leaf node.
            let vpn = VirtPageNum::new(i * PTE_PER_TABLE);
            result = table.map_page_to(vpn, PhysPageNum::new(i), leaf_flags());
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(SysError::ENOMEM));
    }

    #[test]
    fn visit_leaves_skips_holes() {
        let mut table = PageTable::build();
        table.map_page_to(VirtPageNum::new(0), PhysPageNum::new(1), leaf_flags()).unwrap();
        table.map_page_to(VirtPageNum::new(2), PhysPageNum::new(2), leaf_flags()).unwrap();
        let mut visited = Vec::new();
        table.visit_leaves(VirtPageNum::new(0), 4, |vpn, entry| {
            visited.push((vpn.to_usize(), entry.ppn().to_usize()));
        });
        assert_eq!(visited, [(0, 1), (2, 2)]);
    }
}
