//! Module for page table entries.
//!
//! This module provides the `PageTableEntry` type, which represents a leaf
//! or non-leaf page table entry, along with functions for creating and
//! manipulating entries.

use bitflags::bitflags;

use config::mm::PPN_WIDTH_SV39;

use crate::address::PhysPageNum;

/// Offset of the physical page number in a page table entry. A physical page
/// number located at bits 10-53 in a page table entry.
const PPN_OFFSET: usize = 10;

bitflags! {
    /// Flags for a page table entry.
    ///
    /// Bits 0-7 are defined by the RISC-V Sv39 specification:
    ///
    /// - `V`: Valid. When set, the PTE is valid. If one of the R, W, or X bits
    ///   is set, the PTE points to a physical page. Otherwise, the PTE points
    ///   to a next-level page table.
    /// - `R`: Read. If set, the page pointed at by the PTE is readable.
    /// - `W`: Write. If set, the page pointed at by the PTE is writable.
    /// - `X`: Execute. If set, the page pointed at by the PTE is executable.
    /// - `U`: User. If set, the page pointed at by the PTE is accessible in
    ///   user mode.
    /// - `G`: Global. If set, the address range pointed at by the PTE is global
    ///   mapped, which is in all address spaces.
    /// - `A`: Accessed. If set, the page pointed at by the PTE has been
    ///   accessed.
    /// - `D`: Dirty. If set, the page pointed at by the PTE has been written to.
    ///
    /// Bits 8-9 are the `RSW` field, which the hardware ignores and leaves to
    /// supervisor software. The low `RSW` bit is used here:
    ///
    /// - `B`: Borrowed. If set, the frame the PTE points at is owned by
    ///   another address space; unmapping or tearing down this PTE must not
    ///   free the frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u16 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
        const B = 1 << 8;
    }
}

/// A page table entry defined in Sv39.
///
/// The lower 10 bits of an entry are flags (hardware flags plus `RSW`),
/// bits 10-53 are the physical page number, and the upper 10 bits are
/// reserved for extensions. In our implementation, the upper 10 bits are
/// always zero.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry {
    bits: usize,
}

impl PageTableEntry {
    /// Creates a page table entry from the given physical page number and flags.
    pub fn new(ppn: PhysPageNum, flags: PteFlags) -> Self {
        PageTableEntry {
            bits: ppn.to_usize() << PPN_OFFSET | flags.bits() as usize,
        }
    }

    /// Returns the physical page number in the page table entry.
    pub fn ppn(self) -> PhysPageNum {
        let ppn_mask = (1 << PPN_WIDTH_SV39) - 1;
        let ppn = (self.bits >> PPN_OFFSET) & ppn_mask;
        PhysPageNum::new(ppn)
    }

    /// Returns the flags in the page table entry.
    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.bits as u16)
    }

    /// Returns whether the page is valid.
    pub fn is_valid(self) -> bool {
        self.flags().contains(PteFlags::V)
    }

    /// Returns whether the entry is a leaf. A valid entry with none of the
    /// R, W, and X bits set points to a next-level page table instead.
    pub fn is_leaf(self) -> bool {
        self.flags()
            .intersects(PteFlags::R | PteFlags::W | PteFlags::X)
    }

    /// Returns whether the page is readable.
    pub fn is_readable(self) -> bool {
        self.flags().contains(PteFlags::R)
    }

    /// Returns whether the page is writable.
    pub fn is_writable(self) -> bool {
        self.flags().contains(PteFlags::W)
    }

    /// Returns whether the page is accessible in user mode.
    pub fn is_user(self) -> bool {
        self.flags().contains(PteFlags::U)
    }

    /// Returns whether the frame the entry points at is owned by another
    /// address space.
    pub fn is_borrowed(self) -> bool {
        self.flags().contains(PteFlags::B)
    }

    /// Marks the frame as borrowed from another address space.
    pub fn set_borrowed(&mut self) {
        self.bits |= PteFlags::B.bits() as usize;
    }

    /// Clears the borrowed mark, making this entry the owner of the frame.
    pub fn clear_borrowed(&mut self) {
        self.bits &= !(PteFlags::B.bits() as usize);
    }
}

impl Default for PageTableEntry {
    /// Returns a default page table entry which is invalid (unmapped).
    fn default() -> Self {
        PageTableEntry { bits: 0 }
    }
}
