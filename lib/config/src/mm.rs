//! Memory layout

/// Page size
pub const PAGE_SIZE: usize = 4096;
/// Width of page offset
pub const PAGE_OFFSET_WIDTH: usize = 12;
/// Width of a physical address in Sv39
pub const PA_WIDTH_SV39: usize = 56;
/// Width of a virtual address in Sv39
pub const VA_WIDTH_SV39: usize = 39;
/// Width of a physical page number in Sv39
pub const PPN_WIDTH_SV39: usize = PA_WIDTH_SV39 - PAGE_OFFSET_WIDTH;
/// Width of a virtual page number in Sv39
pub const VPN_WIDTH_SV39: usize = VA_WIDTH_SV39 - PAGE_OFFSET_WIDTH;

/// Entries per page table
pub const PTE_PER_TABLE: usize = 512;
/// Table nodes one address space may allocate, root included.
///
/// The user span below is small, so a handful of nodes suffices; running
/// out surfaces as `ENOMEM` from the walker.
pub const MAX_TABLE_NODES: usize = 32;

/// End of the user address span. Heap, guard, stack and trampoline all
/// live below this bound.
pub const USER_SPACE_END: usize = 0x40_0000;
/// The trampoline page sits at the very top of the user span.
pub const TRAMPOLINE: usize = USER_SPACE_END - PAGE_SIZE;
/// The trapframe page sits just below the trampoline.
pub const TRAPFRAME: usize = TRAMPOLINE - PAGE_SIZE;
/// Size of the user stack
pub const USER_STACK_SIZE: usize = PAGE_SIZE;
/// Top of the user stack
pub const USER_STACK_TOP: usize = TRAPFRAME;
/// Base of the user stack
pub const USER_STACK_BASE: usize = USER_STACK_TOP - USER_STACK_SIZE;
/// Base of the guard page separating the heap from the user stack.
///
/// The heap top may grow up to this address but never across it.
pub const HEAP_CEILING: usize = USER_STACK_BASE - PAGE_SIZE;
