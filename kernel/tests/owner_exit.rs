//! The owner exits while borrowers still map its frames.
//!
//! Teardown must not free a frame another address space still reaches:
//! the first borrower found adopts it, its PTE becomes the owning one, and
//! the frame is freed exactly once, by whoever holds it last.

use std::sync::Arc;

use config::mm::PAGE_SIZE;
use kernel::{
    Kernel,
    clock::Clock,
    syscall::{sys_map_shared_pages, sys_sbrk},
};
use mm::{address::VirtAddr, frame::FrameAllocator};

#[test]
fn borrowers_outlive_the_owner() {
    let frames = Arc::new(FrameAllocator::build(64));
    let kernel = Kernel::new(Arc::clone(&frames), Arc::new(Clock::new()));

    let parent = kernel.spawn_init().unwrap();
    let base = sys_sbrk(&parent, PAGE_SIZE as isize).unwrap();
    parent.write_user(VirtAddr::new(base), b"still here").unwrap();

    let child = kernel.fork(&parent).unwrap();
    let child_map =
        sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base, PAGE_SIZE).unwrap();

    // The grandchild inherits the child's borrowed mapping through fork and
    // re-maps the same range on its own as well.
    let grandchild = kernel.fork(&child).unwrap();
    let grandchild_map =
        sys_map_shared_pages(&kernel, parent.pid(), grandchild.pid(), base, PAGE_SIZE).unwrap();

    let free_before = frames.free_frames();
    kernel.exit(&parent, 0);
    // Only the parent's stack page came back; the shared heap frame was
    // adopted by a borrower instead of being freed.
    assert_eq!(frames.free_frames(), free_before + 1);

    let mut buf = [0u8; 10];
    child.read_user(VirtAddr::new(child_map), &mut buf).unwrap();
    assert_eq!(&buf, b"still here");
    grandchild
        .read_user(VirtAddr::new(grandchild_map), &mut buf)
        .unwrap();
    assert_eq!(&buf, b"still here");
    grandchild
        .read_user(VirtAddr::new(child_map), &mut buf)
        .unwrap();
    assert_eq!(&buf, b"still here");

    // Ownership keeps moving down the chain of borrowers.
    kernel.exit(&child, 0);
    grandchild
        .read_user(VirtAddr::new(grandchild_map), &mut buf)
        .unwrap();
    assert_eq!(&buf, b"still here");

    kernel.exit(&grandchild, 0);
    // Every frame is back and none was freed twice.
    assert_eq!(frames.free_frames(), frames.total_frames());
}
