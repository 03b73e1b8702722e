//! Sharing pages between a parent and a child, driven through the syscall
//! surface the way the user-space test programs drive the real kernel.

use std::sync::Arc;

use config::mm::{HEAP_CEILING, PAGE_SIZE};
use kernel::{
    Kernel,
    clock::Clock,
    syscall::{
        SyscallNo, sys_map_shared_pages, sys_sbrk, sys_unmap_shared_pages, sys_wait, syscall,
    },
};
use mm::{address::VirtAddr, frame::FrameAllocator};

fn boot(frame_count: usize) -> (Kernel, Arc<FrameAllocator>) {
    let frames = Arc::new(FrameAllocator::build(frame_count));
    let kernel = Kernel::new(Arc::clone(&frames), Arc::new(Clock::new()));
    (kernel, frames)
}

fn cyclic(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'A' + (i % 26) as u8).collect()
}

#[test]
fn single_page_share() {
    let (kernel, _) = boot(64);
    let parent = kernel.spawn_init().unwrap();

    let base = sys_sbrk(&parent, 100).unwrap();
    parent.write_user(VirtAddr::new(base), &cyclic(100)).unwrap();

    let child = kernel.fork(&parent).unwrap();
    let size_before_map = sys_sbrk(&child, 0).unwrap();

    let mapped = sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base, 100).unwrap();
    let mut head = [0u8; 25];
    child.read_user(VirtAddr::new(mapped), &mut head).unwrap();
    assert_eq!(&head, b"ABCDEFGHIJKLMNOPQRSTUVWXY");

    child
        .write_user(VirtAddr::new(mapped), b"Hello daddy\0")
        .unwrap();
    assert_eq!(sys_unmap_shared_pages(&child, mapped, 100), Ok(0));
    assert_eq!(sys_sbrk(&child, 0).unwrap(), size_before_map);

    kernel.exit(&child, 0);
    kernel.wait(&parent).unwrap();

    let mut greeting = [0u8; 11];
    parent.read_user(VirtAddr::new(base), &mut greeting).unwrap();
    assert_eq!(&greeting, b"Hello daddy");
}

#[test]
fn multi_page_share_without_unmap() {
    const TEST_SIZE: usize = PAGE_SIZE + 200;
    let (kernel, frames) = boot(64);
    let parent = kernel.spawn_init().unwrap();

    let base = sys_sbrk(&parent, TEST_SIZE as isize).unwrap();
    parent
        .write_user(VirtAddr::new(base), &cyclic(TEST_SIZE))
        .unwrap();

    let free_before_fork = frames.free_frames();
    let child = kernel.fork(&parent).unwrap();
    let mapped =
        sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base, TEST_SIZE).unwrap();

    let mut tail = [0u8; 20];
    child
        .read_user(VirtAddr::new(mapped + TEST_SIZE - 20), &mut tail)
        .unwrap();
    assert_eq!(&tail[..], &cyclic(TEST_SIZE)[TEST_SIZE - 20..]);

    child
        .write_user(VirtAddr::new(mapped), b"CHILD_WROTE_START")
        .unwrap();
    child
        .write_user(VirtAddr::new(mapped + TEST_SIZE - 16), b"CHILD_WROTE_END\0")
        .unwrap();

    // The child exits without unmapping; teardown must skip the borrowed
    // pages and the parent must keep seeing the markers.
    kernel.exit(&child, 0);
    sys_wait(&kernel, &parent, 0).unwrap();

    let mut start = [0u8; 17];
    parent.read_user(VirtAddr::new(base), &mut start).unwrap();
    assert_eq!(&start, b"CHILD_WROTE_START");
    let mut end = [0u8; 15];
    parent
        .read_user(VirtAddr::new(base + TEST_SIZE - 16), &mut end)
        .unwrap();
    assert_eq!(&end, b"CHILD_WROTE_END");

    // Everything the child owned came back; the shared frames stayed with
    // the parent and were freed by nobody.
    assert_eq!(frames.free_frames(), free_before_fork);
}

#[test]
fn source_offset_is_preserved() {
    let (kernel, _) = boot(64);
    let parent = kernel.spawn_init().unwrap();
    let base = sys_sbrk(&parent, PAGE_SIZE as isize).unwrap();
    parent
        .write_user(VirtAddr::new(base + 3), b"offset-check")
        .unwrap();

    let child = kernel.fork(&parent).unwrap();
    let mapped = sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base + 3, 12).unwrap();
    assert_eq!(mapped % PAGE_SIZE, 3);

    let mut buf = [0u8; 12];
    child.read_user(VirtAddr::new(mapped), &mut buf).unwrap();
    assert_eq!(&buf, b"offset-check");
}

#[test]
fn straddling_range_maps_both_pages() {
    let (kernel, _) = boot(64);
    let parent = kernel.spawn_init().unwrap();
    let base = sys_sbrk(&parent, 2 * PAGE_SIZE as isize).unwrap();
    let child = kernel.fork(&parent).unwrap();

    let size_before = sys_sbrk(&child, 0).unwrap();
    // Eight bytes that straddle a page boundary need two PTEs.
    sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base + PAGE_SIZE - 4, 8).unwrap();
    assert_eq!(sys_sbrk(&child, 0).unwrap(), size_before + 2 * PAGE_SIZE);
}

#[test]
fn non_lifo_unmap_keeps_the_heap_top() {
    let (kernel, _) = boot(64);
    let parent = kernel.spawn_init().unwrap();
    let base = sys_sbrk(&parent, PAGE_SIZE as isize).unwrap();
    let child = kernel.fork(&parent).unwrap();

    let original = sys_sbrk(&child, 0).unwrap();
    let first =
        sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base, PAGE_SIZE).unwrap();
    let second =
        sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base, PAGE_SIZE).unwrap();

    // Unmapping below the top leaves a hole and the top untouched.
    assert_eq!(sys_unmap_shared_pages(&child, first, PAGE_SIZE), Ok(0));
    assert_eq!(sys_sbrk(&child, 0).unwrap(), original + 2 * PAGE_SIZE);

    // Unmapping the topmost range slides the top past the hole as well.
    assert_eq!(sys_unmap_shared_pages(&child, second, PAGE_SIZE), Ok(0));
    assert_eq!(sys_sbrk(&child, 0).unwrap(), original);
}

#[test]
fn unmap_of_owning_heap_fails_without_side_effects() {
    let (kernel, _) = boot(64);
    let parent = kernel.spawn_init().unwrap();
    let base = sys_sbrk(&parent, PAGE_SIZE as isize).unwrap();
    parent.write_user(VirtAddr::new(base), b"mine").unwrap();
    let top = sys_sbrk(&parent, 0).unwrap();

    // Through the raw syscall surface the failure is just -1.
    let ret = syscall(
        &kernel,
        &parent,
        SyscallNo::UNMAP_SHARED_PAGES as usize,
        [base, PAGE_SIZE, 0, 0, 0, 0],
    );
    assert_eq!(ret, usize::MAX);

    assert_eq!(sys_sbrk(&parent, 0).unwrap(), top);
    let mut buf = [0u8; 4];
    parent.read_user(VirtAddr::new(base), &mut buf).unwrap();
    assert_eq!(&buf, b"mine");
}

#[test]
fn mapping_stops_at_the_guard_page() {
    let (kernel, _) = boot(16);
    let parent = kernel.spawn_init().unwrap();
    let base = sys_sbrk(&parent, PAGE_SIZE as isize).unwrap();
    let child = kernel.fork(&parent).unwrap();

    // The mapper allocates no frames, so the only bound is the guard page.
    let heap_start = sys_sbrk(&child, 0).unwrap();
    let room = (HEAP_CEILING - heap_start) / PAGE_SIZE;
    let mut last = 0;
    for _ in 0..room {
        last = sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base, PAGE_SIZE).unwrap();
    }
    // The next mapping would cross the guard page.
    let ret = syscall(
        &kernel,
        &parent,
        SyscallNo::MAP_SHARED_PAGES as usize,
        [parent.pid(), child.pid(), base, PAGE_SIZE, 0, 0],
    );
    assert_eq!(ret, usize::MAX);

    // Earlier mappings still work, first and last alike.
    parent.write_user(VirtAddr::new(base), b"guard").unwrap();
    let mut buf = [0u8; 5];
    child.read_user(VirtAddr::new(heap_start), &mut buf).unwrap();
    assert_eq!(&buf, b"guard");
    child.read_user(VirtAddr::new(last), &mut buf).unwrap();
    assert_eq!(&buf, b"guard");
}

#[test]
fn sharing_with_an_exited_process_fails() {
    let (kernel, _) = boot(64);
    let parent = kernel.spawn_init().unwrap();
    sys_sbrk(&parent, PAGE_SIZE as isize).unwrap();
    let child = kernel.fork(&parent).unwrap();
    kernel.exit(&child, 0);

    // The zombie is still in the table but its address space is gone.
    let ret = sys_map_shared_pages(&kernel, parent.pid(), child.pid(), 0, PAGE_SIZE);
    assert!(ret.is_err());

    kernel.wait(&parent).unwrap();
    // After reaping, even the lookup fails.
    let ret = sys_map_shared_pages(&kernel, child.pid(), parent.pid(), 0, PAGE_SIZE);
    assert!(ret.is_err());
}

#[test]
fn mapping_zero_bytes_fails() {
    let (kernel, _) = boot(64);
    let parent = kernel.spawn_init().unwrap();
    let base = sys_sbrk(&parent, PAGE_SIZE as isize).unwrap();
    let child = kernel.fork(&parent).unwrap();
    assert!(sys_map_shared_pages(&kernel, parent.pid(), child.pid(), base, 0).is_err());
}
