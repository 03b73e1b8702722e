//! Module for the physical frame arena and its allocator.
//!
//! Physical memory is modeled as a fixed arena of page-sized frames, with
//! [`PhysPageNum`] doubling as the index of a frame in the arena. The
//! allocator hands frames out and takes them back; who gives a frame back
//! is decided by the page-table ownership protocol, not by the allocator.
//!
//! Frame contents are stored as `AtomicU64` words so that address spaces
//! running on different harts can touch a shared frame without data races,
//! and so that naturally-aligned 4-byte words support compare-and-swap.

use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use bitmap_allocator::{BitAlloc, BitAlloc64K};

use config::mm::PAGE_SIZE;
use mutex::SpinLock;
use systype::{SysError, SysResult};

use crate::address::{PhysAddr, PhysPageNum};

/// Words per frame.
const WORDS_PER_FRAME: usize = PAGE_SIZE / 8;

/// Bookkeeping protected by the allocator lock.
struct FramePool {
    /// Bitmap of free frames.
    bitmap: BitAlloc64K,
    /// Number of free frames.
    free: usize,
}

/// The physical frame arena and its allocator.
///
/// This is a construction-time collaborator of the kernel: everything that
/// allocates, frees, or touches frame memory holds a handle to it. The
/// allocation bitmap is protected by a lock; frame contents are atomic
/// words and need none.
pub struct FrameAllocator {
    pool: SpinLock<FramePool>,
    words: Box<[AtomicU64]>,
    frame_count: usize,
}

impl FrameAllocator {
    /// Builds an arena of `frame_count` frames, all free.
    ///
    /// # Panics
    /// Panics if `frame_count` is zero or beyond the bitmap capacity.
    pub fn build(frame_count: usize) -> Self {
        assert!(
            frame_count > 0 && frame_count <= BitAlloc64K::CAP,
            "invalid frame count: {}",
            frame_count
        );
        let mut bitmap = BitAlloc64K::DEFAULT;
        bitmap.insert(0..frame_count);
        let words = (0..frame_count * WORDS_PER_FRAME)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        log::debug!(
            "frame allocator: {} allocatable frames, {:#x} bytes",
            frame_count,
            frame_count * PAGE_SIZE
        );
        FrameAllocator {
            pool: SpinLock::new(FramePool {
                bitmap,
                free: frame_count,
            }),
            words,
            frame_count,
        }
    }

    /// Allocates a zeroed frame.
    ///
    /// # Errors
    /// Returns `ENOMEM` if there are no free frames.
    pub fn alloc_frame(&self) -> SysResult<PhysPageNum> {
        let mut pool = self.pool.lock();
        let index = pool.bitmap.alloc().ok_or(SysError::ENOMEM)?;
        pool.free -= 1;
        drop(pool);
        let ppn = PhysPageNum::new(index);
        self.zero_frame(ppn);
        Ok(ppn)
    }

    /// Allocates a batch of zeroed frames, all or nothing.
    ///
    /// The allocator lock is acquired only once, so this is cheaper than
    /// calling [`FrameAllocator::alloc_frame`] in a loop.
    ///
    /// # Errors
    /// Returns `ENOMEM` if fewer than `count` frames are free; no frame is
    /// allocated in that case.
    pub fn alloc_frames(&self, count: usize) -> SysResult<Vec<PhysPageNum>> {
        let mut pool = self.pool.lock();
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            match pool.bitmap.alloc() {
                Some(index) => frames.push(PhysPageNum::new(index)),
                None => {
                    for ppn in frames {
                        pool.bitmap.dealloc(ppn.to_usize());
                    }
                    return Err(SysError::ENOMEM);
                }
            }
        }
        pool.free -= count;
        drop(pool);
        for &ppn in &frames {
            self.zero_frame(ppn);
        }
        Ok(frames)
    }

    /// Frees a frame.
    ///
    /// # Panics
    /// In debug builds, panics if the frame is already free. A double free
    /// here means the ownership protocol has been violated.
    pub fn free_frame(&self, ppn: PhysPageNum) {
        let index = ppn.to_usize();
        debug_assert!(index < self.frame_count, "frame {:#x} out of arena", index);
        let mut pool = self.pool.lock();
        debug_assert!(!pool.bitmap.test(index), "double free of frame {:#x}", index);
        pool.bitmap.dealloc(index);
        pool.free += 1;
    }

    /// Number of currently free frames.
    pub fn free_frames(&self) -> usize {
        self.pool.lock().free
    }

    /// Total number of frames in the arena.
    pub fn total_frames(&self) -> usize {
        self.frame_count
    }

    fn word(&self, ppn: PhysPageNum, index: usize) -> &AtomicU64 {
        &self.words[ppn.to_usize() * WORDS_PER_FRAME + index]
    }

    fn zero_frame(&self, ppn: PhysPageNum) {
        for index in 0..WORDS_PER_FRAME {
            self.word(ppn, index).store(0, Ordering::Release);
        }
    }

    /// Copies the contents of frame `src` into frame `dst`.
    pub fn copy_frame(&self, src: PhysPageNum, dst: PhysPageNum) {
        for index in 0..WORDS_PER_FRAME {
            let word = self.word(src, index).load(Ordering::Acquire);
            self.word(dst, index).store(word, Ordering::Release);
        }
    }

    /// Reads bytes starting at `pa`. The range must lie within one frame.
    pub fn read_bytes(&self, pa: PhysAddr, buf: &mut [u8]) {
        debug_assert!(pa.page_offset() + buf.len() <= PAGE_SIZE);
        let ppn = pa.page_number();
        for (i, byte) in buf.iter_mut().enumerate() {
            let offset = pa.page_offset() + i;
            let word = self.word(ppn, offset / 8).load(Ordering::Acquire);
            *byte = (word >> ((offset % 8) * 8)) as u8;
        }
    }

    /// Writes bytes starting at `pa`. The range must lie within one frame.
    ///
    /// Each byte is merged into its word with a compare-and-swap loop, so
    /// concurrent writers to other bytes of the same word are not clobbered.
    pub fn write_bytes(&self, pa: PhysAddr, buf: &[u8]) {
        debug_assert!(pa.page_offset() + buf.len() <= PAGE_SIZE);
        let ppn = pa.page_number();
        for (i, &byte) in buf.iter().enumerate() {
            let offset = pa.page_offset() + i;
            let shift = (offset % 8) * 8;
            let mask = 0xffu64 << shift;
            rmw_word(self.word(ppn, offset / 8), |word| {
                (word & !mask) | ((byte as u64) << shift)
            });
        }
    }

    /// Loads the naturally-aligned 4-byte word at `pa`.
    pub fn load_u32(&self, pa: PhysAddr) -> u32 {
        debug_assert!(pa.to_usize() % 4 == 0);
        let shift = (pa.page_offset() % 8) * 8;
        let word = self
            .word(pa.page_number(), pa.page_offset() / 8)
            .load(Ordering::Acquire);
        (word >> shift) as u32
    }

    /// Stores the naturally-aligned 4-byte word at `pa`.
    pub fn store_u32(&self, pa: PhysAddr, value: u32) {
        debug_assert!(pa.to_usize() % 4 == 0);
        let shift = (pa.page_offset() % 8) * 8;
        let mask = 0xffff_ffffu64 << shift;
        rmw_word(self.word(pa.page_number(), pa.page_offset() / 8), |word| {
            (word & !mask) | ((value as u64) << shift)
        });
    }

    /// Atomically replaces the naturally-aligned 4-byte word at `pa` with
    /// `new` if it currently equals `current`.
    ///
    /// Returns `Ok(current)` on success and `Err(actual)` on failure, with
    /// `actual` being the value observed.
    pub fn compare_exchange_u32(
        &self,
        pa: PhysAddr,
        current: u32,
        new: u32,
    ) -> Result<u32, u32> {
        debug_assert!(pa.to_usize() % 4 == 0);
        let shift = (pa.page_offset() % 8) * 8;
        let mask = 0xffff_ffffu64 << shift;
        let word = self.word(pa.page_number(), pa.page_offset() / 8);
        let mut seen = word.load(Ordering::Acquire);
        loop {
            if (seen >> shift) as u32 != current {
                return Err((seen >> shift) as u32);
            }
            let merged = (seen & !mask) | ((new as u64) << shift);
            match word.compare_exchange_weak(seen, merged, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(current),
                Err(actual) => seen = actual,
            }
        }
    }
}

/// Read-modify-write of one arena word with a compare-and-swap loop.
fn rmw_word(word: &AtomicU64, f: impl Fn(u64) -> u64) {
    let mut seen = word.load(Ordering::Relaxed);
    loop {
        match word.compare_exchange_weak(seen, f(seen), Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => seen = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_track_the_count() {
        let allocator = FrameAllocator::build(8);
        assert_eq!(allocator.free_frames(), 8);
        let a = allocator.alloc_frame().unwrap();
        let b = allocator.alloc_frame().unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.free_frames(), 6);
        allocator.free_frame(a);
        allocator.free_frame(b);
        assert_eq!(allocator.free_frames(), 8);
    }

    #[test]
    fn exhaustion_reports_enomem() {
        let allocator = FrameAllocator::build(2);
        let frames = allocator.alloc_frames(2).unwrap();
        assert_eq!(allocator.alloc_frame(), Err(SysError::ENOMEM));
        for ppn in frames {
            allocator.free_frame(ppn);
        }
        assert!(allocator.alloc_frame().is_ok());
    }

    #[test]
    fn batch_alloc_is_all_or_nothing() {
        let allocator = FrameAllocator::build(3);
        assert_eq!(allocator.alloc_frames(4), Err(SysError::ENOMEM));
        assert_eq!(allocator.free_frames(), 3);
        assert_eq!(allocator.alloc_frames(3).unwrap().len(), 3);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_detected() {
        let allocator = FrameAllocator::build(2);
        let ppn = allocator.alloc_frame().unwrap();
        allocator.free_frame(ppn);
        allocator.free_frame(ppn);
    }

    #[test]
    fn frames_are_zeroed_on_alloc() {
        let allocator = FrameAllocator::build(2);
        let ppn = allocator.alloc_frame().unwrap();
        allocator.write_bytes(ppn.address(), b"junk");
        allocator.free_frame(ppn);
        let again = allocator.alloc_frame().unwrap();
        assert_eq!(again, ppn);
        let mut buf = [1u8; 4];
        allocator.read_bytes(again.address(), &mut buf);
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn bytes_round_trip_across_words() {
        let allocator = FrameAllocator::build(1);
        let ppn = allocator.alloc_frame().unwrap();
        let pa = PhysAddr::new(ppn.address().to_usize() + 5);
        allocator.write_bytes(pa, b"hello, frame");
        let mut buf = [0u8; 12];
        allocator.read_bytes(pa, &mut buf);
        assert_eq!(&buf, b"hello, frame");
    }

    #[test]
    fn word_compare_exchange() {
        let allocator = FrameAllocator::build(1);
        let ppn = allocator.alloc_frame().unwrap();
        let pa = PhysAddr::new(ppn.address().to_usize() + 4);
        assert_eq!(allocator.compare_exchange_u32(pa, 0, 0xdead_beef), Ok(0));
        assert_eq!(
            allocator.compare_exchange_u32(pa, 0, 1),
            Err(0xdead_beef)
        );
        assert_eq!(allocator.load_u32(pa), 0xdead_beef);
        // The neighbouring word in the same u64 must be untouched.
        assert_eq!(allocator.load_u32(ppn.address()), 0);
    }
}
