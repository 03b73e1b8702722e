#![no_std]

pub mod spin_mutex;

pub use spin_mutex::{SpinMutex, SpinMutexGuard};

pub type SpinLock<T> = SpinMutex<T, Spin>;
pub type SpinLockGuard<'a, T> = SpinMutexGuard<'a, T, Spin>;

/// Low-level support for a mutex.
///
/// An implementation may take extra measures around the critical section,
/// such as masking interrupts on architectures where the lock is shared
/// with trap handlers.
pub trait MutexSupport {
    /// Guard data
    type GuardData;
    /// Called before lock() & try_lock()
    fn before_lock() -> Self::GuardData;
    /// Called when MutexGuard dropping
    fn after_unlock(_: &mut Self::GuardData);
}

/// Plain spin support with no extra measures.
#[derive(Debug)]
pub struct Spin;

impl MutexSupport for Spin {
    type GuardData = ();
    #[inline(always)]
    fn before_lock() -> Self::GuardData {}
    #[inline(always)]
    fn after_unlock(_: &mut Self::GuardData) {}
}
