//! The two-process operation primitive.
//!
//! Any call site that needs both sides of a share locked goes through
//! [`lock_pair`], which encodes the deadlock-avoidance rule exactly once:
//! when two per-process locks must be held, the one at the numerically
//! lower process-record address is acquired first, and only one lock is
//! taken when both handles name the same process. Guards are released in
//! reverse acquisition order when the pair drops.

use alloc::sync::Arc;

use mutex::SpinLockGuard;
use systype::{SysError, SysResult};

use super::task::Process;
use crate::vm::AddrSpace;

type SpaceGuard<'a> = SpinLockGuard<'a, Option<AddrSpace>>;

/// Both address-space locks of a source/destination pair.
///
/// Within each variant, the guard acquired second is declared first so
/// that it is dropped, and thus released, first.
enum PairInner<'a> {
    /// `src` and `dst` are the same process.
    Same(SpaceGuard<'a>),
    /// The source record has the lower address.
    SrcFirst {
        dst: SpaceGuard<'a>,
        src: SpaceGuard<'a>,
    },
    /// The destination record has the lower address.
    DstFirst {
        src: SpaceGuard<'a>,
        dst: SpaceGuard<'a>,
    },
}

/// A scope-bound guard over the address spaces of two processes.
pub struct AddrSpacePair<'a>(PairInner<'a>);

impl AddrSpacePair<'_> {
    /// The source address space.
    ///
    /// # Errors
    /// Returns [`ESRCH`] if the source process has torn down.
    ///
    /// [`ESRCH`]: SysError::ESRCH
    pub fn src(&self) -> SysResult<&AddrSpace> {
        let guard = match &self.0 {
            PairInner::Same(guard) => guard,
            PairInner::SrcFirst { src, .. } => src,
            PairInner::DstFirst { src, .. } => src,
        };
        guard.as_ref().ok_or(SysError::ESRCH)
    }

    /// The destination address space, mutably.
    ///
    /// # Errors
    /// Returns [`ESRCH`] if the destination process has torn down.
    ///
    /// [`ESRCH`]: SysError::ESRCH
    pub fn dst_mut(&mut self) -> SysResult<&mut AddrSpace> {
        let guard = match &mut self.0 {
            PairInner::Same(guard) => guard,
            PairInner::SrcFirst { dst, .. } => dst,
            PairInner::DstFirst { dst, .. } => dst,
        };
        guard.as_mut().ok_or(SysError::ESRCH)
    }
}

/// Locks the address spaces of `src` and `dst` in canonical order and
/// returns the dual guard.
pub fn lock_pair<'a>(src: &'a Arc<Process>, dst: &'a Arc<Process>) -> AddrSpacePair<'a> {
    if Arc::ptr_eq(src, dst) {
        return AddrSpacePair(PairInner::Same(src.addr_space().lock()));
    }
    if (Arc::as_ptr(src) as usize) < (Arc::as_ptr(dst) as usize) {
        let src_guard = src.addr_space().lock();
        let dst_guard = dst.addr_space().lock();
        AddrSpacePair(PairInner::SrcFirst {
            dst: dst_guard,
            src: src_guard,
        })
    } else {
        let dst_guard = dst.addr_space().lock();
        let src_guard = src.addr_space().lock();
        AddrSpacePair(PairInner::DstFirst {
            src: src_guard,
            dst: dst_guard,
        })
    }
}
