//! Shared accessor core for the concrete regions.
//!
//! [`RawMem`] wraps a raw base pointer plus length and implements every
//! access discipline once; [`HeapRegion`] and [`MmapRegion`] both delegate
//! here through the crate-internal [`RawBacked`] trait, which carries the
//! blanket [`Region`] implementation.
//!
//! Atomics are obtained by casting properly aligned interior pointers with
//! `Atomic*::from_ptr`, so the same bytes can be raced from other threads or
//! other processes mapping the same file. Bulk operations are plain memcpy
//! and must not be raced; they exist for initialization and debugging dumps.
//!
//! [`HeapRegion`]: crate::heap::HeapRegion
//! [`MmapRegion`]: crate::mmap::MmapRegion

use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, AtomicUsize, Ordering};

use shmview_error::{Result, ViewError};
use tracing::{trace, warn};

use crate::traits::Region;

/// Bounds/alignment checking policy, chosen at region construction.
///
/// `Unchecked` keeps `debug_assert!` only and is the raw fast path for
/// callers that have already validated their offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundsPolicy {
    /// Validate every access against the region bounds and the natural
    /// alignment of the accessed width.
    #[default]
    Checked,
    /// Skip validation in release builds (`debug_assert!` only).
    Unchecked,
}

/// Raw base pointer + length + policy. The owner of the allocation (heap
/// block or file mapping) keeps it alive for the lifetime of this value.
pub(crate) struct RawMem {
    ptr: NonNull<u8>,
    len: u64,
    policy: BoundsPolicy,
}

// The backing bytes are raced only through atomics; bulk access is the
// caller's responsibility to serialize.
unsafe impl Send for RawMem {}
unsafe impl Sync for RawMem {}

impl RawMem {
    pub(crate) fn new(ptr: NonNull<u8>, len: u64, policy: BoundsPolicy) -> Self {
        Self { ptr, len, policy }
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Base pointer of the allocation, for the owner's deallocation path.
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Validate `[offset, offset + size)` and alignment, returning the
    /// interior pointer.
    fn check(&self, offset: u64, size: u64, align: u64) -> Result<*mut u8> {
        match self.policy {
            BoundsPolicy::Checked => {
                if offset.checked_add(size).is_none_or(|end| end > self.len) {
                    return Err(ViewError::OutOfBounds {
                        offset,
                        len: size,
                        region_len: self.len,
                    });
                }
                if offset % align != 0 {
                    return Err(ViewError::Misaligned { offset, align });
                }
            }
            BoundsPolicy::Unchecked => {
                debug_assert!(offset + size <= self.len, "out of bounds at {offset}");
                debug_assert!(offset % align == 0, "misaligned at {offset}");
            }
        }
        // Cannot overflow: offset < len and the allocation is len bytes.
        Ok(unsafe { self.ptr.as_ptr().add(offset as usize) })
    }

    fn atomic_u8(&self, offset: u64) -> Result<&AtomicU8> {
        let p = self.check(offset, 1, 1)?;
        Ok(unsafe { AtomicU8::from_ptr(p) })
    }

    fn atomic_i32(&self, offset: u64) -> Result<&AtomicI32> {
        let p = self.check(offset, 4, 4)?;
        Ok(unsafe { AtomicI32::from_ptr(p.cast()) })
    }

    fn atomic_i64(&self, offset: u64) -> Result<&AtomicI64> {
        let p = self.check(offset, 8, 8)?;
        Ok(unsafe { AtomicI64::from_ptr(p.cast()) })
    }
}

/// Reservation bookkeeping shared by the concrete regions.
#[derive(Default)]
pub(crate) struct ReservationCounter {
    count: AtomicUsize,
}

impl ReservationCounter {
    pub(crate) fn reserve(&self, kind: &'static str, owner: &'static str) {
        let n = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(region = kind, owner, reservations = n, "region reserved");
    }

    pub(crate) fn release(&self, kind: &'static str, owner: &'static str) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Underflow: a release without a matching reserve.
            self.count.store(0, Ordering::Release);
            warn!(region = kind, owner, "release without matching reservation");
        } else {
            trace!(
                region = kind,
                owner,
                reservations = prev - 1,
                "region released"
            );
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Called by the owning region's `Drop`.
    pub(crate) fn warn_if_leaked(&self, kind: &'static str) {
        let n = self.count();
        if n != 0 {
            warn!(
                region = kind,
                reservations = n,
                "region dropped with live reservations (leaked views?)"
            );
        }
    }
}

/// Internal glue implemented by the concrete regions; carries the blanket
/// [`Region`] implementation so the accessor logic exists exactly once.
pub(crate) trait RawBacked {
    fn raw(&self) -> &RawMem;
    fn counter(&self) -> &ReservationCounter;
    fn kind(&self) -> &'static str;
}

impl<T: RawBacked + Send + Sync + std::fmt::Debug> Region for T {
    fn len(&self) -> u64 {
        self.raw().len()
    }

    fn read_u8(&self, offset: u64) -> Result<u8> {
        Ok(self.raw().atomic_u8(offset)?.load(Ordering::Relaxed))
    }

    fn write_u8(&self, offset: u64, v: u8) -> Result<()> {
        self.raw().atomic_u8(offset)?.store(v, Ordering::Relaxed);
        Ok(())
    }

    fn read_i32(&self, offset: u64) -> Result<i32> {
        Ok(self.raw().atomic_i32(offset)?.load(Ordering::Relaxed))
    }

    fn write_i32(&self, offset: u64, v: i32) -> Result<()> {
        self.raw().atomic_i32(offset)?.store(v, Ordering::Relaxed);
        Ok(())
    }

    fn read_i64(&self, offset: u64) -> Result<i64> {
        Ok(self.raw().atomic_i64(offset)?.load(Ordering::Relaxed))
    }

    fn write_i64(&self, offset: u64, v: i64) -> Result<()> {
        self.raw().atomic_i64(offset)?.store(v, Ordering::Relaxed);
        Ok(())
    }

    fn read_volatile_i32(&self, offset: u64) -> Result<i32> {
        Ok(self.raw().atomic_i32(offset)?.load(Ordering::Acquire))
    }

    fn read_volatile_i64(&self, offset: u64) -> Result<i64> {
        Ok(self.raw().atomic_i64(offset)?.load(Ordering::Acquire))
    }

    fn write_volatile_i32(&self, offset: u64, v: i32) -> Result<()> {
        self.raw().atomic_i32(offset)?.store(v, Ordering::SeqCst);
        Ok(())
    }

    fn write_volatile_i64(&self, offset: u64, v: i64) -> Result<()> {
        self.raw().atomic_i64(offset)?.store(v, Ordering::SeqCst);
        Ok(())
    }

    fn write_ordered_i32(&self, offset: u64, v: i32) -> Result<()> {
        self.raw().atomic_i32(offset)?.store(v, Ordering::Release);
        Ok(())
    }

    fn write_ordered_i64(&self, offset: u64, v: i64) -> Result<()> {
        self.raw().atomic_i64(offset)?.store(v, Ordering::Release);
        Ok(())
    }

    fn compare_and_swap_u8(&self, offset: u64, expected: u8, new: u8) -> Result<bool> {
        Ok(self
            .raw()
            .atomic_u8(offset)?
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    fn write_ordered_u8(&self, offset: u64, v: u8) -> Result<()> {
        self.raw().atomic_u8(offset)?.store(v, Ordering::Release);
        Ok(())
    }

    fn compare_and_swap_i32(&self, offset: u64, expected: i32, new: i32) -> Result<bool> {
        Ok(self
            .raw()
            .atomic_i32(offset)?
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    fn compare_and_swap_i64(&self, offset: u64, expected: i64, new: i64) -> Result<bool> {
        Ok(self
            .raw()
            .atomic_i64(offset)?
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    fn add_and_get_i32(&self, offset: u64, delta: i32) -> Result<i32> {
        Ok(self
            .raw()
            .atomic_i32(offset)?
            .fetch_add(delta, Ordering::SeqCst)
            .wrapping_add(delta))
    }

    fn add_and_get_i64(&self, offset: u64, delta: i64) -> Result<i64> {
        Ok(self
            .raw()
            .atomic_i64(offset)?
            .fetch_add(delta, Ordering::SeqCst)
            .wrapping_add(delta))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let p = self.raw().check(offset, buf.len() as u64, 1)?;
        unsafe { std::ptr::copy_nonoverlapping(p, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_bytes(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let p = self.raw().check(offset, buf.len() as u64, 1)?;
        unsafe { std::ptr::copy_nonoverlapping(buf.as_ptr(), p, buf.len()) };
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn zero_out(&self, start: u64, end: u64) -> Result<()> {
        if end < start {
            return Err(ViewError::OutOfBounds {
                offset: start,
                len: 0,
                region_len: self.raw().len(),
            });
        }
        let p = self.raw().check(start, end - start, 1)?;
        unsafe { std::ptr::write_bytes(p, 0, (end - start) as usize) };
        Ok(())
    }

    fn reserve(&self, owner: &'static str) {
        self.counter().reserve(self.kind(), owner);
    }

    fn release(&self, owner: &'static str) {
        self.counter().release(self.kind(), owner);
    }

    fn reservation_count(&self) -> usize {
        self.counter().count()
    }
}
