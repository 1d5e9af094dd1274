//! Heap-allocated region for in-process sharing and tests.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::raw::{BoundsPolicy, RawBacked, RawMem, ReservationCounter};

/// Minimum alignment of the allocation; 8-byte atomics anywhere in the
/// region only require the offset itself to be 8-aligned.
const REGION_ALIGN: usize = 8;

/// A zero-initialized, 8-byte-aligned heap allocation exposed as a
/// [`Region`](crate::Region).
///
/// Clone the surrounding `Arc` (see [`SharedRegion`](crate::SharedRegion))
/// to share it between threads; the bytes themselves are raced through the
/// atomic accessors.
pub struct HeapRegion {
    mem: RawMem,
    layout: Layout,
    reservations: ReservationCounter,
}

impl HeapRegion {
    /// Allocate a zeroed region of `len` bytes with full bounds checking.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the allocation fails.
    #[must_use]
    pub fn new(len: u64) -> Self {
        Self::with_policy(len, BoundsPolicy::Checked)
    }

    /// Allocate with an explicit [`BoundsPolicy`].
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the allocation fails.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_policy(len: u64, policy: BoundsPolicy) -> Self {
        assert!(len > 0, "region length must be positive");
        let layout = Layout::from_size_align(len as usize, REGION_ALIGN)
            .expect("region layout must be valid");
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout)
        };
        Self {
            mem: RawMem::new(ptr, len, policy),
            layout,
            reservations: ReservationCounter::default(),
        }
    }
}

impl RawBacked for HeapRegion {
    fn raw(&self) -> &RawMem {
        &self.mem
    }

    fn counter(&self) -> &ReservationCounter {
        &self.reservations
    }

    fn kind(&self) -> &'static str {
        "heap"
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        self.reservations.warn_if_leaked("heap");
        // SAFETY: allocated in `with_policy` with this exact layout.
        unsafe { alloc::dealloc(self.mem.base_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapRegion")
            .field("len", &self.mem.len())
            .field("reservations", &self.reservations.count())
            .finish()
    }
}
