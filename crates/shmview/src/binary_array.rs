//! Binary array codecs: `[capacity: i64][used: i64][elements...]`.
//!
//! Per-element access computes the absolute offset and delegates to the
//! region's atomics directly; there is no array-wide lock. The `used`
//! counter only ever advances (monotonic CAS loop), and any element can be
//! aliased as a standalone binary scalar view via `bind_value_at`.
//!
//! Arrays constructed with a [`RecoveryRegistry`] participate in the crash
//! sentinel protocol: the moment a caller CASes the reserved "not complete"
//! value into an element, the array registers its element-0 location so a
//! later [`RecoveryRegistry::force_all_to_not_complete`] sweep can mark it.

use std::sync::Arc;

use parking_lot::Mutex;
use shmview_error::{Result, ViewError};
use shmview_region::{Region, SharedRegion};

use crate::binary_scalar::{BinaryIntRef, BinaryLongRef};
use crate::binding::{align8, Binding, LeakPolicy, View};
use crate::recovery::{RecoveryRegistry, SentinelWidth, SlotHandle};
use crate::{INT_NOT_COMPLETE, LONG_NOT_COMPLETE};

/// Byte offset of the stored capacity within the header.
const CAPACITY_OFFSET: u64 = 0;
/// Byte offset of the `used` counter within the header.
const USED_OFFSET: u64 = 8;
/// Header size: capacity plus used, both eight bytes.
pub const HEADER_SIZE: u64 = 16;

/// Validate the stored header at `offset` against the region and return the
/// capacity.
fn read_header(region: &dyn Region, offset: u64, elem_size: u64) -> Result<u64> {
    let capacity = region.read_i64(offset + CAPACITY_OFFSET)?;
    if capacity <= 0 {
        return Err(ViewError::header_corrupt(format!(
            "stored capacity is {capacity}"
        )));
    }
    #[allow(clippy::cast_sign_loss)]
    let capacity = capacity as u64;
    // A huge stored capacity must surface as corruption, not wrap the math.
    let end = capacity
        .checked_mul(elem_size)
        .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
        .and_then(|total| offset.checked_add(total));
    match end {
        Some(end) if end <= region.len() => {}
        _ => {
            return Err(ViewError::header_corrupt(format!(
                "capacity {capacity} does not fit at offset {offset}, region has {}",
                region.len()
            )));
        }
    }
    let used = region.read_i64(offset + USED_OFFSET)?;
    if used < 0 || used as u64 > capacity {
        return Err(ViewError::header_corrupt(format!(
            "used {used} exceeds capacity {capacity}"
        )));
    }
    Ok(capacity)
}

/// Monotonic `used` advance shared by both element widths.
fn set_max_used(region: &dyn Region, offset: u64, capacity: u64, n: i64) -> Result<i64> {
    if n < 0 || n as u64 > capacity {
        return Err(ViewError::IndexOutOfBounds {
            index: n.max(0) as u64,
            capacity,
        });
    }
    loop {
        let current = region.read_volatile_i64(offset + USED_OFFSET)?;
        if n <= current {
            return Ok(current);
        }
        if region.compare_and_swap_i64(offset + USED_OFFSET, current, n)? {
            return Ok(n);
        }
    }
}

macro_rules! binary_array_ref {
    (
        $(#[$doc:meta])*
        $name:ident, $owner:literal, $elem:ty, $elem_size:expr,
        $scalar:ident, $not_complete:expr, $width:expr,
        read = $read:ident, write = $write:ident,
        read_volatile = $read_volatile:ident, write_ordered = $write_ordered:ident,
        cas = $cas:ident
    ) => {
        $(#[$doc])*
        pub struct $name {
            binding: Binding,
            capacity: u64,
            recovery: Option<Arc<RecoveryRegistry>>,
            slot: Mutex<Option<SlotHandle>>,
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self {
                    binding: Binding::new($owner),
                    capacity: 0,
                    recovery: None,
                    slot: Mutex::new(None),
                }
            }

            /// Participate in the sentinel protocol through `registry`.
            #[must_use]
            pub fn with_recovery(registry: Arc<RecoveryRegistry>) -> Self {
                let mut this = Self::new();
                this.recovery = Some(registry);
                this
            }

            #[must_use]
            pub fn with_leak_policy(policy: LeakPolicy) -> Self {
                Self {
                    binding: Binding::with_leak_policy($owner, policy),
                    capacity: 0,
                    recovery: None,
                    slot: Mutex::new(None),
                }
            }

            /// Total bytes an array of `capacity` elements occupies.
            #[must_use]
            pub const fn size_in_bytes(capacity: u64) -> u64 {
                HEADER_SIZE + capacity * $elem_size
            }

            /// Re-derive the total byte size from the header stored at
            /// `offset`.
            pub fn peak_length(region: &dyn Region, offset: u64) -> Result<u64> {
                let capacity = read_header(region, offset, $elem_size)?;
                Ok(Self::size_in_bytes(capacity))
            }

            /// Initialize a fresh array: header with `used = 0`, elements
            /// zero-filled. Returns the bytes written.
            pub fn write(region: &dyn Region, offset: u64, capacity: i64) -> Result<u64> {
                if capacity <= 0 {
                    return Err(ViewError::InvalidCapacity { capacity });
                }
                region.write_i64(offset + CAPACITY_OFFSET, capacity)?;
                region.write_i64(offset + USED_OFFSET, 0)?;
                #[allow(clippy::cast_sign_loss)]
                let total = Self::size_in_bytes(capacity as u64);
                region.zero_out(offset + HEADER_SIZE, offset + total)?;
                Ok(total)
            }

            /// Fixed capacity recorded at bind time.
            #[must_use]
            pub fn capacity(&self) -> u64 {
                self.capacity
            }

            /// Volatile read of the `used` counter.
            pub fn get_used(&self) -> Result<i64> {
                let (region, offset) = self.binding.require()?;
                region.read_volatile_i64(offset + USED_OFFSET)
            }

            /// Volatile read of the stored capacity header field (the cached
            /// [`Self::capacity`] never changes after bind; this re-reads the
            /// shared header).
            pub fn get_capacity(&self) -> Result<i64> {
                let (region, offset) = self.binding.require()?;
                region.read_volatile_i64(offset + CAPACITY_OFFSET)
            }

            /// Advance `used` to `n` if (and only if) that is an increase.
            /// Returns the resulting counter value.
            pub fn set_max_used(&self, n: i64) -> Result<i64> {
                let (region, offset) = self.binding.require()?;
                set_max_used(&**region, offset, self.capacity, n)
            }

            fn elem_offset(&self, index: u64) -> Result<(&SharedRegion, u64)> {
                let (region, offset) = self.binding.require()?;
                if index >= self.capacity {
                    return Err(ViewError::IndexOutOfBounds {
                        index,
                        capacity: self.capacity,
                    });
                }
                Ok((region, offset + HEADER_SIZE + index * $elem_size))
            }

            pub fn get_value_at(&self, index: u64) -> Result<$elem> {
                let (region, off) = self.elem_offset(index)?;
                region.$read(off)
            }

            pub fn set_value_at(&self, index: u64, v: $elem) -> Result<()> {
                let (region, off) = self.elem_offset(index)?;
                region.$write(off, v)
            }

            pub fn get_volatile_value_at(&self, index: u64) -> Result<$elem> {
                let (region, off) = self.elem_offset(index)?;
                region.$read_volatile(off)
            }

            /// Release-only store.
            pub fn set_ordered_value_at(&self, index: u64, v: $elem) -> Result<()> {
                let (region, off) = self.elem_offset(index)?;
                region.$write_ordered(off, v)
            }

            /// Atomic CAS on one element. Writing the "not complete"
            /// sentinel registers this array for the recovery sweep.
            pub fn compare_and_set_index(
                &self,
                index: u64,
                expected: $elem,
                new: $elem,
            ) -> Result<bool> {
                let (region, off) = self.elem_offset(index)?;
                let swapped = region.$cas(off, expected, new)?;
                if swapped && new == $not_complete {
                    self.register_for_recovery()?;
                }
                Ok(swapped)
            }

            /// Alias element `index` as a standalone binary scalar view.
            pub fn bind_value_at(&self, index: u64, scalar: &mut $scalar) -> Result<()> {
                let (region, off) = self.elem_offset(index)?;
                scalar.bind(Arc::clone(region), off, $elem_size)
            }

            fn register_for_recovery(&self) -> Result<()> {
                let Some(registry) = &self.recovery else {
                    return Ok(());
                };
                let mut slot = self.slot.lock();
                if slot.is_none() {
                    let (region, offset) = self.binding.require()?;
                    *slot = registry.register(region, offset + HEADER_SIZE, $width);
                }
                Ok(())
            }

            fn release_slot(&self) {
                if let Some(registry) = &self.recovery {
                    if let Some(handle) = self.slot.lock().take() {
                        registry.deregister(handle);
                    }
                }
            }
        }

        impl View for $name {
            fn bind(&mut self, region: SharedRegion, offset: u64, length: u64) -> Result<()> {
                let aligned = align8(offset);
                let expected = Self::peak_length(&*region, aligned)?;
                if length != expected {
                    return Err(ViewError::SizeMismatch {
                        expected,
                        actual: length,
                    });
                }
                let capacity = read_header(&*region, aligned, $elem_size)?;
                self.release_slot();
                self.binding.attach(region, aligned);
                self.capacity = capacity;
                Ok(())
            }

            fn close(&mut self) {
                self.release_slot();
                self.binding.close();
                self.capacity = 0;
            }

            fn region(&self) -> Option<&SharedRegion> {
                self.binding.region()
            }

            fn offset(&self) -> u64 {
                self.binding.offset()
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.release_slot();
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("offset", &self.binding.offset())
                    .field("capacity", &self.capacity)
                    .finish()
            }
        }
    };
}

binary_array_ref!(
    /// Fixed-capacity array of 32-bit values with a 16-byte binary header.
    BinaryIntArrayRef, "binary-int-array-ref", i32, 4,
    BinaryIntRef, INT_NOT_COMPLETE, SentinelWidth::I32,
    read = read_i32, write = write_i32,
    read_volatile = read_volatile_i32, write_ordered = write_ordered_i32,
    cas = compare_and_swap_i32
);

binary_array_ref!(
    /// Fixed-capacity array of 64-bit values with a 16-byte binary header.
    BinaryLongArrayRef, "binary-long-array-ref", i64, 8,
    BinaryLongRef, LONG_NOT_COMPLETE, SentinelWidth::I64,
    read = read_i64, write = write_i64,
    read_volatile = read_volatile_i64, write_ordered = write_ordered_i64,
    cas = compare_and_swap_i64
);

#[cfg(test)]
mod tests {
    use super::*;
    use shmview_region::HeapRegion;

    fn region(len: u64) -> SharedRegion {
        Arc::new(HeapRegion::new(len))
    }

    fn bound_int_array(region: &SharedRegion, offset: u64, capacity: i64) -> BinaryIntArrayRef {
        let len = BinaryIntArrayRef::write(&**region, offset, capacity).unwrap();
        let mut arr = BinaryIntArrayRef::new();
        arr.bind(Arc::clone(region), offset, len).unwrap();
        arr
    }

    #[test]
    fn write_then_bind_round_trip() {
        let r = region(4096);
        let arr = bound_int_array(&r, 0, 128);
        assert_eq!(arr.capacity(), 128);
        assert_eq!(arr.get_capacity().unwrap(), 128);
        assert_eq!(arr.get_used().unwrap(), 0);

        // Scenario: set all 128 elements to i+1, read them all back.
        for i in 0..128u64 {
            arr.set_value_at(i, i as i32 + 1).unwrap();
        }
        for i in 0..128u64 {
            assert_eq!(arr.get_value_at(i).unwrap(), i as i32 + 1);
        }
    }

    #[test]
    fn fresh_elements_are_zero() {
        let r = region(256);
        // Dirty the region first so write() must actually clear.
        r.write_bytes(0, &[0xFF; 256]).unwrap();
        let arr = bound_int_array(&r, 0, 8);
        for i in 0..8 {
            assert_eq!(arr.get_value_at(i).unwrap(), 0);
        }
    }

    #[test]
    fn bind_validates_length_against_stored_header() {
        let r = region(256);
        BinaryIntArrayRef::write(&*r, 0, 10).unwrap();
        let mut arr = BinaryIntArrayRef::new();
        assert_eq!(
            arr.bind(Arc::clone(&r), 0, 55).unwrap_err(),
            ViewError::SizeMismatch {
                expected: 56,
                actual: 55
            }
        );
        assert_eq!(arr.get_used().unwrap_err(), ViewError::Unbound);
    }

    #[test]
    fn huge_stored_capacity_is_corrupt_not_overflow() {
        let r = region(64);
        // 2^61 elements of 8 bytes wraps u64 if multiplied unchecked.
        r.write_i64(0, 0x2000_0000_0000_0000).unwrap();
        assert!(matches!(
            BinaryLongArrayRef::peak_length(&*r, 0),
            Err(ViewError::HeaderCorrupt { .. })
        ));
        r.write_i64(0, i64::MAX).unwrap();
        assert!(matches!(
            BinaryIntArrayRef::peak_length(&*r, 0),
            Err(ViewError::HeaderCorrupt { .. })
        ));
    }

    #[test]
    fn bind_rejects_corrupt_headers() {
        let r = region(128);
        let mut arr = BinaryLongArrayRef::new();

        // Zero capacity (uninitialized region).
        assert!(matches!(
            arr.bind(Arc::clone(&r), 0, 64),
            Err(ViewError::HeaderCorrupt { .. })
        ));

        // Capacity larger than the region can hold.
        r.write_i64(0, 1_000).unwrap();
        assert!(matches!(
            arr.bind(Arc::clone(&r), 0, 64),
            Err(ViewError::HeaderCorrupt { .. })
        ));

        // used > capacity.
        BinaryLongArrayRef::write(&*r, 0, 4).unwrap();
        r.write_i64(8, 5).unwrap();
        assert!(matches!(
            arr.bind(Arc::clone(&r), 0, BinaryLongArrayRef::size_in_bytes(4)),
            Err(ViewError::HeaderCorrupt { .. })
        ));
    }

    #[test]
    fn index_bounds_are_checked() {
        let r = region(256);
        let arr = bound_int_array(&r, 0, 8);
        assert_eq!(
            arr.get_value_at(8).unwrap_err(),
            ViewError::IndexOutOfBounds {
                index: 8,
                capacity: 8
            }
        );
        assert!(arr.set_value_at(9, 1).is_err());
    }

    #[test]
    fn used_counter_is_monotonic() {
        let r = region(256);
        let arr = bound_int_array(&r, 0, 16);
        assert_eq!(arr.set_max_used(5).unwrap(), 5);
        assert_eq!(arr.set_max_used(3).unwrap(), 5); // never decreases
        assert_eq!(arr.set_max_used(12).unwrap(), 12);
        assert_eq!(arr.get_used().unwrap(), 12);
        assert!(arr.set_max_used(17).is_err()); // beyond capacity
        assert!(arr.set_max_used(-1).is_err());
    }

    #[test]
    fn element_cas() {
        let r = region(256);
        let arr = bound_int_array(&r, 0, 4);
        arr.set_value_at(2, 10).unwrap();
        assert!(!arr.compare_and_set_index(2, 9, 11).unwrap());
        assert_eq!(arr.get_value_at(2).unwrap(), 10);
        assert!(arr.compare_and_set_index(2, 10, 11).unwrap());
        assert_eq!(arr.get_volatile_value_at(2).unwrap(), 11);
    }

    #[test]
    fn aliased_scalar_view_tracks_element() {
        let r = region(256);
        let arr = bound_int_array(&r, 8, 4);
        let mut elem = BinaryIntRef::new();
        arr.bind_value_at(1, &mut elem).unwrap();

        arr.set_value_at(1, 42).unwrap();
        assert_eq!(elem.get_value().unwrap(), 42);
        elem.set_ordered_value(43).unwrap();
        assert_eq!(arr.get_volatile_value_at(1).unwrap(), 43);
        elem.close();
    }

    #[test]
    fn long_array_round_trip() {
        let r = region(512);
        let len = BinaryLongArrayRef::write(&*r, 0, 8).unwrap();
        assert_eq!(len, 16 + 64);
        let mut arr = BinaryLongArrayRef::new();
        arr.bind(Arc::clone(&r), 0, len).unwrap();
        arr.set_value_at(7, i64::MAX).unwrap();
        arr.set_ordered_value_at(0, -1).unwrap();
        assert_eq!(arr.get_value_at(7).unwrap(), i64::MAX);
        assert_eq!(arr.get_volatile_value_at(0).unwrap(), -1);
        arr.close();
    }

    #[test]
    fn unaligned_bind_rounds_up() {
        let r = region(256);
        BinaryIntArrayRef::write(&*r, 8, 4).unwrap();
        let mut arr = BinaryIntArrayRef::new();
        // Offset 3 aligns to 8, where the header actually lives.
        arr.bind(Arc::clone(&r), 3, BinaryIntArrayRef::size_in_bytes(4))
            .unwrap();
        assert_eq!(arr.offset(), 8);
        assert_eq!(arr.capacity(), 4);
        arr.close();
    }

    #[test]
    fn sentinel_cas_registers_and_sweep_marks_element_zero() {
        let registry = Arc::new(RecoveryRegistry::new());
        registry.start_collecting();

        let r = region(256);
        let len = BinaryLongArrayRef::write(&*r, 0, 4).unwrap();
        let mut arr = BinaryLongArrayRef::with_recovery(Arc::clone(&registry));
        arr.bind(Arc::clone(&r), 0, len).unwrap();

        // Mark an in-flight multi-step update on element 2.
        assert!(arr
            .compare_and_set_index(2, 0, LONG_NOT_COMPLETE)
            .unwrap());
        assert_eq!(registry.registered(), 1);

        arr.set_value_at(0, 777).unwrap();
        assert_eq!(registry.force_all_to_not_complete(), 1);
        assert_eq!(arr.get_volatile_value_at(0).unwrap(), LONG_NOT_COMPLETE);
        arr.close();
    }

    #[test]
    fn closed_array_is_not_swept() {
        let registry = Arc::new(RecoveryRegistry::new());
        registry.start_collecting();

        let r = region(256);
        let len = BinaryIntArrayRef::write(&*r, 0, 4).unwrap();
        let mut arr = BinaryIntArrayRef::with_recovery(Arc::clone(&registry));
        arr.bind(Arc::clone(&r), 0, len).unwrap();
        arr.set_value_at(0, 5).unwrap();
        assert!(arr
            .compare_and_set_index(1, 0, INT_NOT_COMPLETE)
            .unwrap());
        arr.close();

        // The view freed its slot on close; element 0 must stay intact.
        assert_eq!(registry.force_all_to_not_complete(), 0);
        assert_eq!(r.read_i32(HEADER_SIZE).unwrap(), 5);
    }

    #[test]
    fn failed_sentinel_cas_does_not_register() {
        let registry = Arc::new(RecoveryRegistry::new());
        registry.start_collecting();

        let r = region(256);
        let len = BinaryIntArrayRef::write(&*r, 0, 4).unwrap();
        let mut arr = BinaryIntArrayRef::with_recovery(Arc::clone(&registry));
        arr.bind(Arc::clone(&r), 0, len).unwrap();
        arr.set_value_at(1, 9).unwrap();

        assert!(!arr
            .compare_and_set_index(1, 0, INT_NOT_COMPLETE)
            .unwrap());
        assert_eq!(registry.registered(), 0);
        arr.close();
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn set_max_used_never_decreases(ns in proptest::collection::vec(0i64..=16, 1..32)) {
                let r = region(256);
                let arr = bound_int_array(&r, 0, 16);
                let mut high = 0;
                for n in ns {
                    let result = arr.set_max_used(n).unwrap();
                    high = high.max(n);
                    prop_assert_eq!(result, high);
                    prop_assert_eq!(arr.get_used().unwrap(), high);
                }
            }
        }
    }
}
