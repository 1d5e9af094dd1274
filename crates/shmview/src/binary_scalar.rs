//! Binary scalar codecs: machine-native fixed-width values.
//!
//! Every operation delegates straight to the region's atomic primitives; no
//! locking is introduced because the region guarantees hardware-atomic
//! semantics for naturally aligned fixed-width fields.

use shmview_error::{Result, ViewError};
use shmview_region::SharedRegion;

use crate::binding::{Binding, LeakPolicy, View};

/// Byte pattern stored for `true`.
///
/// The two tokens are deliberately non-adjacent and non-zero: an
/// uninitialized (zeroed) region decodes as neither value and surfaces
/// corruption instead of silently reading `false`.
pub const BOOL_TRUE: u8 = 0xB1;
/// Byte pattern stored for `false`.
pub const BOOL_FALSE: u8 = 0x4E;

macro_rules! forward_lifecycle {
    ($max:expr) => {
        fn bind(&mut self, region: SharedRegion, offset: u64, length: u64) -> Result<()> {
            if length != $max {
                return Err(ViewError::SizeMismatch {
                    expected: $max,
                    actual: length,
                });
            }
            self.binding.attach(region, offset);
            Ok(())
        }

        fn close(&mut self) {
            self.binding.close();
        }

        fn region(&self) -> Option<&SharedRegion> {
            self.binding.region()
        }

        fn offset(&self) -> u64 {
            self.binding.offset()
        }
    };
}

// ---------------------------------------------------------------------------
// BinaryBoolRef
// ---------------------------------------------------------------------------

/// One-byte boolean view.
#[derive(Debug)]
pub struct BinaryBoolRef {
    binding: Binding,
}

impl BinaryBoolRef {
    /// Exact size this codec binds to.
    pub const MAX_SIZE: u64 = 1;

    #[must_use]
    pub fn new() -> Self {
        Self {
            binding: Binding::new("binary-bool-ref"),
        }
    }

    #[must_use]
    pub fn with_leak_policy(policy: LeakPolicy) -> Self {
        Self {
            binding: Binding::with_leak_policy("binary-bool-ref", policy),
        }
    }

    /// Decode the stored byte; neither token is corruption.
    pub fn get_value(&self) -> Result<bool> {
        let (region, offset) = self.binding.require()?;
        match region.read_u8(offset)? {
            BOOL_TRUE => Ok(true),
            BOOL_FALSE => Ok(false),
            other => Err(ViewError::value_corrupt(format!(
                "boolean byte at offset {offset} is {other:#04x}, neither token"
            ))),
        }
    }

    pub fn set_value(&self, flag: bool) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_u8(offset, if flag { BOOL_TRUE } else { BOOL_FALSE })
    }
}

impl Default for BinaryBoolRef {
    fn default() -> Self {
        Self::new()
    }
}

impl View for BinaryBoolRef {
    forward_lifecycle!(Self::MAX_SIZE);
}

// ---------------------------------------------------------------------------
// BinaryIntRef
// ---------------------------------------------------------------------------

/// Four-byte native-endian integer view.
#[derive(Debug)]
pub struct BinaryIntRef {
    binding: Binding,
}

impl BinaryIntRef {
    pub const MAX_SIZE: u64 = 4;

    #[must_use]
    pub fn new() -> Self {
        Self {
            binding: Binding::new("binary-int-ref"),
        }
    }

    #[must_use]
    pub fn with_leak_policy(policy: LeakPolicy) -> Self {
        Self {
            binding: Binding::with_leak_policy("binary-int-ref", policy),
        }
    }

    pub fn get_value(&self) -> Result<i32> {
        let (region, offset) = self.binding.require()?;
        region.read_i32(offset)
    }

    pub fn set_value(&self, v: i32) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_i32(offset, v)
    }

    pub fn get_volatile_value(&self) -> Result<i32> {
        let (region, offset) = self.binding.require()?;
        region.read_volatile_i32(offset)
    }

    pub fn set_volatile_value(&self, v: i32) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_volatile_i32(offset, v)
    }

    /// Release-only store.
    pub fn set_ordered_value(&self, v: i32) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_ordered_i32(offset, v)
    }

    /// Atomic add via the region's fetch-add; returns the new value.
    pub fn add_value(&self, delta: i32) -> Result<i32> {
        let (region, offset) = self.binding.require()?;
        region.add_and_get_i32(offset, delta)
    }

    /// Same operation as [`Self::add_value`]; the name survives for call
    /// sites that want the memory discipline spelled out.
    pub fn add_atomic_value(&self, delta: i32) -> Result<i32> {
        self.add_value(delta)
    }

    /// Atomic CAS; true iff the stored value equaled `expected` and was
    /// replaced by `new`.
    pub fn compare_and_swap_value(&self, expected: i32, new: i32) -> Result<bool> {
        let (region, offset) = self.binding.require()?;
        region.compare_and_swap_i32(offset, expected, new)
    }
}

impl Default for BinaryIntRef {
    fn default() -> Self {
        Self::new()
    }
}

impl View for BinaryIntRef {
    forward_lifecycle!(Self::MAX_SIZE);
}

// ---------------------------------------------------------------------------
// BinaryLongRef
// ---------------------------------------------------------------------------

/// Eight-byte native-endian integer view.
#[derive(Debug)]
pub struct BinaryLongRef {
    binding: Binding,
}

impl BinaryLongRef {
    pub const MAX_SIZE: u64 = 8;

    #[must_use]
    pub fn new() -> Self {
        Self {
            binding: Binding::new("binary-long-ref"),
        }
    }

    #[must_use]
    pub fn with_leak_policy(policy: LeakPolicy) -> Self {
        Self {
            binding: Binding::with_leak_policy("binary-long-ref", policy),
        }
    }

    pub fn get_value(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        region.read_i64(offset)
    }

    pub fn set_value(&self, v: i64) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_i64(offset, v)
    }

    pub fn get_volatile_value(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        region.read_volatile_i64(offset)
    }

    pub fn set_volatile_value(&self, v: i64) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_volatile_i64(offset, v)
    }

    /// Release-only store.
    pub fn set_ordered_value(&self, v: i64) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_ordered_i64(offset, v)
    }

    /// Atomic add via the region's fetch-add; returns the new value.
    pub fn add_value(&self, delta: i64) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        region.add_and_get_i64(offset, delta)
    }

    /// Same operation as [`Self::add_value`]; the name survives for call
    /// sites that want the memory discipline spelled out.
    pub fn add_atomic_value(&self, delta: i64) -> Result<i64> {
        self.add_value(delta)
    }

    pub fn compare_and_swap_value(&self, expected: i64, new: i64) -> Result<bool> {
        let (region, offset) = self.binding.require()?;
        region.compare_and_swap_i64(offset, expected, new)
    }
}

impl Default for BinaryLongRef {
    fn default() -> Self {
        Self::new()
    }
}

impl View for BinaryLongRef {
    forward_lifecycle!(Self::MAX_SIZE);
}

// ---------------------------------------------------------------------------
// BinaryTwoLongRef
// ---------------------------------------------------------------------------

/// Sixteen-byte view holding two independent longs: `lo` at +0, `hi` at +8.
///
/// The fields are separate atomics; there is no 128-bit operation across
/// both.
#[derive(Debug)]
pub struct BinaryTwoLongRef {
    binding: Binding,
}

impl BinaryTwoLongRef {
    pub const MAX_SIZE: u64 = 16;
    const HI: u64 = 8;

    #[must_use]
    pub fn new() -> Self {
        Self {
            binding: Binding::new("binary-two-long-ref"),
        }
    }

    #[must_use]
    pub fn with_leak_policy(policy: LeakPolicy) -> Self {
        Self {
            binding: Binding::with_leak_policy("binary-two-long-ref", policy),
        }
    }

    pub fn get_lo(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        region.read_i64(offset)
    }

    pub fn set_lo(&self, v: i64) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_i64(offset, v)
    }

    pub fn get_hi(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        region.read_i64(offset + Self::HI)
    }

    pub fn set_hi(&self, v: i64) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_i64(offset + Self::HI, v)
    }

    pub fn get_volatile_lo(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        region.read_volatile_i64(offset)
    }

    pub fn get_volatile_hi(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        region.read_volatile_i64(offset + Self::HI)
    }

    pub fn set_ordered_lo(&self, v: i64) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_ordered_i64(offset, v)
    }

    pub fn set_ordered_hi(&self, v: i64) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        region.write_ordered_i64(offset + Self::HI, v)
    }

    pub fn compare_and_swap_lo(&self, expected: i64, new: i64) -> Result<bool> {
        let (region, offset) = self.binding.require()?;
        region.compare_and_swap_i64(offset, expected, new)
    }

    pub fn compare_and_swap_hi(&self, expected: i64, new: i64) -> Result<bool> {
        let (region, offset) = self.binding.require()?;
        region.compare_and_swap_i64(offset + Self::HI, expected, new)
    }
}

impl Default for BinaryTwoLongRef {
    fn default() -> Self {
        Self::new()
    }
}

impl View for BinaryTwoLongRef {
    forward_lifecycle!(Self::MAX_SIZE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmview_region::HeapRegion;
    use std::sync::Arc;

    fn region(len: u64) -> SharedRegion {
        Arc::new(HeapRegion::new(len))
    }

    #[test]
    fn bool_rejects_uninitialized_zero() {
        let r = region(16);
        let mut v = BinaryBoolRef::new();
        v.bind(r, 0, BinaryBoolRef::MAX_SIZE).unwrap();
        assert!(matches!(
            v.get_value(),
            Err(ViewError::ValueCorrupt { .. })
        ));
        v.set_value(true).unwrap();
        assert!(v.get_value().unwrap());
        v.set_value(false).unwrap();
        assert!(!v.get_value().unwrap());
        v.close();
    }

    #[test]
    fn bind_length_is_exact() {
        let r = region(16);
        let mut v = BinaryIntRef::new();
        assert_eq!(
            v.bind(Arc::clone(&r), 0, 8).unwrap_err(),
            ViewError::SizeMismatch {
                expected: 4,
                actual: 8
            }
        );
        // Failed bind leaves the view unbound.
        assert_eq!(v.get_value().unwrap_err(), ViewError::Unbound);
        assert_eq!(r.reservation_count(), 0);
    }

    #[test]
    fn accessors_after_close_fail() {
        let r = region(16);
        let mut v = BinaryLongRef::new();
        v.bind(r, 8, 8).unwrap();
        v.set_value(3).unwrap();
        v.close();
        assert_eq!(v.get_value().unwrap_err(), ViewError::Closed);
        assert_eq!(v.offset(), 0);
        assert!(v.region().is_none());
        v.close(); // second close is a no-op
    }

    #[test]
    fn int_round_trip_all_disciplines() {
        let r = region(16);
        let mut v = BinaryIntRef::new();
        v.bind(r, 4, 4).unwrap();
        v.set_value(-7).unwrap();
        assert_eq!(v.get_value().unwrap(), -7);
        v.set_volatile_value(11).unwrap();
        assert_eq!(v.get_volatile_value().unwrap(), 11);
        v.set_ordered_value(i32::MAX).unwrap();
        assert_eq!(v.get_volatile_value().unwrap(), i32::MAX);
        v.close();
    }

    #[test]
    fn scenario_binary_int_at_offset_16() {
        // Bind a binary int reference to a 32-byte region at offset 16.
        let r = region(32);
        let mut v = BinaryIntRef::new();
        v.bind(r, 16, 4).unwrap();

        v.add_atomic_value(1).unwrap();
        assert_eq!(v.get_volatile_value().unwrap(), 1);
        v.add_value(-2).unwrap();
        assert_eq!(v.get_value().unwrap(), -1);
        assert!(!v.compare_and_swap_value(0, 1).unwrap());
        assert!(v.compare_and_swap_value(-1, 2).unwrap());
        assert_eq!(v.get_value().unwrap(), 2);
        v.close();
    }

    #[test]
    fn long_cas_only_updates_on_match() {
        let r = region(16);
        let mut v = BinaryLongRef::new();
        v.bind(r, 0, 8).unwrap();
        v.set_value(100).unwrap();
        assert!(!v.compare_and_swap_value(99, 1).unwrap());
        assert_eq!(v.get_value().unwrap(), 100);
        assert!(v.compare_and_swap_value(100, 1).unwrap());
        assert_eq!(v.get_value().unwrap(), 1);
        v.close();
    }

    #[test]
    fn two_long_fields_are_independent() {
        let r = region(32);
        let mut v = BinaryTwoLongRef::new();
        v.bind(r, 16, 16).unwrap();
        v.set_lo(1).unwrap();
        v.set_hi(-1).unwrap();
        assert_eq!(v.get_lo().unwrap(), 1);
        assert_eq!(v.get_hi().unwrap(), -1);
        assert!(v.compare_and_swap_hi(-1, 5).unwrap());
        assert_eq!(v.get_lo().unwrap(), 1);
        assert_eq!(v.get_volatile_hi().unwrap(), 5);
        v.close();
    }

    #[test]
    fn concurrent_atomic_adds_sum_exactly() {
        const THREADS: usize = 8;
        const PER_THREAD: i64 = 5_000;

        let r = region(16);
        let mut setup = BinaryLongRef::new();
        setup.bind(Arc::clone(&r), 0, 8).unwrap();
        setup.set_value(0).unwrap();
        setup.close();

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    let mut v = BinaryLongRef::new();
                    v.bind(r, 0, 8).unwrap();
                    for _ in 0..PER_THREAD {
                        v.add_atomic_value(1).unwrap();
                    }
                    v.close();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut check = BinaryLongRef::new();
        check.bind(r, 0, 8).unwrap();
        assert_eq!(
            check.get_volatile_value().unwrap(),
            THREADS as i64 * PER_THREAD
        );
        check.close();
    }

    #[test]
    fn default_views_start_unbound() {
        let v = BinaryIntRef::default();
        assert_eq!(v.get_value().unwrap_err(), ViewError::Unbound);
        assert!(format!("{v:?}").contains("binary-int-ref"));
        let w = BinaryTwoLongRef::default();
        assert_eq!(w.get_lo().unwrap_err(), ViewError::Unbound);
    }

    #[test]
    fn concurrent_add_value_loses_no_updates() {
        const THREADS: usize = 4;
        const PER_THREAD: i32 = 2_000;

        let r = region(16);
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    let mut v = BinaryIntRef::new();
                    v.bind(r, 0, 4).unwrap();
                    for _ in 0..PER_THREAD {
                        v.add_value(1).unwrap();
                    }
                    v.close();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut check = BinaryIntRef::new();
        check.bind(r, 0, 4).unwrap();
        assert_eq!(
            check.get_volatile_value().unwrap(),
            THREADS as i32 * PER_THREAD
        );
        check.close();
    }

    #[test]
    fn aliasing_views_observe_each_other() {
        let r = region(16);
        let mut a = BinaryIntRef::new();
        let mut b = BinaryIntRef::new();
        a.bind(Arc::clone(&r), 8, 4).unwrap();
        b.bind(Arc::clone(&r), 8, 4).unwrap();
        assert_eq!(r.reservation_count(), 2);
        a.set_ordered_value(77).unwrap();
        assert_eq!(b.get_volatile_value().unwrap(), 77);
        a.close();
        b.close();
        assert_eq!(r.reservation_count(), 0);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn int_round_trip(v in any::<i32>()) {
                let r = region(16);
                let mut view = BinaryIntRef::new();
                view.bind(r, 0, 4).unwrap();
                view.set_value(v).unwrap();
                prop_assert_eq!(view.get_value().unwrap(), v);
                view.close();
            }

            #[test]
            fn long_round_trip(v in any::<i64>()) {
                let r = region(16);
                let mut view = BinaryLongRef::new();
                view.bind(r, 0, 8).unwrap();
                view.set_value(v).unwrap();
                prop_assert_eq!(view.get_value().unwrap(), v);
                view.close();
            }
        }
    }
}
