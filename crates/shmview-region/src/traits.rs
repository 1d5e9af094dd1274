//! The backing-region contract consumed by the view layer.
//!
//! A region is byte-addressable shared memory (heap-allocated or a mapped
//! file) exposing four access disciplines on 32/64-bit fields:
//!
//! - **plain**: relaxed loads/stores, no cross-thread ordering guarantee;
//! - **volatile**: acquire loads and sequentially-consistent stores;
//! - **ordered**: release-only stores (publish prior writes without a full
//!   fence);
//! - **atomic RMW**: sequentially-consistent compare-and-swap and
//!   fetch-add.
//!
//! All multi-byte atomic accesses require natural alignment. A region also
//! counts *reservations*: named holds taken by bound views, released on
//! rebind or close. The count is diagnostic (`Arc` keeps the region alive)
//! but a region dropped with live reservations indicates leaked views and is
//! logged.

use std::sync::Arc;

use shmview_error::{Result, ViewError};

/// Shared handle to a backing region.
pub type SharedRegion = Arc<dyn Region>;

/// Byte-addressable, reference-counted shared memory.
///
/// `Debug` is a supertrait so handles and views composed over `dyn Region`
/// can derive their own `Debug`.
pub trait Region: Send + Sync + std::fmt::Debug {
    /// Total size of the region in bytes.
    fn len(&self) -> u64;

    /// Whether the region is zero-length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- plain access -----------------------------------------------------

    fn read_u8(&self, offset: u64) -> Result<u8>;
    fn write_u8(&self, offset: u64, v: u8) -> Result<()>;
    fn read_i32(&self, offset: u64) -> Result<i32>;
    fn write_i32(&self, offset: u64, v: i32) -> Result<()>;
    fn read_i64(&self, offset: u64) -> Result<i64>;
    fn write_i64(&self, offset: u64, v: i64) -> Result<()>;

    // --- volatile / ordered access ----------------------------------------

    /// Acquire load.
    fn read_volatile_i32(&self, offset: u64) -> Result<i32>;
    /// Acquire load.
    fn read_volatile_i64(&self, offset: u64) -> Result<i64>;
    /// Sequentially-consistent store.
    fn write_volatile_i32(&self, offset: u64, v: i32) -> Result<()>;
    /// Sequentially-consistent store.
    fn write_volatile_i64(&self, offset: u64, v: i64) -> Result<()>;
    /// Release store: publishes prior writes without a full fence.
    fn write_ordered_i32(&self, offset: u64, v: i32) -> Result<()>;
    /// Release store: publishes prior writes without a full fence.
    fn write_ordered_i64(&self, offset: u64, v: i64) -> Result<()>;

    // --- atomic read-modify-write -----------------------------------------

    /// Atomically replace the stored byte with `new` iff it equals
    /// `expected`. No alignment requirement; this is the primitive under
    /// flag bytes at arbitrary text offsets.
    fn compare_and_swap_u8(&self, offset: u64, expected: u8, new: u8) -> Result<bool>;
    /// Release store of a single byte.
    fn write_ordered_u8(&self, offset: u64, v: u8) -> Result<()>;
    /// Atomically replace the stored value with `new` iff it equals
    /// `expected`. Returns whether the swap happened.
    fn compare_and_swap_i32(&self, offset: u64, expected: i32, new: i32) -> Result<bool>;
    /// 64-bit variant of [`Region::compare_and_swap_i32`].
    fn compare_and_swap_i64(&self, offset: u64, expected: i64, new: i64) -> Result<bool>;
    /// Atomic wrapping add; returns the new value.
    fn add_and_get_i32(&self, offset: u64, delta: i32) -> Result<i32>;
    /// Atomic wrapping add; returns the new value.
    fn add_and_get_i64(&self, offset: u64, delta: i64) -> Result<i64>;

    // --- bulk access -------------------------------------------------------

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn write_bytes(&self, offset: u64, buf: &[u8]) -> Result<()>;
    /// Zero the half-open byte range `[start, end)`.
    fn zero_out(&self, start: u64, end: u64) -> Result<()>;

    // --- reservations ------------------------------------------------------

    /// Take a named hold on the region (a view is bound to it).
    fn reserve(&self, owner: &'static str);
    /// Release a named hold.
    fn release(&self, owner: &'static str);
    /// Number of live reservations.
    fn reservation_count(&self) -> usize;

    // --- fixed-width decimal text ------------------------------------------

    /// Parse a decimal field of at most `digits` bytes at `offset`.
    ///
    /// Leading spaces are skipped, an optional `-` sign is honored, and the
    /// first non-digit byte after at least one digit terminates the field
    /// (fields may be space-padded on either side). A field with no digits,
    /// or containing a NUL, is reported as corruption.
    fn parse_decimal(&self, offset: u64, digits: u32) -> Result<i64> {
        let mut buf = [0u8; 24];
        let width = digits as usize;
        debug_assert!(width <= buf.len());
        self.read_bytes(offset, &mut buf[..width])?;

        let mut idx = 0;
        while idx < width && buf[idx] == b' ' {
            idx += 1;
        }
        let negative = idx < width && buf[idx] == b'-';
        if negative {
            idx += 1;
        }
        // Accumulate negated so `i64::MIN` is representable.
        let mut value: i64 = 0;
        let mut seen = 0u32;
        while idx < width {
            let b = buf[idx];
            if b.is_ascii_digit() {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_sub(i64::from(b - b'0')))
                    .ok_or_else(|| {
                        ViewError::value_corrupt(format!(
                            "decimal field at offset {offset} overflows i64"
                        ))
                    })?;
                seen += 1;
                idx += 1;
            } else if b == 0 {
                return Err(ViewError::value_corrupt(format!(
                    "NUL byte in decimal field at offset {offset}"
                )));
            } else {
                break;
            }
        }
        if seen == 0 {
            return Err(ViewError::value_corrupt(format!(
                "no digits in decimal field at offset {offset}"
            )));
        }
        if negative {
            Ok(value)
        } else {
            value.checked_neg().ok_or_else(|| {
                ViewError::value_corrupt(format!(
                    "decimal field at offset {offset} overflows i64"
                ))
            })
        }
    }

    /// Serialize `value` as exactly `digits` bytes of zero-padded decimal at
    /// `offset`. Negative values render as `-` followed by `digits - 1`
    /// zero-padded digits.
    fn append_decimal(&self, offset: u64, value: i64, digits: u32) -> Result<()> {
        let width = digits as usize;
        let mut buf = [b'0'; 24];
        debug_assert!(width <= buf.len());

        let (magnitude, first) = if value < 0 {
            buf[0] = b'-';
            (value.unsigned_abs(), 1)
        } else {
            (value.unsigned_abs(), 0)
        };
        if !fits_in_digits(magnitude, (width - first) as u32) {
            return Err(ViewError::FieldOverflow { value, digits });
        }
        let mut v = magnitude;
        let mut idx = width;
        while idx > first {
            idx -= 1;
            buf[idx] = b'0' + (v % 10) as u8;
            v /= 10;
        }
        self.write_bytes(offset, &buf[..width])
    }
}

fn fits_in_digits(magnitude: u64, digits: u32) -> bool {
    if digits >= 20 {
        return true;
    }
    u128::from(magnitude) < 10u128.pow(digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapRegion;

    #[test]
    fn parse_zero_padded() {
        let r = HeapRegion::new(64);
        r.write_bytes(0, b"0000000042").unwrap();
        assert_eq!(r.parse_decimal(0, 10).unwrap(), 42);
    }

    #[test]
    fn parse_left_aligned_space_padded() {
        let r = HeapRegion::new(64);
        r.write_bytes(0, b"5         ").unwrap();
        assert_eq!(r.parse_decimal(0, 10).unwrap(), 5);
    }

    #[test]
    fn parse_negative() {
        let r = HeapRegion::new(64);
        r.write_bytes(0, b"-000000007").unwrap();
        assert_eq!(r.parse_decimal(0, 10).unwrap(), -7);
    }

    #[test]
    fn parse_rejects_nul_and_empty() {
        let r = HeapRegion::new(64);
        // Fresh region is all zero bytes.
        assert!(matches!(
            r.parse_decimal(0, 10),
            Err(ViewError::ValueCorrupt { .. })
        ));
        r.write_bytes(16, b"          ").unwrap();
        assert!(matches!(
            r.parse_decimal(16, 10),
            Err(ViewError::ValueCorrupt { .. })
        ));
    }

    #[test]
    fn append_round_trips() {
        let r = HeapRegion::new(64);
        for v in [0i64, 1, 99, 1_234_567_890, -12345] {
            r.append_decimal(0, v, 10).unwrap();
            assert_eq!(r.parse_decimal(0, 10).unwrap(), v);
        }
        r.append_decimal(16, i64::MAX, 20).unwrap();
        assert_eq!(r.parse_decimal(16, 20).unwrap(), i64::MAX);
        r.append_decimal(40, i64::MIN, 20).unwrap();
        assert_eq!(r.parse_decimal(40, 20).unwrap(), i64::MIN);
    }

    #[test]
    fn append_rejects_overflowing_field() {
        let r = HeapRegion::new(64);
        assert_eq!(
            r.append_decimal(0, 10_000_000_000, 10),
            Err(ViewError::FieldOverflow {
                value: 10_000_000_000,
                digits: 10
            })
        );
        // Negative sign consumes one slot.
        assert!(r.append_decimal(0, -1_000_000_000, 10).is_err());
        assert!(r.append_decimal(0, -999_999_999, 10).is_ok());
    }
}
