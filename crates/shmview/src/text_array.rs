//! Text array codecs: the binary array layout rendered as padded decimal.
//!
//! Layout:
//!
//! ```text
//! { locked: false, capacity: NNNN..., used: NNNN..., values: [ NNNN..., ... ] }\n
//! ```
//!
//! The lock word sits at a fixed offset inside the prologue and follows the
//! same token protocol as the text scalars. The capacity field is
//! left-aligned and space-padded (it is written once and never re-encoded);
//! `used` and the elements are zero-padded so in-place re-encoding keeps the
//! layout stable.
//!
//! Mutations hold the spinlock. Plain reads use an acquire fence instead,
//! trading strict consistency under contention for read throughput.
//!
//! `bind_value_at` is unsupported: text elements are not independently
//! addressable as fixed binary words, so an aliased sub-view would bypass
//! the lock.

use std::sync::atomic::{fence, Ordering};

use shmview_error::{Result, ViewError};
use shmview_region::{Region, SharedRegion};

use crate::binding::{align8, pad_to_alignment, Binding, LeakPolicy, View};
use crate::lock;

const SECTION1: &[u8] = b"{ locked: false, capacity: ";
const SECTION2: &[u8] = b", used: ";
const SECTION3: &[u8] = b", values: [ ";
const SECTION4: &[u8] = b" ] }\n";
const SEP: &[u8] = b", ";

/// Byte offset of the lock word (`fals`/` tru`) within the prologue.
const LOCK_OFFSET: u64 = 10;

/// Field geometry for one digit width. All offsets are relative to the
/// array's base offset.
#[derive(Debug, Clone, Copy)]
struct Layout {
    digits: u32,
}

impl Layout {
    const fn capacity_offset(self) -> u64 {
        SECTION1.len() as u64
    }

    const fn used_offset(self) -> u64 {
        self.capacity_offset() + self.digits as u64 + SECTION2.len() as u64
    }

    const fn values_offset(self) -> u64 {
        self.used_offset() + self.digits as u64 + SECTION3.len() as u64
    }

    const fn value_size(self) -> u64 {
        self.digits as u64 + SEP.len() as u64
    }

    /// Byte budget for an array of `capacity` elements.
    ///
    /// Counts a `", "` separator slot after the *last* element, which the
    /// renderer never emits, so the budget overshoots the rendered text by
    /// two bytes. Kept for layout compatibility with existing files sized
    /// by this formula; pinned by `size_in_bytes_overshoots_rendering`.
    const fn size_in_bytes(self, capacity: u64) -> u64 {
        self.values_offset() + capacity * self.value_size() + SECTION4.len() as u64
    }

    const fn elem_offset(self, index: u64) -> u64 {
        self.values_offset() + index * self.value_size()
    }
}

/// Write `value` left-aligned in a `width`-byte field, space-padded.
fn append_left_aligned(region: &dyn Region, offset: u64, value: i64, width: u32) -> Result<()> {
    let text = value.to_string();
    if text.len() > width as usize {
        return Err(ViewError::FieldOverflow {
            value,
            digits: width,
        });
    }
    region.write_bytes(offset, text.as_bytes())?;
    for pad in text.len() as u64..u64::from(width) {
        region.write_u8(offset + pad, b' ')?;
    }
    Ok(())
}

/// Digit-width-agnostic core shared by the int and long wrappers. Values
/// travel as `i64`; the wrappers narrow.
struct TextArrayCore {
    binding: Binding,
    layout: Layout,
    capacity: u64,
}

impl TextArrayCore {
    fn new(owner: &'static str, digits: u32, policy: LeakPolicy) -> Self {
        Self {
            binding: Binding::with_leak_policy(owner, policy),
            layout: Layout { digits },
            capacity: 0,
        }
    }

    fn write(layout: Layout, region: &dyn Region, offset: u64, capacity: i64) -> Result<u64> {
        if capacity <= 0 {
            return Err(ViewError::InvalidCapacity { capacity });
        }
        #[allow(clippy::cast_sign_loss)]
        let cap = capacity as u64;

        region.write_bytes(offset, SECTION1)?;
        append_left_aligned(region, offset + layout.capacity_offset(), capacity, layout.digits)?;
        region.write_bytes(offset + layout.capacity_offset() + u64::from(layout.digits), SECTION2)?;
        region.append_decimal(offset + layout.used_offset(), 0, layout.digits)?;
        region.write_bytes(offset + layout.used_offset() + u64::from(layout.digits), SECTION3)?;
        for index in 0..cap {
            let elem = offset + layout.elem_offset(index);
            region.append_decimal(elem, 0, layout.digits)?;
            if index + 1 < cap {
                region.write_bytes(elem + u64::from(layout.digits), SEP)?;
            }
        }
        let end = offset + layout.elem_offset(cap - 1) + u64::from(layout.digits);
        region.write_bytes(end, SECTION4)?;
        Ok(layout.size_in_bytes(cap))
    }

    /// Re-derive the byte budget from the stored capacity field.
    fn peak_length(layout: Layout, region: &dyn Region, offset: u64) -> Result<u64> {
        let capacity = region.parse_decimal(offset + layout.capacity_offset(), layout.digits)?;
        if capacity <= 0 {
            return Err(ViewError::header_corrupt(format!(
                "stored capacity is {capacity}"
            )));
        }
        #[allow(clippy::cast_sign_loss)]
        let cap = capacity as u64;
        // A 20-digit stored capacity can wrap the budget math; surface it as
        // corruption instead.
        cap.checked_mul(layout.value_size())
            .and_then(|bytes| bytes.checked_add(layout.values_offset()))
            .and_then(|bytes| bytes.checked_add(SECTION4.len() as u64))
            .ok_or_else(|| {
                ViewError::header_corrupt(format!(
                    "stored capacity {capacity} overflows the byte budget"
                ))
            })
    }

    fn bind(&mut self, region: SharedRegion, offset: u64, length: u64) -> Result<()> {
        let aligned = align8(offset);
        if aligned != offset {
            pad_to_alignment(&*region, offset, aligned)?;
        }
        let expected = Self::peak_length(self.layout, &*region, aligned)?;
        if length != expected {
            return Err(ViewError::SizeMismatch {
                expected,
                actual: length,
            });
        }
        if aligned
            .checked_add(expected)
            .is_none_or(|end| end > region.len())
        {
            return Err(ViewError::header_corrupt(format!(
                "array needs {expected} bytes at offset {aligned}, region has {}",
                region.len()
            )));
        }
        // Only the flag byte is authoritative; a concurrent lock transition
        // leaves the trail bytes blended and must not fail the bind.
        lock::check_flag(&*region, aligned + LOCK_OFFSET)?;
        let capacity =
            region.parse_decimal(aligned + self.layout.capacity_offset(), self.layout.digits)?;
        #[allow(clippy::cast_sign_loss)]
        let capacity = capacity as u64;
        let used = region.parse_decimal(aligned + self.layout.used_offset(), self.layout.digits)?;
        if used < 0 || used as u64 > capacity {
            return Err(ViewError::header_corrupt(format!(
                "used {used} exceeds capacity {capacity}"
            )));
        }
        self.binding.attach(region, aligned);
        self.capacity = capacity;
        Ok(())
    }

    fn close(&mut self) {
        self.binding.close();
        self.capacity = 0;
    }

    fn elem(&self, index: u64) -> Result<(&SharedRegion, u64)> {
        let (region, offset) = self.binding.require()?;
        if index >= self.capacity {
            return Err(ViewError::IndexOutOfBounds {
                index,
                capacity: self.capacity,
            });
        }
        Ok((region, offset + self.layout.elem_offset(index)))
    }

    /// Fenced read without the lock.
    fn get_value_at(&self, index: u64) -> Result<i64> {
        let (region, elem) = self.elem(index)?;
        fence(Ordering::Acquire);
        region.parse_decimal(elem, self.layout.digits)
    }

    fn set_value_at(&self, index: u64, v: i64) -> Result<()> {
        let (region, elem) = self.elem(index)?;
        let (_, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        region.append_decimal(elem, v, self.layout.digits)
    }

    fn compare_and_set_index(&self, index: u64, expected: i64, new: i64) -> Result<bool> {
        let (region, elem) = self.elem(index)?;
        let (_, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        if region.parse_decimal(elem, self.layout.digits)? != expected {
            return Ok(false);
        }
        region.append_decimal(elem, new, self.layout.digits)?;
        Ok(true)
    }

    fn get_used(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        fence(Ordering::Acquire);
        region.parse_decimal(offset + self.layout.used_offset(), self.layout.digits)
    }

    fn get_capacity(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        fence(Ordering::Acquire);
        region.parse_decimal(offset + self.layout.capacity_offset(), self.layout.digits)
    }

    fn set_max_used(&self, n: i64) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        if n < 0 || n as u64 > self.capacity {
            return Err(ViewError::IndexOutOfBounds {
                index: n.max(0) as u64,
                capacity: self.capacity,
            });
        }
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        let current = region.parse_decimal(offset + self.layout.used_offset(), self.layout.digits)?;
        if n <= current {
            return Ok(current);
        }
        region.append_decimal(offset + self.layout.used_offset(), n, self.layout.digits)?;
        Ok(n)
    }
}

macro_rules! text_array_ref {
    (
        $(#[$doc:meta])*
        $name:ident, $owner:literal, $elem:ty, $digits:expr
    ) => {
        $(#[$doc])*
        pub struct $name {
            core: TextArrayCore,
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            const LAYOUT: Layout = Layout { digits: $digits };

            #[must_use]
            pub fn new() -> Self {
                Self::with_leak_policy(LeakPolicy::default())
            }

            #[must_use]
            pub fn with_leak_policy(policy: LeakPolicy) -> Self {
                Self {
                    core: TextArrayCore::new($owner, $digits, policy),
                }
            }

            /// Byte budget for an array of `capacity` elements (includes the
            /// trailing separator slot; see the layout note).
            #[must_use]
            pub const fn size_in_bytes(capacity: u64) -> u64 {
                Self::LAYOUT.size_in_bytes(capacity)
            }

            /// Re-derive the byte budget from the capacity field stored at
            /// `offset`.
            pub fn peak_length(region: &dyn Region, offset: u64) -> Result<u64> {
                TextArrayCore::peak_length(Self::LAYOUT, region, offset)
            }

            /// Render a fresh array with `used = 0` and zero elements.
            /// Returns the byte budget the array binds with.
            pub fn write(region: &dyn Region, offset: u64, capacity: i64) -> Result<u64> {
                TextArrayCore::write(Self::LAYOUT, region, offset, capacity)
            }

            /// Fixed capacity recorded at bind time.
            #[must_use]
            pub fn capacity(&self) -> u64 {
                self.core.capacity
            }

            /// Fenced read of the `used` counter.
            pub fn get_used(&self) -> Result<i64> {
                self.core.get_used()
            }

            /// Fenced re-parse of the stored capacity field.
            pub fn get_capacity(&self) -> Result<i64> {
                self.core.get_capacity()
            }

            /// Advance `used` to `n` if that is an increase; returns the
            /// resulting counter value.
            pub fn set_max_used(&self, n: i64) -> Result<i64> {
                self.core.set_max_used(n)
            }

            /// Fenced read without the lock.
            pub fn get_value_at(&self, index: u64) -> Result<$elem> {
                let v = self.core.get_value_at(index)?;
                <$elem>::try_from(v).map_err(|_| {
                    ViewError::value_corrupt(format!(
                        "text element {index} holds out-of-range value {v}"
                    ))
                })
            }

            /// Locked re-encode of one element.
            pub fn set_value_at(&self, index: u64, v: $elem) -> Result<()> {
                self.core.set_value_at(index, i64::from(v))
            }

            /// Lock-guarded compare-and-set on one element.
            pub fn compare_and_set_index(
                &self,
                index: u64,
                expected: $elem,
                new: $elem,
            ) -> Result<bool> {
                self.core
                    .compare_and_set_index(index, i64::from(expected), i64::from(new))
            }

            /// Aliasing a text element as a standalone scalar view is not
            /// meaningful: the element is not an independently addressable
            /// binary word and access would bypass the lock.
            pub fn bind_value_at(&self, _index: u64) -> Result<()> {
                Err(ViewError::Unsupported {
                    what: "bind_value_at on text-encoded arrays",
                })
            }
        }

        impl View for $name {
            fn bind(&mut self, region: SharedRegion, offset: u64, length: u64) -> Result<()> {
                self.core.bind(region, offset, length)
            }

            fn close(&mut self) {
                self.core.close();
            }

            fn region(&self) -> Option<&SharedRegion> {
                self.core.binding.region()
            }

            fn offset(&self) -> u64 {
                self.core.binding.offset()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("offset", &self.core.binding.offset())
                    .field("capacity", &self.core.capacity)
                    .finish()
            }
        }
    };
}

text_array_ref!(
    /// Text-rendered array of 32-bit values, ten digits per field.
    TextIntArrayRef, "text-int-array-ref", i32, 10
);

text_array_ref!(
    /// Text-rendered array of 64-bit values, twenty digits per field.
    TextLongArrayRef, "text-long-array-ref", i64, 20
);
