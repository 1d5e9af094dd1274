//! Text scalar codecs: fixed-width ASCII renderings of single values.
//!
//! Int and long share the `!!atomic { locked: false, value: ... }` template
//! with a 10- or 20-digit zero-padded decimal field; every read-modify-write
//! (including plain reads, since a variable-width decimal cannot be read
//! tear-free otherwise) runs under the embedded [spinlock](crate::lock).
//!
//! The boolean codec is the exception: its token fits a single machine word
//! (`"fals"`/`" tru"` plus a constant trailing `e`), so word-level volatile
//! access suffices and no lock is embedded.
//!
//! Binding realigns the view offset up to the next 8-byte boundary, stamping
//! spaces over the gap, then stamps the template only if the target bytes
//! are still all-zero, so the second binder of a shared region sees the
//! first binder's template and leaves it alone.

use shmview_error::{Result, ViewError};
use shmview_region::{Region, SharedRegion};
use tracing::trace;

use crate::binding::{align8, pad_to_alignment, Binding, LeakPolicy, View};
use crate::lock;

/// Byte offset of the lock word (`fals`/` tru`) within the template.
const LOCK_OFFSET: u64 = 19;
/// Byte offset of the first value digit within the template.
const VALUE_OFFSET: u64 = 33;

const INT_TEMPLATE: &[u8; 45] = b"!!atomic { locked: false, value: 0000000000 }";
const LONG_TEMPLATE: &[u8; 55] = b"!!atomic { locked: false, value: 00000000000000000000 }";

const INT_DIGITS: u32 = 10;
const LONG_DIGITS: u32 = 20;

/// Stamp `template` at `offset` and overwrite the value field.
fn stamp(
    region: &dyn Region,
    offset: u64,
    template: &[u8],
    initial: i64,
    digits: u32,
) -> Result<()> {
    region.write_bytes(offset, template)?;
    region.append_decimal(offset + VALUE_OFFSET, initial, digits)
}

/// True if the template-sized range at `offset` is still all zero bytes.
fn is_unwritten(region: &dyn Region, offset: u64, len: usize) -> Result<bool> {
    let mut buf = [0u8; 64];
    region.read_bytes(offset, &mut buf[..len])?;
    Ok(buf[..len].iter().all(|&b| b == 0))
}

/// Shared bind path for the locked text scalars.
fn bind_text(
    binding: &mut Binding,
    region: SharedRegion,
    offset: u64,
    length: u64,
    template: &'static [u8],
    digits: u32,
) -> Result<()> {
    if length != template.len() as u64 {
        return Err(ViewError::SizeMismatch {
            expected: template.len() as u64,
            actual: length,
        });
    }
    let aligned = align8(offset);
    if aligned != offset {
        pad_to_alignment(&*region, offset, aligned)?;
    }
    if is_unwritten(&*region, aligned, template.len())? {
        stamp(&*region, aligned, template, 0, digits)?;
        trace!(offset = aligned, "stamped text scalar template");
    }
    binding.attach(region, aligned);
    Ok(())
}

// ---------------------------------------------------------------------------
// TextIntRef
// ---------------------------------------------------------------------------

/// 45-byte text view of a 32-bit value.
#[derive(Debug)]
pub struct TextIntRef {
    binding: Binding,
}

impl TextIntRef {
    /// Exact size this codec binds to.
    pub const MAX_SIZE: u64 = INT_TEMPLATE.len() as u64;

    #[must_use]
    pub fn new() -> Self {
        Self {
            binding: Binding::new("text-int-ref"),
        }
    }

    #[must_use]
    pub fn with_leak_policy(policy: LeakPolicy) -> Self {
        Self {
            binding: Binding::with_leak_policy("text-int-ref", policy),
        }
    }

    /// Stamp a fresh template holding `initial` at `offset`; returns the
    /// number of bytes written.
    pub fn write(region: &dyn Region, offset: u64, initial: i32) -> Result<u64> {
        stamp(region, offset, INT_TEMPLATE, i64::from(initial), INT_DIGITS)?;
        Ok(Self::MAX_SIZE)
    }

    pub fn get_value(&self) -> Result<i32> {
        let (region, offset) = self.binding.require()?;
        let guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        let v = region.parse_decimal(offset + VALUE_OFFSET, INT_DIGITS)?;
        drop(guard);
        i32::try_from(v).map_err(|_| {
            ViewError::value_corrupt(format!("text int field holds out-of-range value {v}"))
        })
    }

    /// Store `v` into the decimal field.
    ///
    /// Negative values spend one field byte on the sign, so values below
    /// `-999_999_999` do not fit the ten-byte field and fail with
    /// [`ViewError::FieldOverflow`].
    pub fn set_value(&self, v: i32) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        region.append_decimal(offset + VALUE_OFFSET, i64::from(v), INT_DIGITS)
    }

    /// Locked read-modify-write; returns the new value.
    pub fn add_value(&self, delta: i32) -> Result<i32> {
        let (region, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        let old = region.parse_decimal(offset + VALUE_OFFSET, INT_DIGITS)?;
        let new = i32::try_from(old)
            .map_err(|_| {
                ViewError::value_corrupt(format!("text int field holds out-of-range value {old}"))
            })?
            .wrapping_add(delta);
        region.append_decimal(offset + VALUE_OFFSET, i64::from(new), INT_DIGITS)?;
        Ok(new)
    }

    /// Lock-guarded compare-and-swap.
    pub fn compare_and_swap_value(&self, expected: i32, new: i32) -> Result<bool> {
        let (region, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        if region.parse_decimal(offset + VALUE_OFFSET, INT_DIGITS)? != i64::from(expected) {
            return Ok(false);
        }
        region.append_decimal(offset + VALUE_OFFSET, i64::from(new), INT_DIGITS)?;
        Ok(true)
    }
}

impl Default for TextIntRef {
    fn default() -> Self {
        Self::new()
    }
}

impl View for TextIntRef {
    fn bind(&mut self, region: SharedRegion, offset: u64, length: u64) -> Result<()> {
        bind_text(
            &mut self.binding,
            region,
            offset,
            length,
            INT_TEMPLATE,
            INT_DIGITS,
        )
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
}

// ---------------------------------------------------------------------------
// TextLongRef
// ---------------------------------------------------------------------------

/// 55-byte text view of a 64-bit value.
#[derive(Debug)]
pub struct TextLongRef {
    binding: Binding,
}

impl TextLongRef {
    pub const MAX_SIZE: u64 = LONG_TEMPLATE.len() as u64;

    #[must_use]
    pub fn new() -> Self {
        Self {
            binding: Binding::new("text-long-ref"),
        }
    }

    #[must_use]
    pub fn with_leak_policy(policy: LeakPolicy) -> Self {
        Self {
            binding: Binding::with_leak_policy("text-long-ref", policy),
        }
    }

    /// Stamp a fresh template holding `initial` at `offset`; returns the
    /// number of bytes written.
    pub fn write(region: &dyn Region, offset: u64, initial: i64) -> Result<u64> {
        stamp(region, offset, LONG_TEMPLATE, initial, LONG_DIGITS)?;
        Ok(Self::MAX_SIZE)
    }

    pub fn get_value(&self) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        region.parse_decimal(offset + VALUE_OFFSET, LONG_DIGITS)
    }

    pub fn set_value(&self, v: i64) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        region.append_decimal(offset + VALUE_OFFSET, v, LONG_DIGITS)
    }

    /// Locked read-modify-write; returns the new value.
    pub fn add_value(&self, delta: i64) -> Result<i64> {
        let (region, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        let new = region
            .parse_decimal(offset + VALUE_OFFSET, LONG_DIGITS)?
            .wrapping_add(delta);
        region.append_decimal(offset + VALUE_OFFSET, new, LONG_DIGITS)?;
        Ok(new)
    }

    /// Lock-guarded compare-and-swap.
    pub fn compare_and_swap_value(&self, expected: i64, new: i64) -> Result<bool> {
        let (region, offset) = self.binding.require()?;
        let _guard = lock::acquire(&**region, offset + LOCK_OFFSET)?;
        if region.parse_decimal(offset + VALUE_OFFSET, LONG_DIGITS)? != expected {
            return Ok(false);
        }
        region.append_decimal(offset + VALUE_OFFSET, new, LONG_DIGITS)?;
        Ok(true)
    }
}

impl Default for TextLongRef {
    fn default() -> Self {
        Self::new()
    }
}

impl View for TextLongRef {
    fn bind(&mut self, region: SharedRegion, offset: u64, length: u64) -> Result<()> {
        bind_text(
            &mut self.binding,
            region,
            offset,
            length,
            LONG_TEMPLATE,
            LONG_DIGITS,
        )
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
}

// ---------------------------------------------------------------------------
// TextBoolRef
// ---------------------------------------------------------------------------

/// Five-byte text boolean: `"false"` or `" true"`.
///
/// The first four bytes are the token word, the fifth is always `e`, so a
/// single word-level volatile store flips the value atomically.
#[derive(Debug)]
pub struct TextBoolRef {
    binding: Binding,
}

impl TextBoolRef {
    pub const MAX_SIZE: u64 = 5;

    /// Token word for `true` (`" tru"`).
    pub const TRUE_WORD: i32 = i32::from_ne_bytes(*b" tru");
    /// Token word for `false` (`"fals"`).
    pub const FALSE_WORD: i32 = i32::from_ne_bytes(*b"fals");

    #[must_use]
    pub fn new() -> Self {
        Self {
            binding: Binding::new("text-bool-ref"),
        }
    }

    #[must_use]
    pub fn with_leak_policy(policy: LeakPolicy) -> Self {
        Self {
            binding: Binding::with_leak_policy("text-bool-ref", policy),
        }
    }

    /// Stamp the token for `initial` at `offset`; returns bytes written.
    pub fn write(region: &dyn Region, offset: u64, initial: bool) -> Result<u64> {
        region.write_bytes(offset, if initial { b" true" } else { b"false" })?;
        Ok(Self::MAX_SIZE)
    }

    pub fn get_value(&self) -> Result<bool> {
        let (region, offset) = self.binding.require()?;
        match region.read_volatile_i32(offset)? {
            Self::TRUE_WORD => Ok(true),
            Self::FALSE_WORD => Ok(false),
            other => Err(ViewError::value_corrupt(format!(
                "text boolean word at offset {offset} is {other:#010x}, neither token"
            ))),
        }
    }

    pub fn set_value(&self, flag: bool) -> Result<()> {
        let (region, offset) = self.binding.require()?;
        let word = if flag {
            Self::TRUE_WORD
        } else {
            Self::FALSE_WORD
        };
        region.write_volatile_i32(offset, word)
    }
}

impl Default for TextBoolRef {
    fn default() -> Self {
        Self::new()
    }
}

impl View for TextBoolRef {
    fn bind(&mut self, region: SharedRegion, offset: u64, length: u64) -> Result<()> {
        if length != Self::MAX_SIZE {
            return Err(ViewError::SizeMismatch {
                expected: Self::MAX_SIZE,
                actual: length,
            });
        }
        let aligned = align8(offset);
        if aligned != offset {
            pad_to_alignment(&*region, offset, aligned)?;
        }
        if is_unwritten(&*region, aligned, 5)? {
            Self::write(&*region, aligned, false)?;
            trace!(offset = aligned, "stamped text boolean token");
        }
        self.binding.attach(region, aligned);
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
}
