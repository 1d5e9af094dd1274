//! Error taxonomy for the shmview crates.
//!
//! The families mirror how callers must react:
//!
//! - **Contract violations** (wrong bind length, bad index, zero capacity):
//!   caller bugs, signaled synchronously, never retried internally.
//! - **Resource-lifecycle violations** (use after close, unbound access):
//!   fatal to the operation, not to the process.
//! - **Corruption** (lock flag holds neither token, header fields
//!   inconsistent, undecodable value bytes): the region's logical content is
//!   unusable for that value; never silently repaired.
//! - **Bounds/alignment violations**: surfaced from the backing region.

use thiserror::Error;

/// Primary error type for shmview operations.
///
/// Structured variants for common cases; `is_corruption` /
/// `is_contract_violation` let callers classify without matching every
/// variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    // === Contract violations ===
    /// Bind was called with a length other than the codec's required size.
    #[error("bind length mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Element index is outside the array's fixed capacity.
    #[error("index {index} out of bounds for capacity {capacity}")]
    IndexOutOfBounds { index: u64, capacity: u64 },

    /// An array was created or written with a capacity of zero.
    #[error("array capacity must be positive, got {capacity}")]
    InvalidCapacity { capacity: i64 },

    /// A value does not fit the fixed-width decimal field.
    #[error("value {value} does not fit in {digits} decimal digits")]
    FieldOverflow { value: i64, digits: u32 },

    // === Resource lifecycle ===
    /// An accessor was called on a view that was never bound.
    #[error("view is not bound to a region")]
    Unbound,

    /// An accessor was called on a view after `close()`.
    #[error("view has been closed")]
    Closed,

    // === Corruption ===
    /// A text lock flag holds neither the locked nor the unlocked token.
    #[error("lock flag corrupted: found word {found:#010x}")]
    LockCorrupt { found: i32 },

    /// An array header is internally inconsistent (capacity zero or larger
    /// than the region, used exceeds capacity).
    #[error("array header corrupted: {detail}")]
    HeaderCorrupt { detail: String },

    /// Stored value bytes cannot be decoded (boolean byte is neither token,
    /// non-digit in a decimal field).
    #[error("stored value corrupted: {detail}")]
    ValueCorrupt { detail: String },

    // === Bounds / alignment (surfaced from the backing region) ===
    /// An access would run past the end of the region.
    #[error("access at offset {offset} (+{len} bytes) exceeds region of {region_len} bytes")]
    OutOfBounds {
        offset: u64,
        len: u64,
        region_len: u64,
    },

    /// An atomic access requires natural alignment the offset does not have.
    #[error("offset {offset} is not aligned to {align} bytes")]
    Misaligned { offset: u64, align: u64 },

    // === Unsupported ===
    /// The operation is not meaningful for this codec.
    #[error("unsupported operation: {what}")]
    Unsupported { what: &'static str },

    // === I/O ===
    /// Creating, opening, or mapping a region file failed. The message
    /// carries the path and the underlying OS error (`std::io::Error` is
    /// not `Clone`/`Eq`, so it is flattened to text).
    #[error("region file i/o failed: {detail}")]
    Io { detail: String },
}

impl ViewError {
    /// Convenience constructor for header corruption.
    pub fn header_corrupt(detail: impl Into<String>) -> Self {
        Self::HeaderCorrupt {
            detail: detail.into(),
        }
    }

    /// Convenience constructor for value corruption.
    pub fn value_corrupt(detail: impl Into<String>) -> Self {
        Self::ValueCorrupt {
            detail: detail.into(),
        }
    }

    /// Convenience constructor for region-file I/O failures.
    pub fn io(detail: impl Into<String>) -> Self {
        Self::Io {
            detail: detail.into(),
        }
    }

    /// True for the corruption family: the memory's logical content is
    /// unusable and must not be silently repaired.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::LockCorrupt { .. } | Self::HeaderCorrupt { .. } | Self::ValueCorrupt { .. }
        )
    }

    /// True for caller-side contract violations (never retried internally).
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::SizeMismatch { .. }
                | Self::IndexOutOfBounds { .. }
                | Self::InvalidCapacity { .. }
                | Self::FieldOverflow { .. }
        )
    }

    /// True for lifecycle misuse (unbound or closed view).
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Unbound | Self::Closed)
    }
}

/// Result alias used across the shmview crates.
pub type Result<T> = std::result::Result<T, ViewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = ViewError::SizeMismatch {
            expected: 45,
            actual: 44,
        };
        assert_eq!(
            err.to_string(),
            "bind length mismatch: expected 45 bytes, got 44"
        );

        let err = ViewError::LockCorrupt { found: 0x2121_2121 };
        assert_eq!(err.to_string(), "lock flag corrupted: found word 0x21212121");

        let err = ViewError::Misaligned {
            offset: 13,
            align: 8,
        };
        assert_eq!(err.to_string(), "offset 13 is not aligned to 8 bytes");
    }

    #[test]
    fn classification() {
        assert!(ViewError::LockCorrupt { found: 0 }.is_corruption());
        assert!(ViewError::header_corrupt("used > capacity").is_corruption());
        assert!(!ViewError::Closed.is_corruption());

        assert!(
            ViewError::SizeMismatch {
                expected: 8,
                actual: 4
            }
            .is_contract_violation()
        );
        assert!(ViewError::InvalidCapacity { capacity: 0 }.is_contract_violation());
        assert!(!ViewError::Unbound.is_contract_violation());

        assert!(ViewError::Unbound.is_lifecycle());
        assert!(ViewError::Closed.is_lifecycle());
        assert!(!ViewError::Unsupported { what: "x" }.is_lifecycle());
    }
}
