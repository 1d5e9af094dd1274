//! Typed views onto fixed byte ranges of shared memory.
//!
//! A view is a lightweight handle that binds to `[offset, offset + length)`
//! of a reference-counted [`shmview_region::Region`] (heap or memory-mapped
//! file) and encodes values there in one of two families:
//!
//! - **binary**: native-endian words accessed through hardware atomics,
//!   with volatile, ordered, and compare-and-swap variants of every
//!   operation;
//! - **text**: fixed-width ASCII decimal guarded by an embedded spinlock,
//!   readable with a plain text editor while live.
//!
//! Arrays carry a `capacity`/`used` header ahead of the elements. Binary
//! arrays additionally participate in a crash-recovery protocol: a
//! compare-and-swap that parks [`INT_NOT_COMPLETE`] or
//! [`LONG_NOT_COMPLETE`] in element zero registers the array with a
//! [`RecoveryRegistry`], which can later force every still-live in-flight
//! array back to the sentinel in one sweep.
//!
//! Views are cheap to rebind; dropping a bound view without closing it is
//! reported according to its [`LeakPolicy`].

pub mod binary_array;
pub mod binary_scalar;
pub mod binding;
pub mod recovery;
pub mod text_array;
pub mod text_scalar;

mod lock;

pub use binary_array::{BinaryIntArrayRef, BinaryLongArrayRef, HEADER_SIZE};
pub use binary_scalar::{
    BinaryBoolRef, BinaryIntRef, BinaryLongRef, BinaryTwoLongRef, BOOL_FALSE, BOOL_TRUE,
};
pub use binding::{LeakPolicy, View};
pub use lock::{LOCKED, UNLOCKED};
pub use recovery::RecoveryRegistry;
pub use text_array::{TextIntArrayRef, TextLongArrayRef};
pub use text_scalar::{TextBoolRef, TextIntRef, TextLongRef};

/// Sentinel a 32-bit element holds while a multi-step update is in flight.
///
/// A stored `i32::MIN` is never a legitimate payload value; readers that
/// see it know the writer crashed or has not finished.
pub const INT_NOT_COMPLETE: i32 = i32::MIN;

/// 64-bit counterpart of [`INT_NOT_COMPLETE`].
pub const LONG_NOT_COMPLETE: i64 = i64::MIN;
