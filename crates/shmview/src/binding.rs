//! View-to-region binding.
//!
//! Every codec composes a [`Binding`]: the (region, offset) pair plus the
//! reservation it holds. Codecs validate their size contract, then delegate
//! the lifecycle here. Binding is rebindable (the prior reservation is
//! released first), close is idempotent, and `region()`/`offset()` are legal
//! in every state.

use shmview_error::{Result, ViewError};
use shmview_region::{Region, SharedRegion};
use tracing::warn;

/// What to do when a still-bound view is dropped without `close()`.
///
/// The reservation is always released on drop; the policy only decides how
/// loudly the missing `close()` is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakPolicy {
    /// Drop silently.
    Ignore,
    /// `tracing::warn!` with the view's owner label.
    #[default]
    Warn,
    /// Panic in debug builds (warn in release).
    Panic,
}

/// The common bind/close surface every codec exposes.
pub trait View {
    /// Bind to `length` bytes at `offset` of `region`.
    ///
    /// `length` must exactly equal the codec's required size; otherwise the
    /// bind fails with [`ViewError::SizeMismatch`] and the view is left
    /// unbound. Binding releases any previously held reservation and takes a
    /// new one.
    fn bind(&mut self, region: SharedRegion, offset: u64, length: u64) -> Result<()>;

    /// Release the held reservation. Idempotent; a second close is a no-op.
    fn close(&mut self);

    /// The bound region, or `None` when unbound or closed.
    fn region(&self) -> Option<&SharedRegion>;

    /// The bound offset, or 0 when unbound.
    fn offset(&self) -> u64;
}

/// Region/offset pair plus reservation ownership, composed into each codec.
#[derive(Debug)]
pub struct Binding {
    owner: &'static str,
    leak_policy: LeakPolicy,
    region: Option<SharedRegion>,
    offset: u64,
    closed: bool,
}

impl Binding {
    pub(crate) fn new(owner: &'static str) -> Self {
        Self::with_leak_policy(owner, LeakPolicy::default())
    }

    pub(crate) fn with_leak_policy(owner: &'static str, leak_policy: LeakPolicy) -> Self {
        Self {
            owner,
            leak_policy,
            region: None,
            offset: 0,
            closed: false,
        }
    }

    /// Record a validated binding, swapping reservations.
    pub(crate) fn attach(&mut self, region: SharedRegion, offset: u64) {
        region.reserve(self.owner);
        if let Some(prev) = self.region.take() {
            prev.release(self.owner);
        }
        self.region = Some(region);
        self.offset = offset;
        self.closed = false;
    }

    /// The bound region and offset, or the lifecycle error for this state.
    pub(crate) fn require(&self) -> Result<(&SharedRegion, u64)> {
        if self.closed {
            return Err(ViewError::Closed);
        }
        match &self.region {
            Some(region) => Ok((region, self.offset)),
            None => Err(ViewError::Unbound),
        }
    }

    pub(crate) fn region(&self) -> Option<&SharedRegion> {
        self.region.as_ref()
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn close(&mut self) {
        if let Some(region) = self.region.take() {
            region.release(self.owner);
        }
        self.closed = true;
        self.offset = 0;
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            match self.leak_policy {
                LeakPolicy::Ignore => {}
                LeakPolicy::Warn => {
                    warn!(owner = self.owner, "view dropped while bound; call close()");
                }
                LeakPolicy::Panic => {
                    if cfg!(debug_assertions) {
                        panic!("{} dropped while bound; call close()", self.owner);
                    }
                    warn!(owner = self.owner, "view dropped while bound; call close()");
                }
            }
            region.release(self.owner);
        }
    }
}

/// Round `offset` up to the next 8-byte boundary.
pub(crate) fn align8(offset: u64) -> u64 {
    (offset + 7) & !7
}

/// Pad `[offset, aligned)` with spaces, for the text codecs' realignment.
pub(crate) fn pad_to_alignment(region: &dyn Region, offset: u64, aligned: u64) -> Result<()> {
    for off in offset..aligned {
        region.write_u8(off, b' ')?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmview_region::HeapRegion;
    use std::sync::Arc;

    fn region() -> SharedRegion {
        Arc::new(HeapRegion::new(64))
    }

    #[test]
    fn unbound_reads_are_legal() {
        let b = Binding::new("test");
        assert!(b.region().is_none());
        assert_eq!(b.offset(), 0);
        assert_eq!(b.require().unwrap_err(), ViewError::Unbound);
    }

    #[test]
    fn attach_reserves_and_rebind_swaps() {
        let r1 = region();
        let r2 = region();
        let mut b = Binding::new("test");

        b.attach(Arc::clone(&r1), 8);
        assert_eq!(r1.reservation_count(), 1);
        assert_eq!(b.offset(), 8);

        b.attach(Arc::clone(&r2), 16);
        assert_eq!(r1.reservation_count(), 0);
        assert_eq!(r2.reservation_count(), 1);
        assert_eq!(b.offset(), 16);
    }

    #[test]
    fn close_is_idempotent() {
        let r = region();
        let mut b = Binding::new("test");
        b.attach(Arc::clone(&r), 0);
        b.close();
        assert_eq!(r.reservation_count(), 0);
        b.close();
        assert_eq!(r.reservation_count(), 0);
        assert_eq!(b.require().unwrap_err(), ViewError::Closed);
        assert!(b.region().is_none());
    }

    #[test]
    fn rebind_after_close_is_allowed() {
        let r = region();
        let mut b = Binding::new("test");
        b.attach(Arc::clone(&r), 0);
        b.close();
        b.attach(Arc::clone(&r), 8);
        assert!(b.require().is_ok());
        assert_eq!(r.reservation_count(), 1);
    }

    #[test]
    fn drop_releases_reservation() {
        let r = region();
        {
            let mut b = Binding::with_leak_policy("test", LeakPolicy::Ignore);
            b.attach(Arc::clone(&r), 0);
            assert_eq!(r.reservation_count(), 1);
        }
        assert_eq!(r.reservation_count(), 0);
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore = "panic policy only fires in debug builds")]
    #[should_panic(expected = "dropped while bound")]
    fn panic_policy_fires_in_debug() {
        let r = region();
        let mut b = Binding::with_leak_policy("test", LeakPolicy::Panic);
        b.attach(r, 0);
        drop(b);
    }

    #[test]
    fn align8_rounds_up() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(13), 16);
    }
}
