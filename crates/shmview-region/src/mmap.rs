//! File-backed region via `memmap2`, shareable across processes.
//!
//! Two processes mapping the same file observe each other's atomic writes:
//! the mapping is `MAP_SHARED`, so the codecs' CAS/volatile disciplines are
//! the cross-process coordination primitive, exactly as within one process.

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr::NonNull;

use memmap2::MmapMut;
use shmview_error::{Result, ViewError};
use tracing::debug;

use crate::raw::{BoundsPolicy, RawBacked, RawMem, ReservationCounter};

/// A writable shared file mapping exposed as a [`Region`](crate::Region).
///
/// The mapping address is fixed for the lifetime of the value, so interior
/// atomic pointers stay valid while any view holds the `Arc`.
pub struct MmapRegion {
    mem: RawMem,
    // Owns the mapping; unmapped on drop, after `mem` is no longer used.
    _map: MmapMut,
    reservations: ReservationCounter,
}

impl MmapRegion {
    /// Create (or truncate) `path` at `len` bytes and map it shared.
    pub fn create(path: &Path, len: u64) -> Result<Self> {
        if len == 0 {
            return Err(ViewError::InvalidCapacity { capacity: 0 });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| map_io(path, &e))?;
        file.set_len(len).map_err(|e| map_io(path, &e))?;
        debug!(path = %path.display(), len, "created mapped region file");
        Self::map(file, len, BoundsPolicy::Checked)
    }

    /// Map an existing file at its current size.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_policy(path, BoundsPolicy::Checked)
    }

    /// Map an existing file with an explicit [`BoundsPolicy`].
    pub fn open_with_policy(path: &Path, policy: BoundsPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| map_io(path, &e))?;
        let len = file.metadata().map_err(|e| map_io(path, &e))?.len();
        if len == 0 {
            return Err(ViewError::InvalidCapacity { capacity: 0 });
        }
        Self::map(file, len, policy)
    }

    fn map(file: std::fs::File, len: u64, policy: BoundsPolicy) -> Result<Self> {
        // SAFETY: the file stays open for the lifetime of the mapping; all
        // concurrent access goes through the atomic accessors.
        let mut map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| ViewError::io(format!("mmap failed: {e}")))?;
        let ptr = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| ViewError::io("mmap returned null base pointer"))?;
        Ok(Self {
            mem: RawMem::new(ptr, len, policy),
            _map: map,
            reservations: ReservationCounter::default(),
        })
    }
}

fn map_io(path: &Path, err: &std::io::Error) -> ViewError {
    ViewError::io(format!("region file '{}': {err}", path.display()))
}

impl RawBacked for MmapRegion {
    fn raw(&self) -> &RawMem {
        &self.mem
    }

    fn counter(&self) -> &ReservationCounter {
        &self.reservations
    }

    fn kind(&self) -> &'static str {
        "mmap"
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        self.reservations.warn_if_leaked("mmap");
    }
}

impl std::fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapRegion")
            .field("len", &self.mem.len())
            .field("reservations", &self.reservations.count())
            .finish()
    }
}
