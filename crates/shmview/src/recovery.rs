//! Crash-recovery registry for the array sentinel protocol.
//!
//! A multi-step array update announces itself by CASing the reserved
//! "not complete" sentinel into an element. If the process dies there, a
//! restarting supervisor needs to find every array whose last update was in
//! flight. The registry is the process-wide rendezvous for that sweep:
//!
//! 1. `start_collecting()` opens a collection phase.
//! 2. Every binary array view that writes the sentinel while a phase is open
//!    registers its element-0 location (crate-internal).
//! 3. `force_all_to_not_complete()` drains the registry: element 0 of every
//!    still-live registered array is forced to the sentinel, all slots are
//!    cleared, and collection stops until `start_collecting()` again.
//!
//! The registry is an explicit, injectable singleton: pass one `Arc` to the
//! array constructors that should participate. Liveness is tracked with an
//! arena of generation-checked slots: a view frees its slot on close/drop,
//! and a freed slot's generation no longer matches any stale handle, so a
//! dead view can never be swept as live. Region liveness itself is a `Weak`
//! upgrade at sweep time.

use std::sync::Weak;

use parking_lot::Mutex;
use shmview_region::{Region, SharedRegion};
use tracing::{debug, warn};

/// Element width of a registered sentinel target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SentinelWidth {
    I32,
    I64,
}

#[derive(Clone)]
struct Entry {
    region: Weak<dyn Region>,
    elem0_offset: u64,
    width: SentinelWidth,
}

struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

/// Handle a registered view keeps; freeing it invalidates the slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotHandle {
    index: usize,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    collecting: bool,
    slots: Vec<Slot>,
    free: Vec<usize>,
}

/// Process-wide, two-phase registry of in-flight arrays.
#[derive(Default)]
pub struct RecoveryRegistry {
    inner: Mutex<Inner>,
}

impl RecoveryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a collection phase. Array views constructed with this registry
    /// will register themselves on their next sentinel CAS. Slots whose
    /// region has died since registration are reclaimed here.
    pub fn start_collecting(&self) {
        let mut inner = self.inner.lock();
        for index in 0..inner.slots.len() {
            let dead = matches!(
                &inner.slots[index].entry,
                Some(entry) if entry.region.strong_count() == 0
            );
            if dead {
                inner.slots[index].entry = None;
                inner.slots[index].generation += 1;
                inner.free.push(index);
            }
        }
        inner.collecting = true;
        debug!("recovery registry collecting");
    }

    /// Whether a collection phase is open.
    pub fn is_collecting(&self) -> bool {
        self.inner.lock().collecting
    }

    /// Number of currently registered arrays.
    pub fn registered(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|s| s.entry.is_some())
            .count()
    }

    /// Drain: force element 0 of every still-live registered array to the
    /// sentinel, clear the registry, and stop collecting. Returns the number
    /// of arrays swept. One-shot; call [`Self::start_collecting`] to begin
    /// a new phase.
    pub fn force_all_to_not_complete(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut swept = 0;
        for index in 0..inner.slots.len() {
            let Some(entry) = inner.slots[index].entry.take() else {
                continue;
            };
            inner.slots[index].generation += 1;
            inner.free.push(index);
            let Some(region) = entry.region.upgrade() else {
                continue; // region already gone, nothing to mark
            };
            let result = match entry.width {
                SentinelWidth::I32 => {
                    region.write_ordered_i32(entry.elem0_offset, crate::INT_NOT_COMPLETE)
                }
                SentinelWidth::I64 => {
                    region.write_ordered_i64(entry.elem0_offset, crate::LONG_NOT_COMPLETE)
                }
            };
            match result {
                Ok(()) => swept += 1,
                // Registered offsets were validated at bind time; a failure
                // here means the region shrank underneath us.
                Err(err) => warn!(%err, offset = entry.elem0_offset, "sentinel sweep skipped entry"),
            }
        }
        inner.collecting = false;
        debug!(swept, "recovery registry drained");
        swept
    }

    /// Register an array's element-0 location. Returns `None` when no
    /// collection phase is open.
    pub(crate) fn register(
        &self,
        region: &SharedRegion,
        elem0_offset: u64,
        width: SentinelWidth,
    ) -> Option<SlotHandle> {
        let mut inner = self.inner.lock();
        if !inner.collecting {
            return None;
        }
        let entry = Entry {
            region: std::sync::Arc::downgrade(region),
            elem0_offset,
            width,
        };
        let index = if let Some(index) = inner.free.pop() {
            inner.slots[index].entry = Some(entry);
            index
        } else {
            inner.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            inner.slots.len() - 1
        };
        Some(SlotHandle {
            index,
            generation: inner.slots[index].generation,
        })
    }

    /// Free a slot if the handle's generation still matches (a drain may
    /// have already recycled it).
    pub(crate) fn deregister(&self, handle: SlotHandle) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(handle.index) else {
            return;
        };
        if slot.generation == handle.generation && slot.entry.is_some() {
            slot.entry = None;
            slot.generation += 1;
            inner.free.push(handle.index);
        }
    }
}
