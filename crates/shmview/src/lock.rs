//! The software spinlock embedded in text-encoded values.
//!
//! Textual read-modify-write cannot be done with hardware atomics, so every
//! text codec carries a 4-byte lock flag inside its encoding. The flag holds
//! one of two ASCII tokens, `"fals"` (unlocked) and `" tru"` (locked),
//! chosen so the surrounding text reads `locked: false` / `locked:  true`
//! without rewriting the trailing `e`.
//!
//! The flag sits at an arbitrary text offset, so word atomics cannot be used
//! on it. The first byte is the atomic truth: `'f'` means unlocked, `' '`
//! means held, anything else is corruption. Acquisition is a byte CAS on
//! that flag byte; the trailing three bytes (`"als"` / `"tru"`) are cosmetic
//! and are rewritten with plain stores by whoever holds the lock, so a text
//! reader racing a transition may see a blend of the two words there.
//!
//! The lock is unfair, spins without backoff, and has no timeout: a holder
//! that dies mid-critical-section deadlocks every future acquisition on that
//! value. Recovery of half-written state happens through the sentinel sweep
//! in `recovery`, not here.

use shmview_error::{Result, ViewError};
use shmview_region::Region;

/// Unlocked token: the word `"fals"` as stored in region byte order.
pub const UNLOCKED: i32 = i32::from_ne_bytes(*b"fals");
/// Locked token: the word `" tru"`.
pub const LOCKED: i32 = i32::from_ne_bytes(*b" tru");

const FLAG_UNLOCKED: u8 = b'f';
const FLAG_LOCKED: u8 = b' ';

/// Non-atomic read of the full 4-byte lock word, for bind-time validation
/// of quiescent state and for corruption reporting.
pub(crate) fn read_word(region: &dyn Region, lock_offset: u64) -> Result<i32> {
    let mut word = [0u8; 4];
    region.read_bytes(lock_offset, &mut word)?;
    Ok(i32::from_ne_bytes(word))
}

/// Check the flag byte without acquiring. Only the first byte is inspected;
/// the cosmetic trail may legitimately blend both words while another thread
/// is mid-transition, so a full-word comparison would misreport a healthy
/// lock as corrupt.
pub(crate) fn check_flag(region: &dyn Region, lock_offset: u64) -> Result<u8> {
    let flag = region.read_u8(lock_offset)?;
    if flag != FLAG_UNLOCKED && flag != FLAG_LOCKED {
        return Err(ViewError::LockCorrupt {
            found: read_word(region, lock_offset)?,
        });
    }
    Ok(flag)
}

/// Holds the spinlock at `lock_offset`; releases with an ordered store on
/// drop, so the critical section's writes are published with the unlock.
#[derive(Debug)]
pub(crate) struct SpinGuard<'a> {
    region: &'a dyn Region,
    lock_offset: u64,
}

/// Spin until the flag byte CASes from unlocked to locked.
///
/// Fails fast with [`ViewError::LockCorrupt`] if the flag byte is neither
/// token's first byte; never times out otherwise.
pub(crate) fn acquire(region: &dyn Region, lock_offset: u64) -> Result<SpinGuard<'_>> {
    loop {
        let flag = check_flag(region, lock_offset)?;
        if flag == FLAG_UNLOCKED
            && region.compare_and_swap_u8(lock_offset, FLAG_UNLOCKED, FLAG_LOCKED)?
        {
            // The flag byte is ours; finish the cosmetic "tru" trail.
            region.write_bytes(lock_offset + 1, b"tru")?;
            return Ok(SpinGuard {
                region,
                lock_offset,
            });
        }
        std::hint::spin_loop();
    }
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        // Restore the trail before the flag byte flips back; the release
        // store publishes both it and the critical section's writes.
        // Offsets were validated on acquire; the stores cannot fail.
        let _ = self.region.write_bytes(self.lock_offset + 1, b"als");
        let _ = self
            .region
            .write_ordered_u8(self.lock_offset, FLAG_UNLOCKED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmview_region::HeapRegion;

    fn word_at(region: &dyn Region, offset: u64) -> [u8; 4] {
        let mut buf = [0u8; 4];
        region.read_bytes(offset, &mut buf).unwrap();
        buf
    }

    #[test]
    fn tokens_are_the_ascii_words() {
        assert_eq!(UNLOCKED.to_ne_bytes(), *b"fals");
        assert_eq!(LOCKED.to_ne_bytes(), *b" tru");
    }

    #[test]
    fn acquire_flips_token_and_drop_restores() {
        let r = HeapRegion::new(32);
        // Lock words live at odd text offsets; 10 mirrors the array layout.
        r.write_bytes(10, b"fals").unwrap();
        {
            let _guard = acquire(&r, 10).unwrap();
            assert_eq!(word_at(&r, 10), *b" tru");
        }
        assert_eq!(word_at(&r, 10), *b"fals");
    }

    #[test]
    fn corrupt_word_is_terminal() {
        let r = HeapRegion::new(16);
        r.write_bytes(0, b"!!!!").unwrap();
        assert_eq!(
            acquire(&r, 0).unwrap_err(),
            ViewError::LockCorrupt {
                found: i32::from_ne_bytes(*b"!!!!")
            }
        );
    }

    #[test]
    fn transient_trail_blend_is_not_corruption() {
        let r = HeapRegion::new(16);
        // A releasing holder rewrites the trail to "als" before flipping the
        // flag byte back, so " als" is an in-flight word, not a corrupt one.
        r.write_bytes(0, b" als").unwrap();
        assert_eq!(check_flag(&r, 0).unwrap(), b' ');
        r.write_bytes(0, b"ftru").unwrap();
        assert_eq!(check_flag(&r, 0).unwrap(), b'f');
    }

    #[test]
    fn contended_acquire_waits_for_release() {
        use std::sync::Arc;
        let r = Arc::new(HeapRegion::new(32));
        r.write_bytes(10, b"fals").unwrap();

        let guard = acquire(&*r, 10).unwrap();
        let r2 = Arc::clone(&r);
        let waiter = std::thread::spawn(move || {
            let _guard = acquire(&*r2, 10).unwrap();
            r2.write_i32(16, 1).unwrap();
        });
        // Give the waiter a chance to start spinning, then release.
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(r.read_i32(16).unwrap(), 0);
        drop(guard);
        waiter.join().unwrap();
        assert_eq!(r.read_i32(16).unwrap(), 1);
    }
}
