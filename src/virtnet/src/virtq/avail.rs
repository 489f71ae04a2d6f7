/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! The Available Ring (guest → host)
//!
//! Shared-memory layout, all fields little-endian / guest-native (legacy
//! virtqueues use guest endianness):
//!
//! ```text
//! offset 0       flags       u16   bit0 = NO_INTERRUPT hint to the host
//! offset 2       idx         u16   free-running producer index
//! offset 4       ring[size]  u16   head indices of submitted chains
//! offset 4+2s    used_event  u16   interrupt threshold (EVENT_IDX feature)
//! ```
//!
//! The store of `idx` is the publication point for every descriptor-table and
//! ring-slot write that precedes it, hence `publish_idx` is a release store
//! and everything else is relaxed or volatile.

use core::sync::atomic::{AtomicU16, Ordering};

/// Guest hint: do not interrupt me for consumed buffers. Unreliable, purely
/// an optimization.
pub const VRING_AVAIL_F_NO_INTERRUPT: u16 = 1;

/// Driver-side view of the shared available ring.
#[derive(Debug, Clone, Copy)]
pub struct AvailRing {
    flags: *const AtomicU16,
    idx: *const AtomicU16,
    ring: *mut u16,
    used_event: *const AtomicU16,
    size: u16,
}

impl AvailRing {
    /// Create a view over the shared available ring.
    ///
    /// # Safety
    ///
    /// - `base` must point at an available-ring area of at least
    ///   `2 * size + 6` bytes, 2-byte aligned
    /// - `size` must be a power of two
    /// - the memory must remain valid (and shared with the host) for the
    ///   lifetime of this view
    pub unsafe fn from_raw_parts(base: *mut u8, size: u16) -> Self {
        assert!(base as usize % core::mem::align_of::<u16>() == 0);
        Self {
            flags: base.cast::<AtomicU16>(),
            idx: base.add(2).cast::<AtomicU16>(),
            ring: base.add(4).cast::<u16>(),
            used_event: base.add(4 + 2 * size as usize).cast::<AtomicU16>(),
            size,
        }
    }

    /// Store the NO_INTERRUPT hint flags.
    #[inline]
    pub fn set_flags(&self, val: u16) {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.flags).store(val, Ordering::Relaxed) }
    }

    #[inline]
    pub fn flags(&self) -> u16 {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.flags).load(Ordering::Relaxed) }
    }

    /// Write one ring slot. `slot` must already be masked by the caller.
    #[inline]
    pub fn set_slot(&self, slot: u16, head: u16) {
        debug_assert!(slot < self.size);
        // SAFETY: slot < size; pointer valid per from_raw_parts.
        unsafe { self.ring.add(slot as usize).write_volatile(head) }
    }

    /// Read one ring slot back (used by tests and invariant checks).
    #[inline]
    pub fn slot(&self, slot: u16) -> u16 {
        debug_assert!(slot < self.size);
        // SAFETY: slot < size; pointer valid per from_raw_parts.
        unsafe { self.ring.add(slot as usize).read_volatile() }
    }

    /// Publish a new producer index. Release-ordered so the host's acquire
    /// load of `idx` sees every descriptor and slot written before this.
    #[inline]
    pub fn publish_idx(&self, val: u16) {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.idx).store(val, Ordering::Release) }
    }

    /// Current shared producer index.
    #[inline]
    pub fn idx(&self) -> u16 {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.idx).load(Ordering::Relaxed) }
    }

    /// Store the used-ring index at which the host should next interrupt us
    /// (EVENT_IDX feature). The caller fences before re-checking `used.idx`.
    #[inline]
    pub fn set_used_event(&self, val: u16) {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.used_event).store(val, Ordering::Relaxed) }
    }

    /// Read the current used-event threshold back (tests only).
    #[inline]
    pub fn used_event(&self) -> u16 {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.used_event).load(Ordering::Relaxed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_match_wire_layout() {
        let size = 4u16;
        // flags + idx + ring[4] + used_event
        let mut backing = vec![0u16; size as usize + 3];
        let base = backing.as_mut_ptr().cast::<u8>();
        let ring = unsafe { AvailRing::from_raw_parts(base, size) };

        ring.set_flags(VRING_AVAIL_F_NO_INTERRUPT);
        ring.publish_idx(7);
        ring.set_slot(0, 0xaaaa);
        ring.set_slot(3, 0xbbbb);
        ring.set_used_event(0x1234);

        assert_eq!(backing[0], VRING_AVAIL_F_NO_INTERRUPT); // flags
        assert_eq!(backing[1], 7); // idx
        assert_eq!(backing[2], 0xaaaa); // ring[0]
        assert_eq!(backing[5], 0xbbbb); // ring[3]
        assert_eq!(backing[6], 0x1234); // used_event

        assert_eq!(ring.flags(), VRING_AVAIL_F_NO_INTERRUPT);
        assert_eq!(ring.idx(), 7);
        assert_eq!(ring.slot(0), 0xaaaa);
        assert_eq!(ring.used_event(), 0x1234);
    }
}
