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

//! The Used Ring (host → guest)
//!
//! Shared-memory layout:
//!
//! ```text
//! offset 0       flags        u16       bit0 = NO_NOTIFY hint to the guest
//! offset 2       idx          u16       free-running producer index (host)
//! offset 4       elems[size]  {u32,u32} completed head index + written bytes
//! offset 4+8s    avail_event  u16       kick threshold (EVENT_IDX feature)
//! ```
//!
//! The host release-stores `idx` after filling elements, so the guest must
//! acquire-load `idx` before reading any element it reveals.

use core::sync::atomic::{AtomicU16, Ordering};

use bytemuck::{Pod, Zeroable};

/// Host hint: do not kick me for new available buffers. Unreliable, purely an
/// optimization; the guest still kicks when it runs out of buffers.
pub const VRING_USED_F_NO_NOTIFY: u16 = 1;

/// One completed chain: head descriptor index plus total bytes the host
/// wrote into the chain's writable buffers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct UsedElem {
    /// Head index of the completed chain (u32 for padding reasons).
    pub id: u32,
    /// Total bytes written by the host.
    pub len: u32,
}

const _: () = assert!(core::mem::size_of::<UsedElem>() == 8);

impl UsedElem {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

/// Driver-side view of the shared used ring.
#[derive(Debug, Clone, Copy)]
pub struct UsedRing {
    flags: *const AtomicU16,
    idx: *const AtomicU16,
    elems: *const UsedElem,
    avail_event: *const AtomicU16,
    size: u16,
}

impl UsedRing {
    /// Create a view over the shared used ring.
    ///
    /// # Safety
    ///
    /// - `base` must point at a used-ring area of at least `8 * size + 6`
    ///   bytes, 4-byte aligned
    /// - `size` must be a power of two
    /// - the memory must remain valid (and shared with the host) for the
    ///   lifetime of this view
    pub unsafe fn from_raw_parts(base: *mut u8, size: u16) -> Self {
        assert!(base as usize % core::mem::align_of::<UsedElem>() == 0);
        Self {
            flags: base.cast::<AtomicU16>(),
            idx: base.add(2).cast::<AtomicU16>(),
            elems: base.add(4).cast::<UsedElem>(),
            avail_event: base.add(4 + UsedElem::SIZE * size as usize).cast::<AtomicU16>(),
            size,
        }
    }

    /// Host's NO_NOTIFY hint.
    #[inline]
    pub fn no_notify(&self) -> bool {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.flags).load(Ordering::Relaxed) & VRING_USED_F_NO_NOTIFY != 0 }
    }

    /// Load the host's producer index with the given ordering. Acquire when
    /// the caller is about to read elements, relaxed for the post-fence
    /// re-checks.
    #[inline]
    pub fn load_idx(&self, order: Ordering) -> u16 {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.idx).load(order) }
    }

    /// Read one used element. `slot` must already be masked by the caller,
    /// and the caller must have observed `idx` cover this slot.
    #[inline]
    pub fn elem(&self, slot: u16) -> UsedElem {
        debug_assert!(slot < self.size);
        // SAFETY: slot < size; pointer valid per from_raw_parts.
        unsafe { self.elems.add(slot as usize).read_volatile() }
    }

    /// The available-ring index at which the host next wants a kick
    /// (EVENT_IDX feature). The caller fences before reading this.
    #[inline]
    pub fn avail_event(&self) -> u16 {
        // SAFETY: pointer valid per from_raw_parts.
        unsafe { (*self.avail_event).load(Ordering::Relaxed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_match_wire_layout() {
        let size = 4u16;
        // flags + idx, elems[4], avail_event (+ padding to keep u32 alignment)
        let mut backing = vec![0u32; 1 + 2 * size as usize + 1];
        let base = backing.as_mut_ptr().cast::<u8>();

        // Play the host: fill the ring through raw pointers at the wire offsets.
        unsafe {
            base.cast::<u16>().write(VRING_USED_F_NO_NOTIFY); // flags
            base.add(2).cast::<u16>().write(5); // idx
            base.add(4).cast::<u32>().write(3); // elems[0].id
            base.add(8).cast::<u32>().write(128); // elems[0].len
            base.add(4 + 8 * 3).cast::<u32>().write(9); // elems[3].id
            base.add(8 + 8 * 3).cast::<u32>().write(256); // elems[3].len
            base.add(4 + 8 * 4).cast::<u16>().write(0x4321); // avail_event
        }

        let ring = unsafe { UsedRing::from_raw_parts(base, size) };
        assert!(ring.no_notify());
        assert_eq!(ring.load_idx(Ordering::Acquire), 5);
        assert_eq!(ring.elem(0), UsedElem { id: 3, len: 128 });
        assert_eq!(ring.elem(3), UsedElem { id: 9, len: 256 });
        assert_eq!(ring.avail_event(), 0x4321);
    }
}
