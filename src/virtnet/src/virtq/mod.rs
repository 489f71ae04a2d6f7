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

//! Split Virtqueue Implementation
//!
//! This module implements the legacy (0.95) split virtqueue: one
//! driver-written descriptor table, a driver-produced available ring and a
//! host-produced used ring, living in physically contiguous memory shared
//! with a host that runs concurrently with the driver.
//!
//! # Architecture
//!
//! - [`Ring`](ring::Ring): the engine. Descriptor-chain allocation,
//!   publication, completion reaping, notification suppression and
//!   batching. One `Ring` drives one direction of traffic.
//! - [`DescTable`](desc::DescTable), [`AvailRing`](avail::AvailRing),
//!   [`UsedRing`](used::UsedRing): typed views over the raw shared region
//!   whose methods pick the required atomic orderings, so no caller ever
//!   issues a plain load or store across the host boundary.
//! - [`Credits`](credits::Credits): descriptor-credit flow control gating
//!   submissions.
//!
//! # Memory ordering
//!
//! | Point                                         | Ordering      | Pairs with (host)                  |
//! |-----------------------------------------------|---------------|------------------------------------|
//! | descriptor / slot writes → `avail.idx` store  | Release       | acquire load of `avail.idx`        |
//! | pre-kick check of `avail_event` / NO_NOTIFY   | SeqCst fence  | fence between `used.idx` store and `avail_event` read |
//! | `used.idx` load before reading elements       | Acquire       | release store of `used.idx`        |
//! | interrupt re-enable re-check of `used.idx`    | SeqCst fence  | fence before `used_event` / NO_INTERRUPT check |

pub mod avail;
pub mod credits;
pub mod desc;
pub mod ring;
pub mod used;

pub use avail::{AvailRing, VRING_AVAIL_F_NO_INTERRUPT};
pub use credits::Credits;
pub use desc::{DescFlags, DescTable, Descriptor};
pub use ring::{Buffer, Chain, Ring};
pub use used::{UsedElem, UsedRing, VRING_USED_F_NO_NOTIFY};

use crate::error::{Result, VirtnetError};
use crate::mem::PAGE_SIZE;

/// Everything a [`Ring`] needs to know about one queue's shared memory,
/// assembled by the queue-pair setup and consumed verbatim by the external
/// vhost / assigned-device glue.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Descriptor table base.
    pub descs: *mut u8,
    /// Available ring base.
    pub avail: *mut u8,
    /// Used ring base.
    pub used: *mut u8,
    /// Number of descriptors; must be a power of two.
    pub size: u32,
    /// EVENT_IDX negotiated: use `used_event` / `avail_event` thresholds.
    pub event_index: bool,
    /// INDIRECT_DESC negotiated. Advertised but never exercised; kept false.
    pub indirect: bool,
    /// Receive queue with mergeable buffers.
    pub mergeable_buffers: bool,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || !self.size.is_power_of_two() {
            return Err(VirtnetError::RingSizeNotPowerOfTwo(self.size));
        }
        Ok(())
    }
}

#[inline]
pub(crate) const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Bytes of backing storage needed for one queue of `size` descriptors.
/// Overestimates slightly to cover the page alignment of the used ring.
pub const fn ring_storage_size(size: u32) -> usize {
    3 * PAGE_SIZE + size as usize * (16 + 2 + 8)
}

/// Lay one queue out inside `base`:
/// descriptor table at offset 0 (16 bytes per entry), available ring right
/// after it (`2 * size + 6` bytes), used ring on the next page boundary.
///
/// `base` must point at [`ring_storage_size`] bytes of page-aligned memory.
pub fn queue_layout(
    base: *mut u8,
    size: u32,
    event_index: bool,
    mergeable_buffers: bool,
) -> QueueConfig {
    let descs = base;
    let avail_offset = Descriptor::SIZE * size as usize;
    let used_offset = align_up(avail_offset + 2 * size as usize + 6, PAGE_SIZE);
    // SAFETY: offsets stay within ring_storage_size(size) of base.
    let (avail, used) = unsafe { (base.add(avail_offset), base.add(used_offset)) };
    QueueConfig {
        descs,
        avail,
        used,
        size,
        event_index,
        indirect: false,
        mergeable_buffers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::RingStorage;

    #[test]
    fn layout_places_used_ring_on_page_boundary() {
        for size in [4u32, 64, 256, 1024] {
            let storage = RingStorage::new(ring_storage_size(size));
            let cfg = queue_layout(storage.as_mut_ptr(), size, true, false);

            assert_eq!(cfg.descs as usize, storage.as_mut_ptr() as usize);
            assert_eq!(
                cfg.avail as usize - cfg.descs as usize,
                16 * size as usize
            );
            assert_eq!(cfg.used as usize % PAGE_SIZE, 0);
            assert!(cfg.used as usize >= cfg.avail as usize + 2 * size as usize + 6);
            // Used ring (plus its avail_event tail) fits in the storage.
            let used_end = cfg.used as usize + 8 * size as usize + 6;
            assert!(used_end <= storage.as_mut_ptr() as usize + storage.len());
        }
    }

    #[test]
    fn config_rejects_non_power_of_two_sizes() {
        let storage = RingStorage::new(ring_storage_size(8));
        let mut cfg = queue_layout(storage.as_mut_ptr(), 8, false, false);
        assert!(cfg.validate().is_ok());
        cfg.size = 12;
        assert!(matches!(
            cfg.validate(),
            Err(crate::error::VirtnetError::RingSizeNotPowerOfTwo(12))
        ));
        cfg.size = 0;
        assert!(cfg.validate().is_err());
    }
}
