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

//! Split-Virtqueue Descriptor Table
//!
//! This module defines the 16-byte descriptor format of the legacy (0.95)
//! split virtqueue and a thin wrapper over the shared descriptor table.
//!
//! Descriptors are written only by the driver; the host merely reads them
//! after observing the available-ring index. Publication ordering therefore
//! lives in the available ring (see [`AvailRing`](super::avail::AvailRing)),
//! and the table itself uses plain volatile accesses.
//!
//! The `next` field does double duty: while a descriptor is free it threads
//! the driver-private free list, and while it is part of an in-flight chain
//! it links the chain for the host.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

bitflags! {
    /// Descriptor flags as defined by the VIRTIO specification.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DescFlags: u16 {
        /// This marks a buffer as continuing via the next field.
        const NEXT     = 1 << 0;
        /// This marks a buffer as device write-only (otherwise device read-only).
        const WRITE    = 1 << 1;
        /// This means the buffer contains a list of buffer descriptors
        /// (advertised as a feature, never emitted by this driver).
        const INDIRECT = 1 << 2;
    }
}

/// One entry of the shared descriptor table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct Descriptor {
    /// Guest physical address of the buffer.
    pub paddr: u64,
    /// Length of the buffer in bytes.
    pub len: u32,
    /// Flags (NEXT, WRITE, INDIRECT).
    pub flags: u16,
    /// Index of the next descriptor in the chain, valid only with NEXT set.
    /// Reused as the free-list link while the descriptor is unallocated.
    pub next: u16,
}

const _: () = assert!(core::mem::size_of::<Descriptor>() == 16);
const _: () = assert!(Descriptor::PADDR_OFFSET == 0);
const _: () = assert!(Descriptor::LEN_OFFSET == 8);
const _: () = assert!(Descriptor::FLAGS_OFFSET == 12);
const _: () = assert!(Descriptor::NEXT_OFFSET == 14);

impl Descriptor {
    pub const SIZE: usize = core::mem::size_of::<Self>();
    pub const ALIGN: usize = core::mem::align_of::<Self>();

    pub const PADDR_OFFSET: usize = core::mem::offset_of!(Self, paddr);
    pub const LEN_OFFSET: usize = core::mem::offset_of!(Self, len);
    pub const FLAGS_OFFSET: usize = core::mem::offset_of!(Self, flags);
    pub const NEXT_OFFSET: usize = core::mem::offset_of!(Self, next);

    pub fn new(paddr: u64, len: u32, flags: DescFlags, next: u16) -> Self {
        Self {
            paddr,
            len,
            flags: flags.bits(),
            next,
        }
    }

    /// Get flags as a [`DescFlags`] bitfield.
    #[inline]
    pub fn flags(&self) -> DescFlags {
        DescFlags::from_bits_truncate(self.flags)
    }

    /// Does this descriptor continue into another one?
    #[inline]
    pub fn has_next(&self) -> bool {
        self.flags().contains(DescFlags::NEXT)
    }

    /// Is this descriptor writable by the host?
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags().contains(DescFlags::WRITE)
    }
}

/// The shared descriptor table: `size` descriptors starting at `base`.
#[derive(Debug, Clone, Copy)]
pub struct DescTable {
    base: *mut Descriptor,
    size: u16,
}

impl DescTable {
    /// Create a descriptor table view over shared memory.
    ///
    /// # Safety
    ///
    /// - `base` must be valid for reads and writes of `size` descriptors
    /// - `base` must be properly aligned for `Descriptor`
    /// - the memory must remain valid for the lifetime of this table
    pub unsafe fn from_raw_parts(base: *mut u8, size: u16) -> Self {
        assert!(base as usize % Descriptor::ALIGN == 0);
        Self {
            base: base.cast::<Descriptor>(),
            size,
        }
    }

    /// Number of descriptors in the table.
    pub fn len(&self) -> u16 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Write a whole descriptor.
    ///
    /// Panics if `idx` is out of range; callers allocate indices from the
    /// free list, so a bad index is a driver bug.
    pub fn write(&self, idx: u16, desc: Descriptor) {
        assert!(idx < self.size, "descriptor index {idx} out of range");
        // SAFETY: idx checked against size; memory valid per from_raw_parts.
        unsafe { self.base.add(idx as usize).write_volatile(desc) };
    }

    /// Read a whole descriptor back.
    pub fn read(&self, idx: u16) -> Descriptor {
        assert!(idx < self.size, "descriptor index {idx} out of range");
        // SAFETY: idx checked against size; memory valid per from_raw_parts.
        unsafe { self.base.add(idx as usize).read_volatile() }
    }

    /// Update only the free-list / chain link of a descriptor.
    pub fn write_next(&self, idx: u16, next: u16) {
        assert!(idx < self.size, "descriptor index {idx} out of range");
        // SAFETY: idx checked against size; field pointer stays in bounds.
        unsafe {
            let field = core::ptr::addr_of_mut!((*self.base.add(idx as usize)).next);
            field.write_volatile(next);
        }
    }

    /// Read only the free-list / chain link of a descriptor.
    pub fn read_next(&self, idx: u16) -> u16 {
        assert!(idx < self.size, "descriptor index {idx} out of range");
        // SAFETY: idx checked against size; field pointer stays in bounds.
        unsafe {
            let field = core::ptr::addr_of!((*self.base.add(idx as usize)).next);
            field.read_volatile()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_of(descs: &mut [Descriptor]) -> DescTable {
        unsafe { DescTable::from_raw_parts(descs.as_mut_ptr().cast(), descs.len() as u16) }
    }

    #[test]
    fn descriptor_flag_helpers() {
        let d = Descriptor::new(0x1000, 64, DescFlags::NEXT | DescFlags::WRITE, 3);
        assert!(d.has_next());
        assert!(d.is_writable());
        assert_eq!(d.next, 3);

        let d = Descriptor::new(0x1000, 64, DescFlags::empty(), 0);
        assert!(!d.has_next());
        assert!(!d.is_writable());
    }

    #[test]
    fn table_round_trips_descriptors() {
        let mut backing = vec![Descriptor::zeroed(); 4];
        let table = table_of(&mut backing);

        let d = Descriptor::new(0xdead_beef, 1500, DescFlags::NEXT, 2);
        table.write(1, d);
        assert_eq!(table.read(1), d);

        table.write_next(1, 3);
        assert_eq!(table.read_next(1), 3);
        // next update leaves the other fields alone
        assert_eq!(table.read(1).paddr, 0xdead_beef);
        assert_eq!(table.read(1).len, 1500);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn table_rejects_out_of_range_index() {
        let mut backing = vec![Descriptor::zeroed(); 4];
        let table = table_of(&mut backing);
        table.read(4);
    }
}
