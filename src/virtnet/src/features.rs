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

//! Virtio feature bits (legacy 0.95 numbering).
//!
//! Only the bits this driver can advertise are listed. The device-independent
//! ring features live in the high bits, the net-specific ones in the low bits.

/// Device handles packets with a partial checksum (driver may ask the host to
/// finish the L4 checksum on transmit).
pub const VIRTIO_NET_F_CSUM: u64 = 1 << 0;
/// Driver handles packets with a partial checksum on receive.
pub const VIRTIO_NET_F_GUEST_CSUM: u64 = 1 << 1;
/// Device reports its MAC address in config space.
pub const VIRTIO_NET_F_MAC: u64 = 1 << 5;
/// Driver can receive TSOv4 frames.
pub const VIRTIO_NET_F_GUEST_TSO4: u64 = 1 << 7;
/// Driver can receive UFO frames.
pub const VIRTIO_NET_F_GUEST_UFO: u64 = 1 << 10;
/// Device can receive TSOv4 frames (TCP segmentation offload on transmit).
pub const VIRTIO_NET_F_HOST_TSO4: u64 = 1 << 11;
/// Device can receive UFO frames (UDP fragmentation offload on transmit).
pub const VIRTIO_NET_F_HOST_UFO: u64 = 1 << 14;
/// A received frame may span several receive buffers; the first buffer's
/// header carries the buffer count.
pub const VIRTIO_NET_F_MRG_RXBUF: u64 = 1 << 15;

/// Descriptors may point at a table of further descriptors.
///
/// Advertised for host-side batching benefits, but this driver never sets the
/// INDIRECT flag on a descriptor it publishes.
pub const VIRTIO_RING_F_INDIRECT_DESC: u64 = 1 << 28;
/// `used_event` / `avail_event` notification thresholds are in effect instead
/// of the coarse NO_INTERRUPT / NO_NOTIFY flags.
pub const VIRTIO_RING_F_EVENT_IDX: u64 = 1 << 29;
