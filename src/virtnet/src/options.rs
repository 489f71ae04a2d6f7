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

//! Recognized configuration toggles.
//!
//! Command-line parsing happens outside the driver; whatever frontend is in
//! use hands over a [`NetOptions`]. A toggle distinguishes "absent" from
//! "explicitly on/off" because two behaviors depend on presence, not value:
//! a feature is advertised unless its toggle is explicitly off, and the ring
//! size option only takes effect when `event_index` was given at all.

/// An explicit on/off option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

/// Driver configuration as delivered by the external option frontend.
#[derive(Debug, Clone)]
pub struct NetOptions {
    /// Advertise VIRTIO_RING_F_EVENT_IDX and use the event thresholds.
    pub event_index: Option<Toggle>,
    /// Advertise VIRTIO_NET_F_CSUM / GUEST_CSUM and populate `needs_csum`.
    pub csum_offload: Option<Toggle>,
    /// Advertise HOST/GUEST_TSO4 and emit `gso_type = TCPv4`.
    pub tso: Option<Toggle>,
    /// Advertise HOST/GUEST_UFO and emit `gso_type = UDP`.
    pub ufo: Option<Toggle>,
    /// Ring size; must be a power of two.
    pub virtio_ring_size: u32,
    /// Poll the rings instead of using interrupts.
    pub poll_mode: bool,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            event_index: None,
            csum_offload: None,
            tso: None,
            ufo: None,
            virtio_ring_size: 256,
            poll_mode: false,
        }
    }
}

fn enabled(toggle: Option<Toggle>) -> bool {
    !matches!(toggle, Some(Toggle::Off))
}

impl NetOptions {
    pub fn event_index_enabled(&self) -> bool {
        enabled(self.event_index)
    }

    pub fn csum_offload_enabled(&self) -> bool {
        enabled(self.csum_offload)
    }

    pub fn tso_enabled(&self) -> bool {
        enabled(self.tso)
    }

    pub fn ufo_enabled(&self) -> bool {
        enabled(self.ufo)
    }

    /// The ring size the queue pair will use.
    ///
    /// `virtio_ring_size` takes effect only when the `event_index` option
    /// was given explicitly (whatever its value); otherwise the size stays
    /// at 256.
    pub fn effective_ring_size(&self) -> u32 {
        if self.event_index.is_some() {
            self.virtio_ring_size
        } else {
            256
        }
    }
}
