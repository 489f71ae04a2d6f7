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

//! Device-level glue: feature selection and the per-CPU queue pair.
//!
//! [`Device`] computes the feature set this driver offers from the option
//! toggles; the external backend setup (vhost ioctls or assigned-device
//! config space) intersects it with the host's and hands the result back.
//! [`QueuePair`] owns the shared-memory storage of one receive and one
//! transmit queue, lays both out, and wires the Tx/Rx pipelines over them.

use std::rc::Rc;

use crate::error::Result;
use crate::features::{
    VIRTIO_NET_F_CSUM, VIRTIO_NET_F_GUEST_CSUM, VIRTIO_NET_F_GUEST_TSO4,
    VIRTIO_NET_F_GUEST_UFO, VIRTIO_NET_F_HOST_TSO4, VIRTIO_NET_F_HOST_UFO, VIRTIO_NET_F_MAC,
    VIRTIO_NET_F_MRG_RXBUF, VIRTIO_RING_F_EVENT_IDX, VIRTIO_RING_F_INDIRECT_DESC,
};
use crate::mem::{RingStorage, Translate};
use crate::net::hdr::header_len;
use crate::net::rx::RxQueue;
use crate::net::tx::TxQueue;
use crate::net::{HwFeatures, Packet};
use crate::notify::Notifier;
use crate::options::NetOptions;
use crate::virtq::{queue_layout, ring_storage_size, QueueConfig};

/// MAC reported on the vhost backend, where the host has none to offer.
/// Assigned devices overwrite it from config space.
const VHOST_MAC: [u8; 6] = [0x12, 0x23, 0x34, 0x56, 0x67, 0x78];

/// The virtio-net device: feature bits, hardware-feature flags and MAC.
#[derive(Debug, Clone)]
pub struct Device {
    features: u64,
    hw_features: HwFeatures,
    mac: [u8; 6],
}

impl Device {
    /// Compute the driver's feature offer from the option toggles.
    pub fn new(opts: &NetOptions) -> Self {
        let mut features = VIRTIO_RING_F_INDIRECT_DESC | VIRTIO_NET_F_MRG_RXBUF;
        let mut hw_features = HwFeatures::default();

        if opts.event_index_enabled() {
            features |= VIRTIO_RING_F_EVENT_IDX;
        }
        if opts.csum_offload_enabled() {
            features |= VIRTIO_NET_F_CSUM | VIRTIO_NET_F_GUEST_CSUM;
            hw_features.tx_csum_l4_offload = true;
            hw_features.rx_csum_offload = true;
        }
        if opts.tso_enabled() {
            features |= VIRTIO_NET_F_HOST_TSO4 | VIRTIO_NET_F_GUEST_TSO4;
            hw_features.tx_tso = true;
        }
        if opts.ufo_enabled() {
            features |= VIRTIO_NET_F_HOST_UFO | VIRTIO_NET_F_GUEST_UFO;
            hw_features.tx_ufo = true;
        }
        features |= VIRTIO_NET_F_MAC;

        tracing::debug!(features, "device features");
        Self {
            features,
            hw_features,
            mac: VHOST_MAC,
        }
    }

    /// Feature bits to offer the host during negotiation.
    pub fn features(&self) -> u64 {
        self.features
    }

    /// What the Tx/Rx pipelines may offload.
    pub fn hw_features(&self) -> HwFeatures {
        self.hw_features
    }

    /// The device MAC address.
    pub fn hw_address(&self) -> [u8; 6] {
        self.mac
    }

    /// Install the MAC read from an assigned device's config space.
    pub fn set_hw_address(&mut self, mac: [u8; 6]) {
        self.mac = mac;
    }
}

/// One receive queue and one transmit queue plus their shared storage.
///
/// The queue configs it exposes are what the external backend glue feeds to
/// `VHOST_SET_VRING_ADDR` or the assigned device's queue registers; the
/// storage stays owned here and must outlive the host's access to it.
pub struct QueuePair {
    header_len: usize,
    tx_config: QueueConfig,
    rx_config: QueueConfig,
    txq: TxQueue,
    rxq: Rc<RxQueue>,
    _txq_storage: RingStorage,
    _rxq_storage: RingStorage,
}

impl QueuePair {
    /// Build both queues.
    ///
    /// `negotiated_features` is the subset the host accepted; it decides the
    /// net-header length. The ring layout uses the driver's own feature
    /// offer for event-index, as the rings are laid out before negotiation
    /// completes.
    pub fn new(
        dev: &Device,
        negotiated_features: u64,
        opts: &NetOptions,
        translate: Rc<dyn Translate>,
    ) -> Result<Self> {
        let ring_size = opts.effective_ring_size();
        let event_index = dev.features() & VIRTIO_RING_F_EVENT_IDX != 0;
        let mergeable = negotiated_features & VIRTIO_NET_F_MRG_RXBUF != 0;
        let header_len = header_len(mergeable);

        let txq_storage = RingStorage::new(ring_storage_size(ring_size));
        let rxq_storage = RingStorage::new(ring_storage_size(ring_size));
        let tx_config = queue_layout(txq_storage.as_mut_ptr(), ring_size, event_index, false);
        let rx_config = queue_layout(rxq_storage.as_mut_ptr(), ring_size, event_index, true);

        let txq = TxQueue::new(
            &tx_config,
            opts.poll_mode,
            dev.hw_features(),
            header_len,
            Rc::clone(&translate),
        )?;
        let rxq = RxQueue::new(&rx_config, opts.poll_mode, header_len, translate)?;

        tracing::debug!(ring_size, header_len, event_index, "queue pair ready");
        Ok(Self {
            header_len,
            tx_config,
            rx_config,
            txq,
            rxq,
            _txq_storage: txq_storage,
            _rxq_storage: rxq_storage,
        })
    }

    /// Negotiated net-header length (10, or 12 with mergeable buffers).
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Shared-memory layout of the transmit queue, for the backend glue.
    pub fn tx_config(&self) -> &QueueConfig {
        &self.tx_config
    }

    /// Shared-memory layout of the receive queue, for the backend glue.
    pub fn rx_config(&self) -> &QueueConfig {
        &self.rx_config
    }

    pub fn set_tx_notifier(&self, notifier: Rc<dyn Notifier>) {
        self.txq.set_notifier(notifier);
    }

    pub fn set_rx_notifier(&self, notifier: Rc<dyn Notifier>) {
        self.rxq.set_notifier(notifier);
    }

    /// Forwarded from the transmit interrupt handler (assigned devices).
    pub fn wake_tx_notifier(&self) {
        self.txq.wake_notifier_wait();
    }

    /// Forwarded from the receive interrupt handler (assigned devices).
    pub fn wake_rx_notifier(&self) {
        self.rxq.wake_notifier_wait();
    }

    /// Start transmit completion processing. Requires a `tokio` `LocalSet`.
    pub fn tx_start(&self) {
        self.txq.run();
    }

    /// Start receive: buffer replenishment, completion processing and
    /// delivery of assembled frames to `sink`. Requires a `tokio`
    /// `LocalSet`.
    pub fn rx_start(&self, sink: impl Fn(Packet) + 'static) {
        self.rxq.run(sink);
    }

    /// Submit one packet; resolves when it is published to the host.
    pub async fn send(&self, packet: Packet) {
        self.txq.post(packet).await;
    }

    /// Wait until the host has returned every in-flight descriptor on both
    /// queues. The host must be stopped before the pair is dropped.
    pub async fn quiesce(&self) {
        self.txq.quiesce().await;
        self.rxq.quiesce().await;
    }
}

impl core::fmt::Debug for QueuePair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueuePair")
            .field("header_len", &self.header_len)
            .field("txq", &self.txq)
            .field("rxq", &self.rxq)
            .finish_non_exhaustive()
    }
}
