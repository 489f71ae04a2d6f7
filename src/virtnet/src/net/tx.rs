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

//! The transmit pipeline.
//!
//! `post` turns one packet into one read-only descriptor chain: a
//! virtio-net header fragment followed by the packet's fragments. The
//! credit semaphore provides back-pressure; the chain's completion slot
//! releases the credits and drops the packet, freeing its fragments.

use std::rc::Rc;

use bytes::Bytes;
use smallvec::SmallVec;

use super::hdr::build_tx_hdr;
use super::{HwFeatures, Packet};
use crate::error::Result;
use crate::mem::Translate;
use crate::notify::Notifier;
use crate::virtq::{Buffer, Chain, QueueConfig, Ring};

/// The transmit half of a virtio-net queue pair.
pub struct TxQueue {
    ring: Rc<Ring>,
    hw: HwFeatures,
    header_len: usize,
    translate: Rc<dyn Translate>,
}

impl TxQueue {
    pub fn new(
        config: &QueueConfig,
        poll_mode: bool,
        hw: HwFeatures,
        header_len: usize,
        translate: Rc<dyn Translate>,
    ) -> Result<Self> {
        Ok(Self {
            ring: Ring::new(config, poll_mode)?,
            hw,
            header_len,
            translate,
        })
    }

    pub fn set_notifier(&self, notifier: Rc<dyn Notifier>) {
        self.ring.set_notifier(notifier);
    }

    pub fn wake_notifier_wait(&self) {
        self.ring.wake_notifier_wait();
    }

    /// Start completion processing. Must run within a `tokio` `LocalSet`.
    pub fn run(&self) {
        self.ring.run();
    }

    pub fn ring(&self) -> &Rc<Ring> {
        &self.ring
    }

    /// Submit one packet.
    ///
    /// Resolves once the packet has been published to the host, not once
    /// the host consumed it; back-pressure comes from the descriptor
    /// credits taken here and returned by the completion.
    pub async fn post(&self, mut packet: Packet) {
        let hdr = build_tx_hdr(&packet, &self.hw);
        packet.prepend(Bytes::copy_from_slice(&hdr.to_bytes()[..self.header_len]));

        let nr_frags = packet.nr_frags() as u32;
        self.ring.available_descriptors().take(nr_frags).await;

        let bufs: SmallVec<[Buffer; 4]> = packet
            .frags()
            .iter()
            .map(|frag| Buffer {
                addr: self.translate.virt_to_phys(frag.as_ptr()),
                len: frag.len() as u32,
                writable: false,
            })
            .collect();

        let credits = Rc::clone(self.ring.available_descriptors());
        self.ring.post([Chain::new(bufs, move |_written| {
            credits.release(nr_frags);
            drop(packet);
        })]);
    }

    /// Wait for every published packet to be consumed by the host.
    pub async fn quiesce(&self) {
        self.ring.quiesce().await;
    }
}

impl core::fmt::Debug for TxQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxQueue")
            .field("ring", &self.ring)
            .field("header_len", &self.header_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{IdentityTranslate, RingStorage};
    use crate::net::hdr::{GSO_TCPV4, NET_HDR_LEN, NET_HDR_MRG_LEN};
    use crate::net::{IpProtocol, OffloadInfo};
    use crate::virtq::ring::tests::{HostSide, KickCounter};
    use crate::virtq::{queue_layout, ring_storage_size};

    struct TestTx {
        txq: TxQueue,
        host: HostSide,
        notifier: Rc<KickCounter>,
        _storage: RingStorage,
    }

    fn make_txq(size: u32, header_len: usize) -> TestTx {
        let storage = RingStorage::new(ring_storage_size(size));
        let cfg = queue_layout(storage.as_mut_ptr(), size, false, false);
        let hw = HwFeatures {
            tx_csum_l4_offload: true,
            rx_csum_offload: true,
            tx_tso: true,
            tx_ufo: false,
            mtu: 1500,
        };
        let txq = TxQueue::new(&cfg, false, hw, header_len, Rc::new(IdentityTranslate))
            .expect("valid config");
        let notifier = Rc::new(KickCounter::default());
        txq.set_notifier(notifier.clone());
        TestTx {
            txq,
            host: HostSide::new(cfg),
            notifier,
            _storage: storage,
        }
    }

    #[tokio::test]
    async fn single_fragment_packet_posts_header_plus_payload() {
        let mut t = make_txq(4, NET_HDR_LEN);
        let payload = vec![0xabu8; 64];
        t.txq.post(Packet::from_data(Bytes::from(payload.clone()))).await;

        assert_eq!(t.host.avail_idx(), 1);
        assert_eq!(t.notifier.kicks(), 1);

        let head = t.host.avail_slot(0);
        let d = t.host.read_desc(head);
        assert_eq!(d.len as usize, NET_HDR_LEN);
        assert!(!d.is_writable());
        assert!(d.has_next());

        let bytes = t.host.chain_bytes(head);
        assert_eq!(bytes.len(), NET_HDR_LEN + 64);
        assert_eq!(&bytes[..NET_HDR_LEN], &[0u8; NET_HDR_LEN]);
        assert_eq!(&bytes[NET_HDR_LEN..], &payload[..]);

        // 2 descriptors held (header + payload).
        assert_eq!(t.txq.ring().available_descriptors().available(), 2);

        // Host consumes; credits and descriptors return.
        t.host.complete(u32::from(head), 0);
        t.txq.ring().do_complete();
        assert_eq!(t.txq.ring().available_descriptors().available(), 4);
    }

    #[tokio::test]
    async fn tso_header_precedes_oversized_tcp_packet() {
        let mut t = make_txq(8, NET_HDR_MRG_LEN);
        let mut p = Packet::from_frags([
            Bytes::from(vec![1u8; 1500]),
            Bytes::from(vec![2u8; 1500]),
        ]);
        p.set_offload_info(OffloadInfo {
            protocol: Some(IpProtocol::Tcp),
            needs_csum: true,
            ..OffloadInfo::default()
        });
        t.txq.post(p).await;

        let head = t.host.avail_slot(0);
        let bytes = t.host.chain_bytes(head);
        // flags, gso_type, hdr_len, gso_size, csum_start, csum_offset
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], GSO_TCPV4);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 54);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 1460);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 34);
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 16);
        assert_eq!(bytes.len(), NET_HDR_MRG_LEN + 3000);

        // Chain is packet fragments plus one header fragment.
        assert_eq!(t.txq.ring().available_descriptors().available(), 8 - 3);
        t.host.complete(u32::from(head), 0);
        t.txq.ring().do_complete();
        assert_eq!(t.txq.ring().available_descriptors().available(), 8);
    }

    #[tokio::test]
    async fn post_backpressures_on_credits() {
        let mut t = make_txq(4, NET_HDR_LEN);
        // Each packet takes 2 descriptors; two fill the ring.
        t.txq.post(Packet::from_data(Bytes::from_static(b"one"))).await;
        t.txq.post(Packet::from_data(Bytes::from_static(b"two"))).await;
        assert_eq!(t.txq.ring().available_descriptors().available(), 0);

        let third = t.txq.post(Packet::from_data(Bytes::from_static(b"three")));
        tokio::pin!(third);
        assert!(
            poll_once(third.as_mut()).await.is_none(),
            "post must suspend while the ring is full"
        );

        // Host consumes the first chain; the pending post gets through.
        let head = t.host.avail_slot(0);
        t.host.complete(u32::from(head), 0);
        t.txq.ring().do_complete();
        third.await;
        assert_eq!(t.host.avail_idx(), 3);
    }

    async fn poll_once<F: core::future::Future>(
        f: core::pin::Pin<&mut F>,
    ) -> Option<F::Output> {
        use core::task::Poll;
        let mut f = Some(f);
        core::future::poll_fn(move |cx| {
            let polled = f.take().map(|f| f.poll(cx));
            Poll::Ready(match polled {
                Some(Poll::Ready(v)) => Some(v),
                _ => None,
            })
        })
        .await
    }
}
