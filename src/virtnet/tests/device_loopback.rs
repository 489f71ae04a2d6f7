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

//! End-to-end tests of a queue pair against a scripted host.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use virtnet::{Device, NetOptions, Packet, QueuePair, Toggle};
use virtnet::mem::IdentityTranslate;
use virtnet_testing::{HostStub, TriggerNotifier};

/// Let every spawned local task make progress.
async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

fn make_pair(opts: &NetOptions) -> (Device, QueuePair) {
    let dev = Device::new(opts);
    let qp = QueuePair::new(&dev, dev.features(), opts, Rc::new(IdentityTranslate))
        .expect("queue pair");
    (dev, qp)
}

#[tokio::test]
async fn tx_packet_reaches_host_and_credits_return() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let opts = NetOptions {
                event_index: Some(Toggle::Off),
                ..NetOptions::default()
            };
            let (_dev, qp) = make_pair(&opts);
            let notifier = TriggerNotifier::new();
            qp.set_tx_notifier(notifier.clone());
            qp.tx_start();

            let payload = b"forty-two bytes of perfectly ordinary data".to_vec();
            qp.send(Packet::from_data(Bytes::from(payload.clone()))).await;
            settle().await;

            let mut host = HostStub::new(*qp.tx_config());
            let head = host.pop_avail().expect("one chain published");
            assert!(host.pop_avail().is_none());
            assert_eq!(notifier.kicks(), 1);

            // Mergeable buffers negotiated: 12-byte header precedes the frame.
            let bytes = host.chain_bytes(head);
            assert_eq!(qp.header_len(), 12);
            assert_eq!(bytes.len(), 12 + payload.len());
            assert_eq!(&bytes[12..], &payload[..]);

            // Host consumes; the completion returns the credits.
            host.complete(head, 0);
            notifier.raise();
            settle().await;
            qp.quiesce().await;
        })
        .await;
}

#[tokio::test]
async fn rx_reassembles_frames_across_buffers() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let opts = NetOptions {
                event_index: Some(Toggle::Off),
                ..NetOptions::default()
            };
            let (_dev, qp) = make_pair(&opts);
            let notifier = TriggerNotifier::new();
            qp.set_rx_notifier(notifier.clone());

            let received: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
            qp.rx_start({
                let received = received.clone();
                move |p: Packet| received.borrow_mut().push(p.to_vec())
            });
            settle().await;

            // The replenish loop stocked the whole ring with page buffers.
            let mut host = HostStub::new(*qp.rx_config());
            assert_eq!(host.avail_idx(), 256);

            // One frame split across three buffers, then a single-buffer one.
            let big: Vec<u8> = (0..276u32).map(|i| i as u8).collect();
            assert!(host.deliver_frame(&big, &[52, 128, 96], qp.header_len()));
            let small = b"tiny".to_vec();
            assert!(host.deliver_frame(&small, &[4], qp.header_len()));
            notifier.raise();
            settle().await;

            {
                let received = received.borrow();
                assert_eq!(received.len(), 2);
                assert_eq!(received[0], big);
                assert_eq!(received[1], small);
            }

            // Freed credits were turned straight into fresh buffers.
            assert_eq!(host.avail_idx(), 260);
        })
        .await;
}

#[tokio::test]
async fn poll_mode_moves_traffic_without_interrupts() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let opts = NetOptions {
                event_index: Some(Toggle::Off),
                poll_mode: true,
                ..NetOptions::default()
            };
            let (_dev, qp) = make_pair(&opts);
            let notifier = TriggerNotifier::new();
            qp.set_tx_notifier(notifier.clone());
            qp.tx_start();

            qp.send(Packet::from_data(Bytes::from_static(b"polled"))).await;
            // Nothing published yet: the batch waits for the poller tick.
            let mut host = HostStub::new(*qp.tx_config());
            assert!(host.pop_avail().is_none());

            settle().await;
            let head = host.pop_avail().expect("poller flushed the batch");
            let bytes = host.chain_bytes(head);
            assert_eq!(&bytes[qp.header_len()..], b"polled");

            // The poller also reaps without any raise() from the host.
            host.complete(head, 0);
            settle().await;
            qp.quiesce().await;
        })
        .await;
}

#[tokio::test]
async fn event_index_suppresses_redundant_tx_kicks() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let opts = NetOptions {
                event_index: Some(Toggle::On),
                ..NetOptions::default()
            };
            let (_dev, qp) = make_pair(&opts);
            let notifier = TriggerNotifier::new();
            qp.set_tx_notifier(notifier.clone());
            qp.tx_start();

            let host = HostStub::new(*qp.tx_config());

            // First send crosses the (zero) avail-event threshold: one kick.
            qp.send(Packet::from_data(Bytes::from_static(b"a"))).await;
            settle().await;
            assert_eq!(notifier.kicks(), 1);

            // Host claims it is already polling far ahead: no more kicks.
            host.set_avail_event(100);
            qp.send(Packet::from_data(Bytes::from_static(b"b"))).await;
            qp.send(Packet::from_data(Bytes::from_static(b"c"))).await;
            settle().await;
            assert_eq!(notifier.kicks(), 1);
        })
        .await;
}
