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

//! The receive pipeline.
//!
//! A replenish loop keeps the ring stocked with writable page buffers: wait
//! for one credit, opportunistically grab every other credit, post one
//! single-descriptor chain per buffer. Each completion feeds the
//! reassembly: the first buffer of a frame carries the virtio-net header
//! whose `num_buffers` says how many buffers the frame spans; once they
//! have all arrived the fragments become one packet handed to the receive
//! sink, and the buffers' credits return to the replenish loop.

use core::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use super::hdr::NetHdr;
use super::Packet;
use crate::error::Result;
use crate::mem::{PageBuf, Translate, PAGE_SIZE};
use crate::notify::Notifier;
use crate::virtq::{Buffer, Chain, QueueConfig, Ring};

/// Receive callback: invoked once per assembled L2 frame.
pub type RxSink = Rc<dyn Fn(Packet)>;

/// In-progress reassembly of one multi-buffer frame.
#[derive(Default)]
struct Reassembly {
    /// Buffers still missing for the current frame; 0 means idle.
    remaining: u16,
    /// Total buffers of the current frame, for credit release.
    num_buffers: u16,
    frags: Vec<Bytes>,
}

/// The receive half of a virtio-net queue pair.
pub struct RxQueue {
    ring: Rc<Ring>,
    header_len: usize,
    mergeable: bool,
    translate: Rc<dyn Translate>,
    reasm: Rc<RefCell<Reassembly>>,
}

impl RxQueue {
    pub fn new(
        config: &QueueConfig,
        poll_mode: bool,
        header_len: usize,
        translate: Rc<dyn Translate>,
    ) -> Result<Rc<Self>> {
        Ok(Rc::new(Self {
            ring: Ring::new(config, poll_mode)?,
            header_len,
            mergeable: config.mergeable_buffers,
            translate,
            reasm: Rc::new(RefCell::new(Reassembly::default())),
        }))
    }

    pub fn set_notifier(&self, notifier: Rc<dyn Notifier>) {
        self.ring.set_notifier(notifier);
    }

    pub fn wake_notifier_wait(&self) {
        self.ring.wake_notifier_wait();
    }

    pub fn ring(&self) -> &Rc<Ring> {
        &self.ring
    }

    /// Start the replenish loop and completion processing, delivering every
    /// assembled frame to `sink`. Must run within a `tokio` `LocalSet`.
    ///
    /// The loop holds only a weak reference; dropping the queue retires it.
    pub fn run(self: &Rc<Self>, sink: impl Fn(Packet) + 'static) {
        let sink: RxSink = Rc::new(sink);
        let weak = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            loop {
                let Some(queue) = weak.upgrade() else { break };
                let credits = Rc::clone(queue.ring.available_descriptors());
                drop(queue);

                credits.take(1).await;

                let Some(queue) = weak.upgrade() else {
                    credits.release(1);
                    break;
                };
                queue.fill_buffers(&sink);
            }
        });
        self.ring.run();
    }

    /// Post one buffer per credit in hand, taking every further credit that
    /// is available right now. The caller holds one credit already.
    fn fill_buffers(&self, sink: &RxSink) {
        let credits = self.ring.available_descriptors();
        let mut count: u32 = 1;
        let opportunistic = credits.available();
        if opportunistic > 0 && credits.try_take(opportunistic) {
            count += opportunistic;
        }
        tracing::trace!(count, "replenishing receive buffers");
        let chains: Vec<Chain> = (0..count).map(|_| self.make_buffer_chain(sink)).collect();
        self.ring.post(chains);
    }

    /// One fresh page buffer as a writable single-descriptor chain whose
    /// completion runs the reassembly step.
    fn make_buffer_chain(&self, sink: &RxSink) -> Chain {
        let buf = PageBuf::new();
        let addr = self.translate.virt_to_phys(buf.as_ptr());
        let reasm = Rc::clone(&self.reasm);
        let credits = Rc::clone(self.ring.available_descriptors());
        let sink = Rc::clone(sink);
        let header_len = self.header_len;
        let mergeable = self.mergeable;

        Chain::new(
            [Buffer {
                addr,
                len: PAGE_SIZE as u32,
                writable: true,
            }],
            move |written| {
                let written = written as usize;
                assert!(written <= PAGE_SIZE, "host wrote past the buffer end");
                let mut data = Bytes::from_owner(buf).slice(..written);

                let mut st = reasm.borrow_mut();
                if st.remaining == 0 {
                    // First buffer of a frame: starts with the net header.
                    let Some(hdr) = NetHdr::from_prefix(&data, header_len) else {
                        panic!("received buffer shorter than the net header")
                    };
                    let num_buffers = if mergeable { hdr.num_buffers } else { 1 };
                    assert!(num_buffers >= 1, "net header claims zero buffers");
                    st.remaining = num_buffers;
                    st.num_buffers = num_buffers;
                    st.frags.clear();
                    data = data.slice(header_len..);
                }

                st.frags.push(data);
                st.remaining -= 1;

                if st.remaining == 0 {
                    let frags = core::mem::take(&mut st.frags);
                    let num_buffers = st.num_buffers;
                    drop(st);
                    sink(Packet::from_frags(frags));
                    credits.release(u32::from(num_buffers));
                }
            },
        )
    }

    /// Wait until the host has returned every posted buffer.
    pub async fn quiesce(&self) {
        self.ring.quiesce().await;
    }
}

impl core::fmt::Debug for RxQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RxQueue")
            .field("ring", &self.ring)
            .field("header_len", &self.header_len)
            .field("mergeable", &self.mergeable)
            .finish_non_exhaustive()
    }
}
