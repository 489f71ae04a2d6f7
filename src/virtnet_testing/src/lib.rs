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

//! Test utilities for the virtnet driver.
//!
//! [`HostStub`] plays the device side of a split virtqueue over the same
//! shared memory the driver uses: it consumes the available ring with
//! acquire semantics, reads or fills the chains' buffers (assuming identity
//! translation), and publishes used entries with release semantics, the
//! mirror image of the driver's ordering discipline. [`TriggerNotifier`]
//! counts guest kicks and lets a test raise the host-to-guest signal.

use core::cell::Cell;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicU16, Ordering};
use std::io;
use std::rc::Rc;

use tokio::sync::Notify;
use virtnet::virtq::desc::Descriptor;
use virtnet::virtq::used::UsedElem;
use virtnet::virtq::QueueConfig;
use virtnet::Notifier;

/// The device side of one queue, scripted by a test.
pub struct HostStub {
    cfg: QueueConfig,
    /// Next available-ring slot to consume.
    avail_tail: u16,
    /// Next used-ring slot to produce.
    used_head: u16,
}

impl HostStub {
    /// Attach to the queue described by `cfg`. The shared memory must stay
    /// alive for the stub's lifetime, and only one stub may drive a queue.
    pub fn new(cfg: QueueConfig) -> Self {
        Self {
            cfg,
            avail_tail: 0,
            used_head: 0,
        }
    }

    fn mask(&self) -> u16 {
        (self.cfg.size - 1) as u16
    }

    /// The driver's published available index (acquire, like a real host).
    pub fn avail_idx(&self) -> u16 {
        // SAFETY: cfg.avail points at a live available ring; idx at offset 2.
        unsafe { (*self.cfg.avail.add(2).cast::<AtomicU16>()).load(Ordering::Acquire) }
    }

    /// Head index stored in available-ring slot `i` (masked here).
    pub fn avail_slot(&self, i: u16) -> u16 {
        // SAFETY: masked slot stays within the ring array at offset 4.
        unsafe {
            self.cfg
                .avail
                .add(4 + 2 * usize::from(i & self.mask()))
                .cast::<u16>()
                .read_volatile()
        }
    }

    /// The driver's NO_INTERRUPT hint.
    pub fn no_interrupt(&self) -> bool {
        // SAFETY: avail flags at offset 0.
        unsafe { (*self.cfg.avail.cast::<AtomicU16>()).load(Ordering::Relaxed) & 1 != 0 }
    }

    /// The driver's used-event threshold (event-index feature).
    pub fn used_event(&self) -> u16 {
        // SAFETY: used_event sits after the available ring array.
        unsafe {
            (*self
                .cfg
                .avail
                .add(4 + 2 * self.cfg.size as usize)
                .cast::<AtomicU16>())
            .load(Ordering::Relaxed)
        }
    }

    /// Publish the host's avail-event threshold (event-index feature).
    pub fn set_avail_event(&self, val: u16) {
        // SAFETY: avail_event sits after the used ring's element array.
        unsafe {
            (*self
                .cfg
                .used
                .add(4 + 8 * self.cfg.size as usize)
                .cast::<AtomicU16>())
            .store(val, Ordering::Relaxed)
        }
    }

    /// Set or clear the host's NO_NOTIFY hint.
    pub fn set_no_notify(&self, on: bool) {
        // SAFETY: used flags at offset 0.
        unsafe { (*self.cfg.used.cast::<AtomicU16>()).store(u16::from(on), Ordering::Relaxed) }
    }

    /// Read one descriptor from the shared table.
    pub fn read_desc(&self, idx: u16) -> Descriptor {
        assert!(u32::from(idx) < self.cfg.size, "descriptor {idx} out of range");
        // SAFETY: idx checked; descs points at the table.
        unsafe {
            self.cfg
                .descs
                .cast::<Descriptor>()
                .add(usize::from(idx))
                .read_volatile()
        }
    }

    /// Walk a chain from its head, like a host following NEXT links.
    pub fn read_chain(&self, head: u16) -> Vec<Descriptor> {
        let mut descs = Vec::new();
        let mut idx = head;
        loop {
            let d = self.read_desc(idx);
            let has_next = d.has_next();
            let next = d.next;
            descs.push(d);
            assert!(descs.len() <= self.cfg.size as usize, "chain cycles");
            if !has_next {
                return descs;
            }
            idx = next;
        }
    }

    /// Consume the next available chain, if the driver published one.
    pub fn pop_avail(&mut self) -> Option<u16> {
        if self.avail_idx() == self.avail_tail {
            return None;
        }
        let head = self.avail_slot(self.avail_tail);
        self.avail_tail = self.avail_tail.wrapping_add(1);
        Some(head)
    }

    /// Gather the readable bytes of a chain (identity translation).
    pub fn chain_bytes(&self, head: u16) -> Vec<u8> {
        let mut out = Vec::new();
        for d in self.read_chain(head) {
            assert!(!d.is_writable(), "transmit chain must be read-only");
            // SAFETY: the driver posted this buffer with identity
            // translation; it stays alive until the chain completes.
            let frag =
                unsafe { core::slice::from_raw_parts(d.paddr as *const u8, d.len as usize) };
            out.extend_from_slice(frag);
        }
        out
    }

    /// Fill a writable single-descriptor chain with `bytes`.
    pub fn write_buffer(&self, head: u16, bytes: &[u8]) {
        let d = self.read_desc(head);
        assert!(d.is_writable(), "receive buffer must be writable");
        assert!(bytes.len() <= d.len as usize, "write exceeds buffer");
        // SAFETY: as in chain_bytes; the buffer is writable and big enough.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), d.paddr as *mut u8, bytes.len()) };
    }

    /// Publish one used entry: element write first, then the release store
    /// of `used.idx` that reveals it.
    pub fn complete(&mut self, head: u16, len: u32) {
        let slot = usize::from(self.used_head & self.mask());
        // SAFETY: slot < size; elements start at offset 4.
        unsafe {
            self.cfg
                .used
                .add(4 + slot * 8)
                .cast::<UsedElem>()
                .write_volatile(UsedElem {
                    id: u32::from(head),
                    len,
                });
        }
        self.used_head = self.used_head.wrapping_add(1);
        // SAFETY: used idx at offset 2.
        unsafe {
            (*self.cfg.used.add(2).cast::<AtomicU16>()).store(self.used_head, Ordering::Release)
        };
    }

    /// Deliver one frame to a receive queue across as many posted buffers
    /// as `splits` entries, writing the net header (with the buffer count)
    /// into the first. Returns false when not enough buffers are posted.
    pub fn deliver_frame(&mut self, payload: &[u8], splits: &[usize], header_len: usize) -> bool {
        assert_eq!(splits.iter().sum::<usize>(), payload.len());
        let mut hdr = [0u8; 12];
        hdr[10..12].copy_from_slice(&(splits.len() as u16).to_le_bytes());

        let mut consumed = 0;
        for (i, &chunk) in splits.iter().enumerate() {
            let Some(head) = self.pop_avail() else {
                return false;
            };
            let mut buf = Vec::with_capacity(header_len + chunk);
            if i == 0 {
                buf.extend_from_slice(&hdr[..header_len]);
            }
            buf.extend_from_slice(&payload[consumed..consumed + chunk]);
            consumed += chunk;
            self.write_buffer(head, &buf);
            self.complete(head, buf.len() as u32);
        }
        true
    }
}

/// A notifier whose host side is the test: kicks are counted, and the test
/// raises the host-to-guest signal with [`raise`](TriggerNotifier::raise).
#[derive(Default)]
pub struct TriggerNotifier {
    kicks: Cell<usize>,
    signal: Notify,
}

impl TriggerNotifier {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Guest-to-host kicks seen so far.
    pub fn kicks(&self) -> usize {
        self.kicks.get()
    }

    /// Host-to-guest signal: resolves the driver's pending wait. A raise
    /// that beats the next wait is retained, like an eventfd counter.
    pub fn raise(&self) {
        self.signal.notify_one();
    }
}

impl Notifier for TriggerNotifier {
    fn notify(&self) {
        self.kicks.set(self.kicks.get() + 1);
    }

    fn wait(&self) -> Pin<Box<dyn Future<Output = io::Result<()>> + '_>> {
        Box::pin(async move {
            self.signal.notified().await;
            Ok(())
        })
    }
}
