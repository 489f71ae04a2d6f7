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

//! The Virtqueue Engine
//!
//! A [`Ring`] owns one descriptor table, one available ring and one used
//! ring, all shared with a concurrently running host. It allocates
//! descriptor chains from a free list threaded through the descriptors'
//! `next` fields, publishes them through the available ring, reaps
//! completions from the used ring and manages notification suppression in
//! both directions.
//!
//! # Concurrency
//!
//! All ring mutations happen on the owning thread; the only concurrency is
//! with the host through shared memory, handled by the orderings documented
//! in the [module docs](super). `Ring` is `!Send` by construction.
//!
//! # Modes
//!
//! - **Interrupt mode** (default): every `post` publishes immediately and
//!   decides whether to kick; a self-rescheduling task awaits the notifier
//!   and reaps completions.
//! - **Poll mode**: kicks and interrupts are replaced by a poller that runs
//!   [`flush_batch`](Ring::flush_batch) and the reap loop every scheduling
//!   tick; submissions gather in a local batch that is flushed at
//!   [`BATCH_KICK_THRESHOLD`] entries.

use core::cell::RefCell;
use core::sync::atomic::{fence, Ordering};
use std::rc::Rc;

use smallvec::SmallVec;

use super::avail::{AvailRing, VRING_AVAIL_F_NO_INTERRUPT};
use super::credits::Credits;
use super::desc::{DescFlags, DescTable, Descriptor};
use super::used::UsedRing;
use super::QueueConfig;
use crate::error::{Result, VirtnetError};
use crate::notify::Notifier;

/// Poll-mode submissions are published once this many chains have gathered.
pub const BATCH_KICK_THRESHOLD: usize = 16;

/// One buffer of a scatter-gather chain.
#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    /// Guest physical address.
    pub addr: u64,
    /// Length in bytes.
    pub len: u32,
    /// Host writes into this buffer (receive) rather than reading from it.
    pub writable: bool,
}

type CompletionFn = Box<dyn FnOnce(u32)>;

/// A scatter-gather buffer list plus the single-shot completion slot that is
/// signaled with the host's written length when the chain is reaped.
pub struct Chain {
    bufs: SmallVec<[Buffer; 4]>,
    completed: CompletionFn,
}

impl Chain {
    pub fn new(
        bufs: impl IntoIterator<Item = Buffer>,
        completed: impl FnOnce(u32) + 'static,
    ) -> Self {
        Self {
            bufs: bufs.into_iter().collect(),
            completed: Box::new(completed),
        }
    }

    /// Number of buffers (descriptors) in this chain.
    // Note: a chain is never empty by contract, asserted on post.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.bufs.len()
    }
}

impl core::fmt::Debug for Chain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chain").field("bufs", &self.bufs).finish()
    }
}

/// Driver-private ring state, mutated only on the owning thread.
struct RingState {
    /// Free descriptor chain head, threaded through shared `next` fields.
    free_head: Option<u16>,
    /// Free descriptor chain tail.
    free_tail: Option<u16>,
    /// Private mirror of the next available-ring position; lazily stored to
    /// the shared `avail.idx`.
    avail_head: u16,
    /// Submissions since the last kick, for the event-index decision.
    added_since_kick: u16,
    /// Next used-ring position to reap.
    used_tail: u16,
    /// Poll-mode only: head indices not yet published.
    batch: Vec<u16>,
    /// Single-shot completion slots, keyed by head index.
    completions: Vec<Option<CompletionFn>>,
}

/// One split virtqueue and the engine driving it. See the module docs.
pub struct Ring {
    size: u16,
    mask: u16,
    event_index: bool,
    poll_mode: bool,
    descs: DescTable,
    avail: AvailRing,
    used: UsedRing,
    credits: Rc<Credits>,
    notifier: RefCell<Option<Rc<dyn Notifier>>>,
    state: RefCell<RingState>,
}

impl Ring {
    /// Build a ring over the shared memory described by `config`.
    ///
    /// Initializes the free list to a single chain covering the whole
    /// descriptor table and seeds the credit semaphore to the ring size.
    /// The caller guarantees that `config`'s pointers cover a valid,
    /// exclusive queue layout (see [`queue_layout`](super::queue_layout))
    /// that outlives the ring.
    pub fn new(config: &QueueConfig, poll_mode: bool) -> Result<Rc<Self>> {
        config.validate()?;
        let size = config.size as u16;

        // SAFETY: config describes a valid queue layout per the contract above.
        let descs = unsafe { DescTable::from_raw_parts(config.descs, size) };
        // SAFETY: as above.
        let avail = unsafe { AvailRing::from_raw_parts(config.avail, size) };
        // SAFETY: as above.
        let used = unsafe { UsedRing::from_raw_parts(config.used, size) };

        // One free chain [0, size): descriptor i links to i + 1.
        for i in 0..size - 1 {
            descs.write_next(i, i + 1);
        }

        let mut completions = Vec::new();
        completions.resize_with(size as usize, || None);

        Ok(Rc::new(Self {
            size,
            mask: size - 1,
            event_index: config.event_index,
            poll_mode,
            descs,
            avail,
            used,
            credits: Rc::new(Credits::new(config.size)),
            notifier: RefCell::new(None),
            state: RefCell::new(RingState {
                free_head: Some(0),
                free_tail: Some(size - 1),
                avail_head: 0,
                added_since_kick: 0,
                used_tail: 0,
                batch: Vec::new(),
                completions,
            }),
        }))
    }

    /// Hand the ring its notification channel. Must happen before
    /// [`run`](Self::run) in interrupt mode.
    pub fn set_notifier(&self, notifier: Rc<dyn Notifier>) {
        *self.notifier.borrow_mut() = Some(notifier);
    }

    /// Resolve a pending notifier wait (assigned-device interrupt handlers).
    pub fn wake_notifier_wait(&self) {
        if let Some(n) = self.notifier.borrow().as_ref() {
            n.wake_wait();
        }
    }

    /// Total number of descriptors in the ring.
    pub fn size(&self) -> u16 {
        self.size
    }

    /// The descriptor-credit semaphore. Take one credit per buffer before
    /// calling [`post`](Self::post); the chain's completion gives them back.
    pub fn available_descriptors(&self) -> &Rc<Credits> {
        &self.credits
    }

    /// Submit a batch of chains.
    ///
    /// The caller must hold one credit per buffer. In interrupt mode the
    /// whole batch is published with a single release store of `avail.idx`,
    /// followed by the kick decision and an opportunistic reap; in poll mode
    /// the heads gather locally until [`BATCH_KICK_THRESHOLD`] is reached or
    /// [`flush_batch`](Self::flush_batch) runs.
    pub fn post<I>(&self, chains: I)
    where
        I: IntoIterator<Item = Chain>,
    {
        let mut flush = false;
        {
            let mut st = self.state.borrow_mut();
            for chain in chains {
                let Chain { bufs, completed } = chain;
                assert!(!bufs.is_empty(), "chain must contain at least one buffer");

                let k = bufs.len();
                let mut indices = SmallVec::<[u16; 4]>::with_capacity(k);
                for _ in 0..k {
                    indices.push(self.allocate_desc(&mut st));
                }
                for (i, buf) in bufs.iter().enumerate() {
                    let mut flags = DescFlags::empty();
                    flags.set(DescFlags::WRITE, buf.writable);
                    let next = if i + 1 < k {
                        flags |= DescFlags::NEXT;
                        indices[i + 1]
                    } else {
                        0
                    };
                    self.descs
                        .write(indices[i], Descriptor::new(buf.addr, buf.len, flags, next));
                }

                let head = indices[0];
                let stale = st.completions[head as usize].replace(completed);
                assert!(stale.is_none(), "head {head} already in flight");

                if !self.poll_mode {
                    let slot = st.avail_head & self.mask;
                    self.avail.set_slot(slot, head);
                    st.avail_head = st.avail_head.wrapping_add(1);
                } else {
                    st.batch.push(head);
                }
                st.added_since_kick = st.added_since_kick.wrapping_add(1);
            }

            if !self.poll_mode {
                self.avail.publish_idx(st.avail_head);
                self.kick(&mut st);
            } else {
                flush = st.batch.len() >= BATCH_KICK_THRESHOLD;
            }
        }

        if !self.poll_mode {
            // Opportunistic reap: the host may already have completed older
            // chains while we were producing.
            self.do_complete();
        } else if flush {
            self.flush_batch();
        }
    }

    /// Publish any batched head indices (poll mode), then kick.
    pub fn flush_batch(&self) {
        let mut st = self.state.borrow_mut();
        if st.batch.is_empty() {
            return;
        }
        for i in 0..st.batch.len() {
            let head = st.batch[i];
            let slot = st.avail_head & self.mask;
            self.avail.set_slot(slot, head);
            st.avail_head = st.avail_head.wrapping_add(1);
        }
        st.batch.clear();
        self.avail.publish_idx(st.avail_head);
        self.kick(&mut st);
    }

    /// Start background completion processing.
    ///
    /// Interrupt mode: a task that alternates reaping with awaiting the
    /// notifier; a notifier wait error is terminal and stops reaping. Poll
    /// mode: a poller that flushes the batch and reaps every scheduling
    /// tick. Either task holds only a weak reference, so dropping every
    /// strong handle to the ring also retires the task.
    ///
    /// Must be called from within a `tokio` `LocalSet`.
    pub fn run(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        if self.poll_mode {
            tokio::task::spawn_local(async move {
                loop {
                    let Some(ring) = weak.upgrade() else { break };
                    ring.flush_batch();
                    ring.do_complete();
                    drop(ring);
                    tokio::task::yield_now().await;
                }
            });
        } else {
            tokio::task::spawn_local(async move {
                loop {
                    let Some(ring) = weak.upgrade() else { break };
                    ring.do_complete();
                    let notifier = ring.notifier.borrow().clone();
                    drop(ring);
                    let Some(notifier) = notifier else {
                        tracing::error!("ring running without a notifier, reaping stopped");
                        break;
                    };
                    if let Err(e) = notifier.wait().await {
                        let err = VirtnetError::NotifierWait(e);
                        tracing::error!(error = %err, "reaping stopped");
                        break;
                    }
                }
            });
        }
    }

    /// Reap every completion the host has published.
    ///
    /// Signals each chain's completion slot with the host's written length
    /// and splices the chain back onto the free list. Outside poll mode,
    /// interrupts are suppressed while reaping and the re-enable re-checks
    /// the used ring to close the race window against a concurrent host.
    pub fn do_complete(&self) {
        loop {
            self.disable_interrupts();
            let used_idx = self.used.load_idx(Ordering::Acquire);
            loop {
                // Reborrow per entry so the completion slot runs without any
                // ring state held.
                let reaped = {
                    let mut st = self.state.borrow_mut();
                    if used_idx == st.used_tail {
                        None
                    } else {
                        let elem = self.used.elem(st.used_tail & self.mask);
                        st.used_tail = st.used_tail.wrapping_add(1);
                        assert!(
                            (elem.id as usize) < self.size as usize,
                            "host completed out-of-range head {}",
                            elem.id
                        );
                        let head = elem.id as u16;
                        let slot = st.completions[head as usize].take();
                        assert!(slot.is_some(), "head {head} completed twice by host");
                        self.free_chain(&mut st, head);
                        Some((slot, elem.len))
                    }
                };
                let Some((slot, len)) = reaped else { break };
                let Some(completed) = slot else {
                    unreachable!("completion presence asserted above")
                };
                completed(len);
            }
            if !self.enable_interrupts() {
                break;
            }
        }
    }

    /// Wait for every in-flight chain to complete.
    ///
    /// Draining the full credit count proves the free list is whole again;
    /// the host must already be stopped before the shared region is
    /// released.
    pub async fn quiesce(&self) {
        let all = u32::from(self.size);
        self.credits.take(all).await;
        self.credits.release(all);
    }

    /// Pop one descriptor off the free list.
    fn allocate_desc(&self, st: &mut RingState) -> u16 {
        let Some(head) = st.free_head else {
            unreachable!("free list exhausted with credits held")
        };
        if st.free_tail == Some(head) {
            st.free_head = None;
            st.free_tail = None;
        } else {
            st.free_head = Some(self.descs.read_next(head));
        }
        head
    }

    /// Splice a completed chain (everything reachable from `head` through
    /// NEXT links) onto the tail of the free list as one unit.
    fn free_chain(&self, st: &mut RingState, head: u16) {
        match st.free_tail {
            Some(tail) => self.descs.write_next(tail, head),
            None => st.free_head = Some(head),
        }
        let mut id = head;
        loop {
            let d = self.descs.read(id);
            if !d.has_next() {
                break;
            }
            id = d.next;
            assert!(id < self.size, "chain link {id} out of range");
        }
        st.free_tail = Some(id);
    }

    /// Tell the host not to interrupt while we reap. A hint only; without
    /// event-index it is the NO_INTERRUPT flag, with event-index the stale
    /// `used_event` already suppresses.
    fn disable_interrupts(&self) {
        if !self.poll_mode && !self.event_index {
            self.avail.set_flags(VRING_AVAIL_F_NO_INTERRUPT);
        }
    }

    /// Re-enable host interrupts and re-check for completions that raced in.
    ///
    /// Returns true when the used ring already holds more entries, in which
    /// case the caller must reap again instead of sleeping.
    fn enable_interrupts(&self) -> bool {
        if self.poll_mode {
            return false;
        }
        let tail = self.state.borrow().used_tail;
        if !self.event_index {
            self.avail.set_flags(0);
        } else {
            self.avail.set_used_event(tail);
        }
        // The host checks used_event / NO_INTERRUPT after publishing
        // used.idx; we must publish the re-enable before re-reading idx.
        fence(Ordering::SeqCst);
        self.used.load_idx(Ordering::Relaxed) != tail
    }

    /// Notify the host about newly published buffers, unless suppressed.
    fn kick(&self, st: &mut RingState) {
        let mut need_kick = true;
        // Pair with the host's fence between publishing used.idx and
        // reading avail_event / the NO_NOTIFY flag.
        fence(Ordering::SeqCst);
        if self.event_index {
            let avail_idx = self.avail.idx();
            let avail_event = self.used.avail_event();
            // Kick iff the batch just published crossed the host's
            // requested wake-up index.
            need_kick =
                avail_idx.wrapping_sub(avail_event).wrapping_sub(1) < st.added_since_kick;
        } else if self.used.no_notify() {
            return;
        }
        // The u16::MAX / 2 valve keeps a 16-bit wrap from hiding a needed
        // notification when the host lags far behind.
        if need_kick || st.added_since_kick >= u16::MAX / 2 {
            if let Some(n) = self.notifier.borrow().as_ref() {
                n.notify();
            }
            st.added_since_kick = 0;
        }
    }
}

impl core::fmt::Debug for Ring {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("size", &self.size)
            .field("event_index", &self.event_index)
            .field("poll_mode", &self.poll_mode)
            .finish()
    }
}
