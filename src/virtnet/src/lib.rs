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

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

//! A user-space virtio-net driver core speaking the legacy split-ring
//! protocol to a paravirtualized host: the vhost-net kernel backend over an
//! eventfd pair, or an assigned virtio device on a unikernel.
//!
//! The heart of the crate is the [`virtq`] module: descriptor-chain
//! allocation and reclamation over shared memory, the producer/consumer
//! memory-ordering discipline against a concurrently running host, and
//! notification suppression in both directions (including the event-index
//! optimization and poll-mode batching). Layered above it, [`net`] provides
//! the packet interface: [`net::tx::TxQueue`] turns outgoing packets into
//! read-only descriptor chains with a checksum/segmentation-offload header,
//! [`net::rx::RxQueue`] keeps the receive ring stocked with page buffers and
//! reassembles frames that span several of them, and [`net::Device`] /
//! [`net::QueuePair`] tie both to the feature toggles and to the external
//! backend setup.
//!
//! Everything runs single-threaded and cooperative: ring state is never
//! locked, the only concurrency is with the host through the shared region,
//! and suspension points (descriptor credits, notifier waits) are plain
//! futures driven by a current-thread runtime. Backend plumbing (vhost/TAP
//! ioctls, option parsing, the cross-core proxy, the network stack) lives
//! outside this crate and talks to it through [`virtq::QueueConfig`],
//! [`notify::Notifier`] and the packet callbacks.

pub mod error;
pub mod features;
pub mod mem;
pub mod net;
pub mod notify;
pub mod options;
pub mod virtq;

pub use error::{Result, VirtnetError};
pub use net::{Device, HwFeatures, IpProtocol, OffloadInfo, Packet, QueuePair};
pub use notify::{AssignedNotifier, EventfdNotifier, Notifier};
pub use options::{NetOptions, Toggle};
pub use virtq::{Buffer, Chain, QueueConfig, Ring};
