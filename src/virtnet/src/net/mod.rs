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

//! The packet interface between the virtqueue engine and the network stack.
//!
//! A [`Packet`] is a list of reference-counted fragments. On transmit each
//! fragment becomes one read-only descriptor; the packet stays alive inside
//! the chain's completion slot until the host has consumed it. On receive
//! the fragments are slices of the 4 KiB buffers the frame arrived in, so
//! dropping the packet releases the buffers.

pub mod device;
pub mod hdr;
pub mod rx;
pub mod tx;

pub use device::{Device, QueuePair};

use bytes::Bytes;
use smallvec::SmallVec;

/// Length of an Ethernet header, for checksum/GSO offset computation.
pub const ETH_HDR_LEN: u16 = 14;

/// L4 protocols the transmit offload path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Tcp,
    Udp,
}

/// Offload metadata attached to an outgoing packet by the network stack.
#[derive(Debug, Clone, Copy)]
pub struct OffloadInfo {
    /// L4 protocol, when the stack knows it.
    pub protocol: Option<IpProtocol>,
    /// The L4 checksum still needs to be computed.
    pub needs_csum: bool,
    /// IP header length in bytes.
    pub ip_hdr_len: u16,
    /// TCP header length in bytes (valid for TCP packets).
    pub tcp_hdr_len: u16,
    /// UDP header length in bytes (valid for UDP packets).
    pub udp_hdr_len: u16,
}

impl Default for OffloadInfo {
    fn default() -> Self {
        Self {
            protocol: None,
            needs_csum: false,
            ip_hdr_len: 20,
            tcp_hdr_len: 20,
            udp_hdr_len: 8,
        }
    }
}

/// What the device offers the network stack, after option toggles.
#[derive(Debug, Clone, Copy)]
pub struct HwFeatures {
    /// Transmit L4 checksum offload.
    pub tx_csum_l4_offload: bool,
    /// Receive checksum already validated by the host.
    pub rx_csum_offload: bool,
    /// TCP segmentation offload on transmit.
    pub tx_tso: bool,
    /// UDP fragmentation offload on transmit.
    pub tx_ufo: bool,
    /// Link MTU.
    pub mtu: u16,
}

impl Default for HwFeatures {
    fn default() -> Self {
        Self {
            tx_csum_l4_offload: false,
            rx_csum_offload: false,
            tx_tso: false,
            tx_ufo: false,
            mtu: 1500,
        }
    }
}

/// An L2 frame as a list of fragments.
#[derive(Debug, Default)]
pub struct Packet {
    frags: SmallVec<[Bytes; 4]>,
    offload: OffloadInfo,
}

impl Packet {
    /// A single-fragment packet.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        let mut frags = SmallVec::new();
        let data = data.into();
        if !data.is_empty() {
            frags.push(data);
        }
        Self {
            frags,
            offload: OffloadInfo::default(),
        }
    }

    /// A packet over existing fragments; empty fragments are dropped.
    pub fn from_frags(frags: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            frags: frags.into_iter().filter(|f| !f.is_empty()).collect(),
            offload: OffloadInfo::default(),
        }
    }

    /// Total payload length across fragments.
    pub fn len(&self) -> usize {
        self.frags.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.frags.is_empty()
    }

    /// Number of fragments (= descriptors a transmit chain needs).
    pub fn nr_frags(&self) -> usize {
        self.frags.len()
    }

    pub fn frags(&self) -> &[Bytes] {
        &self.frags
    }

    /// Make `frag` the new first fragment.
    pub fn prepend(&mut self, frag: Bytes) {
        self.frags.insert(0, frag);
    }

    pub fn offload_info(&self) -> &OffloadInfo {
        &self.offload
    }

    pub fn set_offload_info(&mut self, offload: OffloadInfo) {
        self.offload = offload;
    }

    /// Copy the packet into one contiguous buffer (tests, diagnostics).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for f in &self.frags {
            out.extend_from_slice(f);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_length_spans_fragments() {
        let p = Packet::from_frags([
            Bytes::from_static(b"hello "),
            Bytes::from_static(b""),
            Bytes::from_static(b"world"),
        ]);
        assert_eq!(p.nr_frags(), 2); // empty fragment dropped
        assert_eq!(p.len(), 11);
        assert_eq!(p.to_vec(), b"hello world");
    }

    #[test]
    fn prepend_becomes_first_fragment() {
        let mut p = Packet::from_data(Bytes::from_static(b"payload"));
        p.prepend(Bytes::from_static(b"hdr:"));
        assert_eq!(p.nr_frags(), 2);
        assert_eq!(p.to_vec(), b"hdr:payload");
    }

    #[test]
    fn default_offload_matches_common_header_sizes() {
        let o = OffloadInfo::default();
        assert_eq!(o.ip_hdr_len, 20);
        assert_eq!(o.tcp_hdr_len, 20);
        assert_eq!(o.udp_hdr_len, 8);
        assert!(!o.needs_csum);
    }
}
