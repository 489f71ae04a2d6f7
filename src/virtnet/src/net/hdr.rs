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

//! The virtio-net header.
//!
//! Every frame crossing a virtio-net queue is prefixed by a 10-byte header
//! carrying checksum and segmentation-offload metadata; with mergeable
//! receive buffers negotiated it grows a 2-byte `num_buffers` field. Fields
//! are little-endian on the wire, so the header is serialized and parsed
//! explicitly rather than transmuted.

use bytemuck::{Pod, Zeroable};

use super::{HwFeatures, IpProtocol, Packet, ETH_HDR_LEN};

/// `flags` bit: the host must finish the L4 checksum at
/// `csum_start + csum_offset`.
pub const NET_HDR_F_NEEDS_CSUM: u8 = 1;

/// `gso_type` values.
pub const GSO_NONE: u8 = 0;
pub const GSO_TCPV4: u8 = 1;
pub const GSO_UDP: u8 = 3;
pub const GSO_TCPV6: u8 = 4;
/// ECN flag, or-ed into `gso_type`.
pub const GSO_ECN: u8 = 0x80;

/// The virtio-net header with the mergeable-buffers tail.
///
/// Transmit always builds this full struct and sends only the negotiated
/// prefix; receive parses `num_buffers` only when the 12-byte variant was
/// negotiated.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct NetHdr {
    pub flags: u8,
    pub gso_type: u8,
    /// Length of the headers the host must replicate per segment
    /// (Ethernet + IP + L4), when segmenting.
    pub hdr_len: u16,
    /// Maximum segment payload after offload.
    pub gso_size: u16,
    /// Offset where checksumming starts.
    pub csum_start: u16,
    /// Offset of the checksum field within the checksummed area.
    pub csum_offset: u16,
    /// How many receive buffers this frame spans (mergeable receive only).
    pub num_buffers: u16,
}

/// Header length without `num_buffers`.
pub const NET_HDR_LEN: usize = 10;
/// Header length with `num_buffers` (MRG_RXBUF negotiated).
pub const NET_HDR_MRG_LEN: usize = 12;

const _: () = assert!(core::mem::size_of::<NetHdr>() == NET_HDR_MRG_LEN);

impl NetHdr {
    /// Serialize in wire order. Callers send the first [`NET_HDR_LEN`] or
    /// [`NET_HDR_MRG_LEN`] bytes depending on negotiation.
    pub fn to_bytes(self) -> [u8; NET_HDR_MRG_LEN] {
        let mut out = [0u8; NET_HDR_MRG_LEN];
        out[0] = self.flags;
        out[1] = self.gso_type;
        out[2..4].copy_from_slice(&self.hdr_len.to_le_bytes());
        out[4..6].copy_from_slice(&self.gso_size.to_le_bytes());
        out[6..8].copy_from_slice(&self.csum_start.to_le_bytes());
        out[8..10].copy_from_slice(&self.csum_offset.to_le_bytes());
        out[10..12].copy_from_slice(&self.num_buffers.to_le_bytes());
        out
    }

    /// Parse the header prefix of a received buffer. `None` when the buffer
    /// is shorter than `header_len` (a host protocol violation handled by
    /// the caller).
    pub fn from_prefix(bytes: &[u8], header_len: usize) -> Option<Self> {
        if bytes.len() < header_len {
            return None;
        }
        let mut hdr = Self {
            flags: bytes[0],
            gso_type: bytes[1],
            hdr_len: u16::from_le_bytes([bytes[2], bytes[3]]),
            gso_size: u16::from_le_bytes([bytes[4], bytes[5]]),
            csum_start: u16::from_le_bytes([bytes[6], bytes[7]]),
            csum_offset: u16::from_le_bytes([bytes[8], bytes[9]]),
            num_buffers: 0,
        };
        if header_len >= NET_HDR_MRG_LEN {
            hdr.num_buffers = u16::from_le_bytes([bytes[10], bytes[11]]);
        }
        Some(hdr)
    }

    pub fn needs_csum(&self) -> bool {
        self.flags & NET_HDR_F_NEEDS_CSUM != 0
    }
}

/// Negotiated header length: 12 bytes with mergeable receive buffers, 10
/// without.
pub const fn header_len(mergeable: bool) -> usize {
    if mergeable {
        NET_HDR_MRG_LEN
    } else {
        NET_HDR_LEN
    }
}

/// Populate the transmit header from a packet's offload metadata.
///
/// Checksum offload fills `csum_start`/`csum_offset` (the L4 checksum field
/// sits 16 bytes into a TCP header, 6 into a UDP header). Segmentation
/// offload engages when the frame exceeds MTU plus the Ethernet header and
/// tells the host how to split: `hdr_len` headers replicated per segment,
/// `gso_size` payload per segment.
pub fn build_tx_hdr(packet: &Packet, hw: &HwFeatures) -> NetHdr {
    let mut hdr = NetHdr::default();
    if !hw.tx_csum_l4_offload {
        return hdr;
    }

    let oi = packet.offload_info();
    let mtu = usize::from(hw.mtu);
    match oi.protocol {
        Some(IpProtocol::Tcp) => {
            if oi.needs_csum {
                hdr.flags |= NET_HDR_F_NEEDS_CSUM;
                hdr.csum_start = ETH_HDR_LEN + oi.ip_hdr_len;
                hdr.csum_offset = 16;
            }
            if hw.tx_tso && packet.len() > mtu + usize::from(ETH_HDR_LEN) {
                hdr.gso_type = GSO_TCPV4;
                hdr.hdr_len = ETH_HDR_LEN + oi.ip_hdr_len + oi.tcp_hdr_len;
                hdr.gso_size = hw.mtu - oi.ip_hdr_len - oi.tcp_hdr_len;
            }
        }
        Some(IpProtocol::Udp) => {
            if oi.needs_csum {
                hdr.flags |= NET_HDR_F_NEEDS_CSUM;
                hdr.csum_start = ETH_HDR_LEN + oi.ip_hdr_len;
                hdr.csum_offset = 6;
            }
            if hw.tx_ufo && packet.len() > mtu + usize::from(ETH_HDR_LEN) {
                hdr.gso_type = GSO_UDP;
                hdr.hdr_len = ETH_HDR_LEN + oi.ip_hdr_len + oi.udp_hdr_len;
                hdr.gso_size = hw.mtu - oi.ip_hdr_len - oi.udp_hdr_len;
            }
        }
        None => {}
    }
    hdr
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::net::OffloadInfo;

    fn tcp_packet(len: usize, needs_csum: bool) -> Packet {
        let mut p = Packet::from_data(Bytes::from(vec![0u8; len]));
        p.set_offload_info(OffloadInfo {
            protocol: Some(IpProtocol::Tcp),
            needs_csum,
            ..OffloadInfo::default()
        });
        p
    }

    fn offload_hw() -> HwFeatures {
        HwFeatures {
            tx_csum_l4_offload: true,
            rx_csum_offload: true,
            tx_tso: true,
            tx_ufo: true,
            mtu: 1500,
        }
    }

    #[test]
    fn wire_format_round_trips() {
        let hdr = NetHdr {
            flags: NET_HDR_F_NEEDS_CSUM,
            gso_type: GSO_TCPV4,
            hdr_len: 54,
            gso_size: 1460,
            csum_start: 34,
            csum_offset: 16,
            num_buffers: 3,
        };
        let bytes = hdr.to_bytes();
        assert_eq!(bytes.len(), NET_HDR_MRG_LEN);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 1);
        // Little-endian num_buffers in the last two bytes.
        assert_eq!(&bytes[10..12], &3u16.to_le_bytes());

        let parsed = NetHdr::from_prefix(&bytes, NET_HDR_MRG_LEN).expect("long enough");
        assert_eq!(parsed, hdr);

        let short = NetHdr::from_prefix(&bytes, NET_HDR_LEN).expect("long enough");
        assert_eq!(short.num_buffers, 0);
        assert_eq!(short.gso_size, 1460);

        assert!(NetHdr::from_prefix(&bytes[..8], NET_HDR_LEN).is_none());
    }

    #[test]
    fn small_tcp_frame_gets_checksum_but_no_gso() {
        let hdr = build_tx_hdr(&tcp_packet(200, true), &offload_hw());
        assert!(hdr.needs_csum());
        assert_eq!(hdr.csum_start, 34); // 14 eth + 20 ip
        assert_eq!(hdr.csum_offset, 16);
        assert_eq!(hdr.gso_type, GSO_NONE);
        assert_eq!(hdr.gso_size, 0);
    }

    #[test]
    fn oversized_tcp_frame_engages_tso() {
        let hdr = build_tx_hdr(&tcp_packet(3000, true), &offload_hw());
        assert!(hdr.needs_csum());
        assert_eq!(hdr.csum_start, 34);
        assert_eq!(hdr.csum_offset, 16);
        assert_eq!(hdr.gso_type, GSO_TCPV4);
        assert_eq!(hdr.hdr_len, 54); // eth + ip + tcp
        assert_eq!(hdr.gso_size, 1500 - 20 - 20);
    }

    #[test]
    fn oversized_udp_frame_engages_ufo() {
        let mut p = Packet::from_data(Bytes::from(vec![0u8; 4000]));
        p.set_offload_info(OffloadInfo {
            protocol: Some(IpProtocol::Udp),
            needs_csum: true,
            ..OffloadInfo::default()
        });
        let hdr = build_tx_hdr(&p, &offload_hw());
        assert!(hdr.needs_csum());
        assert_eq!(hdr.csum_offset, 6);
        assert_eq!(hdr.gso_type, GSO_UDP);
        assert_eq!(hdr.hdr_len, 14 + 20 + 8);
        assert_eq!(hdr.gso_size, 1500 - 20 - 8);
    }

    #[test]
    fn no_offload_without_hw_support() {
        let hdr = build_tx_hdr(&tcp_packet(3000, true), &HwFeatures::default());
        assert_eq!(hdr, NetHdr::default());
    }

    #[test]
    fn tso_disabled_leaves_oversized_frame_unsegmented() {
        let hw = HwFeatures {
            tx_tso: false,
            ..offload_hw()
        };
        let hdr = build_tx_hdr(&tcp_packet(3000, false), &hw);
        assert!(!hdr.needs_csum());
        assert_eq!(hdr.gso_type, GSO_NONE);
    }
}
