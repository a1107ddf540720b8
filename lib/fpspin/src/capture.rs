// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet capture input.

use alloc::string::String;
use alloc::vec::Vec;
use pcap_parser::Linktype;
use pcap_parser::pcap;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("bad pcap header: {0}")]
    Header(String),

    #[error("unsupported link type {0}")]
    LinkType(i32),

    #[error("bad frame {index}: {msg}")]
    Frame { index: usize, msg: String },

    #[error("packet {index} truncated to {caplen} of {origlen} bytes")]
    Truncated { index: usize, caplen: u32, origlen: u32 },
}

/// Split a classic Ethernet pcap capture into its packets, in capture
/// order. Every packet must have been captured in full.
pub fn split_pcap(bytes: &[u8]) -> Result<Vec<Vec<u8>>, CaptureError> {
    let (mut rest, hdr) = pcap::parse_pcap_header(bytes)
        .map_err(|e| CaptureError::Header(format!("{e:?}")))?;
    if hdr.network.0 != Linktype::ETHERNET.0 {
        return Err(CaptureError::LinkType(hdr.network.0));
    }

    let mut pkts = Vec::new();
    while !rest.is_empty() {
        let index = pkts.len();
        let (next, block) =
            pcap::parse_pcap_frame(rest).map_err(|e| CaptureError::Frame {
                index,
                msg: format!("{e:?}"),
            })?;
        if block.caplen != block.origlen {
            return Err(CaptureError::Truncated {
                index,
                caplen: block.caplen,
                origlen: block.origlen,
            });
        }
        pkts.push(block.data.to_vec());
        rest = next;
    }

    Ok(pkts)
}

#[cfg(test)]
mod test {
    use super::*;
    use pcap_parser::ToVec;
    use pcap_parser::pcap::LegacyPcapBlock;
    use pcap_parser::pcap::PcapHeader;

    fn header(network: Linktype) -> Vec<u8> {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 65535,
            network,
        };
        hdr.to_vec().unwrap()
    }

    fn frame(data: &[u8], origlen: u32) -> Vec<u8> {
        let mut block = LegacyPcapBlock {
            ts_sec: 1,
            ts_usec: 0,
            caplen: data.len() as u32,
            origlen,
            data,
        };
        block.to_vec().unwrap()
    }

    #[test]
    fn packets_in_order() {
        let mut bytes = header(Linktype::ETHERNET);
        bytes.extend(frame(&[1; 60], 60));
        bytes.extend(frame(&[2; 90], 90));
        assert_eq!(
            split_pcap(&bytes).unwrap(),
            vec![vec![1; 60], vec![2; 90]]
        );

        let empty = header(Linktype::ETHERNET);
        assert!(split_pcap(&empty).unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_captures() {
        assert!(matches!(split_pcap(&[0; 10]), Err(CaptureError::Header(_))));

        let raw = header(Linktype::RAW);
        assert_eq!(
            split_pcap(&raw),
            Err(CaptureError::LinkType(Linktype::RAW.0))
        );

        let mut cut = header(Linktype::ETHERNET);
        cut.extend(frame(&[0; 60], 60));
        cut.extend(frame(&[0; 64], 1514));
        assert_eq!(
            split_pcap(&cut),
            Err(CaptureError::Truncated { index: 1, caplen: 64, origlen: 1514 })
        );

        let mut short = header(Linktype::ETHERNET);
        short.extend(&frame(&[0; 60], 60)[..20]);
        assert!(matches!(
            split_pcap(&short),
            Err(CaptureError::Frame { index: 0, .. })
        ));
    }
}
