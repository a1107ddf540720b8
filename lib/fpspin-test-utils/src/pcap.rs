// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for building and reading packet capture files.

use fpspin::capture::split_pcap;
use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::fs::File;
use std::io::Write;

/// Split a capture into its packets, in capture order.
pub fn read_pcap(bytes: &[u8]) -> Vec<Vec<u8>> {
    match split_pcap(bytes) {
        Ok(pkts) => pkts,
        Err(e) => panic!("failed to read capture: {e}"),
    }
}

/// Build a packet capture from a series of packets.
pub struct PcapBuilder<W: Write> {
    out: W,
    ts_usec: u32,
}

impl PcapBuilder<File> {
    /// Create a new pcap builder, writing all captures to `path`.
    pub fn create(path: &str) -> Self {
        Self::new(File::create(path).unwrap())
    }
}

impl<W: Write> PcapBuilder<W> {
    pub fn new(mut out: W) -> Self {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 65535,
            network: Linktype::ETHERNET,
        };

        out.write_all(&hdr.to_vec().unwrap()).unwrap();
        Self { out, ts_usec: 0 }
    }

    /// Add a packet to the capture. Packets are stamped 100us apart.
    pub fn add_pkt(&mut self, pkt: &[u8]) {
        let mut block = LegacyPcapBlock {
            ts_sec: 7777,
            ts_usec: self.ts_usec,
            caplen: pkt.len() as u32,
            origlen: pkt.len() as u32,
            data: pkt,
        };
        self.ts_usec += 100;

        self.out.write_all(&block.to_vec().unwrap()).unwrap();
    }

    pub fn finish(mut self) -> W {
        self.out.flush().unwrap();
        self.out
    }
}
