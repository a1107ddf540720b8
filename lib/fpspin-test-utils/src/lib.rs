// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

pub mod frame;
pub mod pcap;

use fpspin::api::ExecutionContext;
use fpspin::api::MemRegion;
use fpspin::api::RAM_SEL_PKT;
use fpspin::api::RAM_SEL_STAGE;
use fpspin::cfg::IngressCfg;
use fpspin::engine::sim::SimDma;
use frame::Endpoint;
use frame::TCP_ACK;
use frame::TCP_PSH;
use frame::TCP_SYN;
use std::sync::Arc;

pub const CLIENT: Endpoint =
    Endpoint::new([0xa8, 0x40, 0x25, 0xff, 0x00, 0x01], [192, 168, 1, 10]);
pub const SERVER: Endpoint =
    Endpoint::new([0xa8, 0x40, 0x25, 0xff, 0x00, 0x02], [192, 168, 1, 20]);
pub const RESOLVER: Endpoint =
    Endpoint::new([0xa8, 0x40, 0x25, 0xff, 0x00, 0x03], [192, 168, 1, 1]);

pub const SSH_PORT: u16 = 22;
pub const CLIENT_PORT: u16 = 50022;

/// Packets in [`sample_capture()`].
pub const SAMPLE_PKTS: usize = 66;
/// Packets in [`sample_capture()`] sent to TCP port 22.
pub const SAMPLE_SSH_IN: usize = 42;
/// Of those, the ones with ACK set.
pub const SAMPLE_SSH_IN_ACK: usize = 41;
/// Packets in [`sample_capture()`] that are TCP or UDP.
pub const SAMPLE_TCP_UDP: usize = 62;
/// Packets in [`sample_capture()`] that are UDP.
pub const SAMPLE_UDP: usize = 6;

/// A small capture of a host doing address resolution, a ping, a few
/// DNS lookups and then an SSH session:
///
/// * 2 ARP
/// * 2 ICMP echo
/// * 6 UDP DNS
/// * 42 TCP client to server port 22, the first a bare SYN
/// * 14 TCP server port 22 to client
pub fn sample_capture() -> Vec<Vec<u8>> {
    let mut pkts = Vec::with_capacity(SAMPLE_PKTS);

    pkts.push(frame::arp(&CLIENT, &SERVER, false));
    pkts.push(frame::arp(&CLIENT, &SERVER, true));
    pkts.push(frame::icmp_echo(&CLIENT, &SERVER, false, 1, 1, &[0x61; 56]));
    pkts.push(frame::icmp_echo(&SERVER, &CLIENT, true, 1, 1, &[0x61; 56]));

    for (i, name) in ["ssh.example", "ntp.example", "pkg.example"]
        .iter()
        .enumerate()
    {
        let sport = 40000 + i as u16;
        let mut q = vec![0x12, i as u8, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        q.extend_from_slice(name.as_bytes());
        pkts.push(frame::udp(&CLIENT, &RESOLVER, sport, 53, &q));
        let mut r = q.clone();
        r[2] = 0x81;
        r.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0x0e, 0x10]);
        pkts.push(frame::udp(&RESOLVER, &CLIENT, 53, sport, &r));
    }

    let mut cseq = 1000u32;
    let mut sseq = 9000u32;
    for round in 0..14u32 {
        for j in 0..3u32 {
            let n = round * 3 + j;
            let (flags, len) = if n == 0 {
                (TCP_SYN, 0)
            } else {
                (TCP_ACK | TCP_PSH, ((n * 37) % 300) as usize)
            };
            let payload = vec![n as u8; len];
            pkts.push(frame::tcp(
                &CLIENT,
                &SERVER,
                CLIENT_PORT,
                SSH_PORT,
                cseq,
                sseq,
                flags,
                &payload,
            ));
            cseq = cseq.wrapping_add(len as u32 + 1);
        }

        let len = (64 + round * 90) as usize;
        let flags = if round == 0 { TCP_SYN | TCP_ACK } else { TCP_ACK };
        pkts.push(frame::tcp(
            &SERVER,
            &CLIENT,
            SSH_PORT,
            CLIENT_PORT,
            sseq,
            cseq,
            flags,
            &vec![0xee; len],
        ));
        sseq = sseq.wrapping_add(len as u32);
    }

    pkts
}

/// [`sample_capture()`] as pcap bytes.
pub fn sample_pcap() -> Vec<u8> {
    let mut b = pcap::PcapBuilder::new(Vec::new());
    for pkt in sample_capture() {
        b.add_pkt(&pkt);
    }
    b.finish()
}

/// A context laid out the way a handler image is loaded: code at
/// `0x1_0000 * (id + 1)`, a 1 MiB host window, handlers inside the
/// code region, and four 4 KiB scratchpads.
pub fn default_ctx(id: u8) -> ExecutionContext {
    let base = 0x1_0000 * (u64::from(id) + 1);
    let host = 0x8000_0000 + u64::from(id) * 0x10_0000;
    let scratch =
        |i: u64| MemRegion::new(0x10_0000 + base + i * 0x1000, 0x1000);
    ExecutionContext {
        handler_mem: MemRegion::new(base, 0x1_0000),
        host_mem: MemRegion::new(host, 0x10_0000),
        hh: MemRegion::new(base, 0x400),
        ph: MemRegion::new(base + 0x400, 0x800),
        th: MemRegion::new(base + 0xc00, 0x400),
        scratchpad: [scratch(0), scratch(1), scratch(2), scratch(3)],
    }
}

/// A simulated transport with a packet RAM sized for `cfg` and a
/// 16 KiB staging RAM.
pub fn sim_for(cfg: &IngressCfg) -> Arc<SimDma> {
    Arc::new(SimDma::new(&[
        (RAM_SEL_PKT, cfg.buffer.size as usize),
        (RAM_SEL_STAGE, 16 * 1024),
    ]))
}
