// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Hand-built Ethernet frames.

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;

/// Frames shorter than this are padded.
pub const MIN_FRAME: usize = 60;

#[derive(Clone, Copy, Debug)]
pub struct Endpoint {
    pub mac: [u8; 6],
    pub ip: [u8; 4],
}

impl Endpoint {
    pub const fn new(mac: [u8; 6], ip: [u8; 4]) -> Self {
        Self { mac, ip }
    }
}

fn csum_fold(mut sum: u32) -> u16 {
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn csum_add(sum: u32, bytes: &[u8]) -> u32 {
    bytes.chunks(2).fold(sum, |acc, c| {
        let hi = u32::from(c[0]) << 8;
        let lo = c.get(1).map(|b| u32::from(*b)).unwrap_or(0);
        acc + (hi | lo)
    })
}

/// The Internet checksum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    csum_fold(csum_add(0, bytes))
}

pub fn ether(dst: [u8; 6], src: [u8; 6], ety: u16, body: &[u8]) -> Vec<u8> {
    let mut f = Vec::with_capacity(14 + body.len());
    f.extend_from_slice(&dst);
    f.extend_from_slice(&src);
    f.extend_from_slice(&ety.to_be_bytes());
    f.extend_from_slice(body);
    if f.len() < MIN_FRAME {
        f.resize(MIN_FRAME, 0);
    }
    f
}

fn ipv4(src: &Endpoint, dst: &Endpoint, proto: u8, l4: &[u8]) -> Vec<u8> {
    let total = (20 + l4.len()) as u16;
    let mut h = vec![0x45, 0x00];
    h.extend_from_slice(&total.to_be_bytes());
    h.extend_from_slice(&[0x12, 0x34, 0x40, 0x00, 64, proto, 0, 0]);
    h.extend_from_slice(&src.ip);
    h.extend_from_slice(&dst.ip);
    let c = checksum(&h);
    h[10..12].copy_from_slice(&c.to_be_bytes());
    h.extend_from_slice(l4);
    ether(dst.mac, src.mac, ETHER_TYPE_IPV4, &h)
}

/// Fill in the L4 checksum at `off` over the IPv4 pseudo header.
fn l4_csum(
    src: &Endpoint,
    dst: &Endpoint,
    proto: u8,
    l4: &mut [u8],
    off: usize,
) {
    let mut pseudo = Vec::with_capacity(12);
    pseudo.extend_from_slice(&src.ip);
    pseudo.extend_from_slice(&dst.ip);
    pseudo.extend_from_slice(&[0, proto]);
    pseudo.extend_from_slice(&(l4.len() as u16).to_be_bytes());
    let c = csum_fold(csum_add(csum_add(0, &pseudo), l4));
    l4[off..off + 2].copy_from_slice(&c.to_be_bytes());
}

#[allow(clippy::too_many_arguments)]
pub fn tcp(
    src: &Endpoint,
    dst: &Endpoint,
    sport: u16,
    dport: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut t = Vec::with_capacity(20 + payload.len());
    t.extend_from_slice(&sport.to_be_bytes());
    t.extend_from_slice(&dport.to_be_bytes());
    t.extend_from_slice(&seq.to_be_bytes());
    t.extend_from_slice(&ack.to_be_bytes());
    t.extend_from_slice(&[0x50, flags]);
    t.extend_from_slice(&64240u16.to_be_bytes());
    t.extend_from_slice(&[0, 0, 0, 0]);
    t.extend_from_slice(payload);
    l4_csum(src, dst, 6, &mut t, 16);
    ipv4(src, dst, 6, &t)
}

pub fn udp(
    src: &Endpoint,
    dst: &Endpoint,
    sport: u16,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let len = (8 + payload.len()) as u16;
    let mut u = Vec::with_capacity(len as usize);
    u.extend_from_slice(&sport.to_be_bytes());
    u.extend_from_slice(&dport.to_be_bytes());
    u.extend_from_slice(&len.to_be_bytes());
    u.extend_from_slice(&[0, 0]);
    u.extend_from_slice(payload);
    l4_csum(src, dst, 17, &mut u, 6);
    ipv4(src, dst, 17, &u)
}

pub fn icmp_echo(
    src: &Endpoint,
    dst: &Endpoint,
    reply: bool,
    id: u16,
    seq: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut m = vec![if reply { 0 } else { 8 }, 0, 0, 0];
    m.extend_from_slice(&id.to_be_bytes());
    m.extend_from_slice(&seq.to_be_bytes());
    m.extend_from_slice(payload);
    let c = checksum(&m);
    m[2..4].copy_from_slice(&c.to_be_bytes());
    ipv4(src, dst, 1, &m)
}

/// An ARP request from `src` for `target`, or the reply from `target`
/// to `src` when `reply` is set.
pub fn arp(src: &Endpoint, target: &Endpoint, reply: bool) -> Vec<u8> {
    let (sender, tmac, tip, oper, dst) = if reply {
        (target, src.mac, src.ip, 2u16, src.mac)
    } else {
        (src, [0; 6], target.ip, 1u16, [0xff; 6])
    };

    let mut a = vec![0x00, 0x01, 0x08, 0x00, 6, 4];
    a.extend_from_slice(&oper.to_be_bytes());
    a.extend_from_slice(&sender.mac);
    a.extend_from_slice(&sender.ip);
    a.extend_from_slice(&tmac);
    a.extend_from_slice(&tip);
    ether(dst, sender.mac, ETHER_TYPE_ARP, &a)
}

#[cfg(test)]
mod test {
    use super::*;

    const A: Endpoint = Endpoint::new([2, 0, 0, 0, 0, 1], [10, 0, 0, 1]);
    const B: Endpoint = Endpoint::new([2, 0, 0, 0, 0, 2], [10, 0, 0, 2]);

    #[test]
    fn offsets() {
        let f = tcp(&A, &B, 40000, 22, 1, 2, TCP_ACK, b"hi");
        assert_eq!(&f[12..14], &[0x08, 0x00]);
        assert_eq!(f[23], 6);
        assert_eq!(&f[36..38], &22u16.to_be_bytes());
        assert_eq!(f[47], TCP_ACK);
        assert_eq!(f.len(), 60);

        // Header checksums verify to zero.
        assert_eq!(checksum(&f[14..34]), 0);

        let f = udp(&A, &B, 5353, 53, &[0; 100]);
        assert_eq!(f[23], 17);
        assert_eq!(f.len(), 14 + 20 + 8 + 100);

        let f = arp(&A, &B, true);
        assert_eq!(&f[12..14], &[0x08, 0x06]);
        assert_eq!(&f[0..6], &A.mac);
    }
}
