// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A software transport: local RAMs plus a sparse host memory.
//!
//! Data moves as soon as a descriptor is started. The status is
//! queued and stays there until someone polls it, so the order in
//! which completions are observed is up to the caller. Individual
//! tags can be made to fail or to never complete.
//!
//! Local writes and host transfers report on separate queues. Each
//! side allocates its own tags, so the same tag may be outstanding on
//! both at once.

use super::dma::HostTransfer;
use super::dma::LocalTransfer;
use crate::api::DescStatus;
use crate::api::DmaDesc;
use crate::api::Error;
use crate::ddi::sync::KMutex;
use alloc::collections::BTreeMap;
use alloc::collections::BTreeSet;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

const HOST_PAGE: u64 = 4096;

/// Status error code for an access outside local RAM.
pub const ERR_BAD_ADDR: u8 = 1;

/// Status error code for an injected failure.
pub const ERR_INJECTED: u8 = 2;

/// The status queue a transfer reports on.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Channel {
    /// Packet writes started through [`LocalTransfer`].
    Local,
    /// Reads and writes started through [`HostTransfer`].
    Host,
}

#[derive(Debug, Default)]
struct SimState {
    rams: BTreeMap<u8, Vec<u8>>,
    host: BTreeMap<u64, Vec<u8>>,
    local_done: VecDeque<DescStatus>,
    host_done: VecDeque<DescStatus>,
    fail: BTreeSet<(Channel, u64)>,
    lose: BTreeSet<(Channel, u64)>,
}

impl SimState {
    fn ram_range(
        &self,
        ram_sel: u8,
        addr: u64,
        len: usize,
    ) -> Option<core::ops::Range<usize>> {
        let ram = self.rams.get(&ram_sel)?;
        let start = usize::try_from(addr).ok()?;
        let end = start.checked_add(len)?;
        (end <= ram.len()).then_some(start..end)
    }

    fn host_read(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| {
                let a = addr.wrapping_add(i);
                self.host
                    .get(&(a / HOST_PAGE))
                    .map(|p| p[(a % HOST_PAGE) as usize])
                    .unwrap_or(0)
            })
            .collect()
    }

    fn host_write(&mut self, addr: u64, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            let a = addr.wrapping_add(i as u64);
            let page = self
                .host
                .entry(a / HOST_PAGE)
                .or_insert_with(|| vec![0; HOST_PAGE as usize]);
            page[(a % HOST_PAGE) as usize] = *b;
        }
    }

    fn queue(&mut self, ch: Channel) -> &mut VecDeque<DescStatus> {
        match ch {
            Channel::Local => &mut self.local_done,
            Channel::Host => &mut self.host_done,
        }
    }

    fn finish(&mut self, ch: Channel, tag: u64, mut error: u8) {
        if self.lose.remove(&(ch, tag)) {
            return;
        }

        if self.fail.remove(&(ch, tag)) {
            error = ERR_INJECTED;
        }

        self.queue(ch).push_back(DescStatus { tag, error });
    }
}

pub struct SimDma {
    state: KMutex<SimState>,
}

impl SimDma {
    /// Create a transport with one local RAM of `size` bytes per
    /// `(ram_sel, size)` pair.
    pub fn new(rams: &[(u8, usize)]) -> Self {
        let rams =
            rams.iter().map(|&(sel, size)| (sel, vec![0; size])).collect();
        Self { state: KMutex::new(SimState { rams, ..Default::default() }) }
    }

    /// The oldest queued status on `ch`.
    pub fn poll_channel(&self, ch: Channel) -> Option<DescStatus> {
        self.state.lock().queue(ch).pop_front()
    }

    /// Every queued status on `ch`, oldest first.
    pub fn poll_all_channel(&self, ch: Channel) -> Vec<DescStatus> {
        self.state.lock().queue(ch).drain(..).collect()
    }

    /// Every queued status on `ch`, newest first.
    pub fn poll_all_channel_reversed(&self, ch: Channel) -> Vec<DescStatus> {
        self.state.lock().queue(ch).drain(..).rev().collect()
    }

    /// Pull the status of one tag out of the queue for `ch`, whatever
    /// its position.
    pub fn take_channel_status(
        &self,
        ch: Channel,
        tag: u64,
    ) -> Option<DescStatus> {
        let mut st = self.state.lock();
        let q = st.queue(ch);
        let pos = q.iter().position(|s| s.tag == tag)?;
        q.remove(pos)
    }

    pub fn queued_channel(&self, ch: Channel) -> usize {
        self.state.lock().queue(ch).len()
    }

    /// Make the next transfer on `ch` tagged `tag` complete with an
    /// error.
    pub fn inject_channel_error(&self, ch: Channel, tag: u64) {
        self.state.lock().fail.insert((ch, tag));
    }

    /// Make the next transfer on `ch` tagged `tag` never complete.
    pub fn lose_channel_completion(&self, ch: Channel, tag: u64) {
        self.state.lock().lose.insert((ch, tag));
    }

    /// The oldest local write status.
    pub fn poll(&self) -> Option<DescStatus> {
        self.poll_channel(Channel::Local)
    }

    pub fn poll_all(&self) -> Vec<DescStatus> {
        self.poll_all_channel(Channel::Local)
    }

    pub fn poll_all_reversed(&self) -> Vec<DescStatus> {
        self.poll_all_channel_reversed(Channel::Local)
    }

    pub fn take_status(&self, tag: u64) -> Option<DescStatus> {
        self.take_channel_status(Channel::Local, tag)
    }

    pub fn queued(&self) -> usize {
        self.queued_channel(Channel::Local)
    }

    pub fn inject_error(&self, tag: u64) {
        self.inject_channel_error(Channel::Local, tag);
    }

    pub fn lose_completion(&self, tag: u64) {
        self.lose_channel_completion(Channel::Local, tag);
    }

    /// The oldest host transfer status.
    pub fn poll_host(&self) -> Option<DescStatus> {
        self.poll_channel(Channel::Host)
    }

    pub fn poll_all_host(&self) -> Vec<DescStatus> {
        self.poll_all_channel(Channel::Host)
    }

    pub fn poll_all_host_reversed(&self) -> Vec<DescStatus> {
        self.poll_all_channel_reversed(Channel::Host)
    }

    pub fn take_host_status(&self, tag: u64) -> Option<DescStatus> {
        self.take_channel_status(Channel::Host, tag)
    }

    /// Load host memory directly.
    pub fn host_peek(&self, addr: u64, len: usize) -> Vec<u8> {
        self.state.lock().host_read(addr, len)
    }

    /// Store host memory directly.
    pub fn host_poke(&self, addr: u64, data: &[u8]) {
        self.state.lock().host_write(addr, data);
    }
}

impl LocalTransfer for SimDma {
    fn start_local_write(
        &self,
        desc: &DmaDesc,
        data: &[u8],
    ) -> Result<(), Error> {
        let mut st = self.state.lock();
        let len = (desc.len as usize).min(data.len());
        match st.ram_range(desc.ram_sel, desc.ram_addr, len) {
            Some(range) => {
                if let Some(ram) = st.rams.get_mut(&desc.ram_sel) {
                    ram[range].copy_from_slice(&data[..len]);
                }
                st.finish(Channel::Local, desc.tag, 0);
            }

            None => st.finish(Channel::Local, desc.tag, ERR_BAD_ADDR),
        }

        Ok(())
    }

    fn write_local(&self, ram_sel: u8, addr: u64, data: &[u8]) {
        let mut st = self.state.lock();
        if let Some(range) = st.ram_range(ram_sel, addr, data.len()) {
            if let Some(ram) = st.rams.get_mut(&ram_sel) {
                ram[range].copy_from_slice(data);
            }
        }
    }

    fn read_local(&self, ram_sel: u8, addr: u64, len: usize) -> Vec<u8> {
        let st = self.state.lock();
        match (st.ram_range(ram_sel, addr, len), st.rams.get(&ram_sel)) {
            (Some(range), Some(ram)) => ram[range].to_vec(),
            _ => Vec::new(),
        }
    }
}

impl HostTransfer for SimDma {
    fn start_host_read(&self, desc: &DmaDesc) -> Result<(), Error> {
        let mut st = self.state.lock();
        let len = desc.len as usize;
        match st.ram_range(desc.ram_sel, desc.ram_addr, len) {
            Some(range) => {
                let data = st.host_read(desc.addr, len);
                if let Some(ram) = st.rams.get_mut(&desc.ram_sel) {
                    ram[range].copy_from_slice(&data);
                }
                st.finish(Channel::Host, desc.tag, 0);
            }

            None => st.finish(Channel::Host, desc.tag, ERR_BAD_ADDR),
        }

        Ok(())
    }

    fn start_host_write(&self, desc: &DmaDesc) -> Result<(), Error> {
        let mut st = self.state.lock();
        let len = desc.len as usize;
        match st.ram_range(desc.ram_sel, desc.ram_addr, len) {
            Some(range) => {
                let data = st
                    .rams
                    .get(&desc.ram_sel)
                    .map(|ram| ram[range].to_vec())
                    .unwrap_or_default();
                st.host_write(desc.addr, &data);
                st.finish(Channel::Host, desc.tag, 0);
            }

            None => st.finish(Channel::Host, desc.tag, ERR_BAD_ADDR),
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn desc(addr: u64, ram_addr: u64, len: u32, tag: u64) -> DmaDesc {
        DmaDesc { addr, ram_sel: 0, ram_addr, len, tag }
    }

    #[test]
    fn local_write_lands_and_completes() {
        let sim = SimDma::new(&[(0, 256)]);
        sim.start_local_write(&desc(0, 64, 4, 7), &[1, 2, 3, 4]).unwrap();
        assert_eq!(sim.read_local(0, 64, 4), vec![1, 2, 3, 4]);
        assert_eq!(sim.poll(), Some(DescStatus::ok(7)));
        assert_eq!(sim.poll(), None);
    }

    #[test]
    fn out_of_range_reports_error() {
        let sim = SimDma::new(&[(0, 256)]);
        sim.start_local_write(&desc(0, 250, 8, 1), &[0; 8]).unwrap();
        sim.start_host_read(&desc(0, 0, 8, 2)).unwrap();
        let mut d = desc(0, 0, 8, 3);
        d.ram_sel = 9;
        sim.start_host_write(&d).unwrap();
        assert_eq!(
            sim.poll_all(),
            vec![DescStatus { tag: 1, error: ERR_BAD_ADDR }]
        );
        assert_eq!(
            sim.poll_all_host(),
            vec![
                DescStatus::ok(2),
                DescStatus { tag: 3, error: ERR_BAD_ADDR },
            ]
        );
    }

    #[test]
    fn host_round_trip_across_pages() {
        let sim = SimDma::new(&[(0, 8192)]);
        let data: Vec<u8> = (0..200u8).collect();
        sim.host_poke(4000, &data);
        assert_eq!(sim.host_peek(4000, 200), data);
        // Untouched host memory reads as zero.
        assert_eq!(sim.host_peek(0x10_0000, 4), vec![0; 4]);

        sim.start_host_read(&desc(4000, 0, 200, 1)).unwrap();
        assert_eq!(sim.read_local(0, 0, 200), data);

        sim.start_host_write(&desc(0x2_0000, 0, 200, 2)).unwrap();
        assert_eq!(sim.host_peek(0x2_0000, 200), data);
        assert_eq!(sim.queued_channel(Channel::Host), 2);
        assert_eq!(sim.queued(), 0);
    }

    #[test]
    fn channels_keep_their_own_tags() {
        let sim = SimDma::new(&[(0, 256)]);
        sim.inject_channel_error(Channel::Host, 5);
        sim.start_local_write(&desc(0, 0, 4, 5), &[1; 4]).unwrap();
        sim.start_host_read(&desc(0x1000, 64, 4, 5)).unwrap();

        assert_eq!(sim.take_status(5), Some(DescStatus::ok(5)));
        assert_eq!(sim.take_status(5), None);
        assert_eq!(
            sim.poll_host(),
            Some(DescStatus { tag: 5, error: ERR_INJECTED })
        );
        assert_eq!(sim.poll_host(), None);
    }

    #[test]
    fn reorder_fail_and_lose() {
        let sim = SimDma::new(&[(0, 256)]);
        sim.inject_error(2);
        sim.lose_completion(3);
        for tag in 1..=4 {
            sim.start_local_write(&desc(0, 0, 1, tag), &[0]).unwrap();
        }

        assert_eq!(sim.take_status(4), Some(DescStatus::ok(4)));
        assert_eq!(
            sim.poll_all_reversed(),
            vec![DescStatus { tag: 2, error: ERR_INJECTED }, DescStatus::ok(1)]
        );

        // Injections are one-shot.
        sim.start_local_write(&desc(0, 0, 1, 2), &[0]).unwrap();
        assert_eq!(sim.poll(), Some(DescStatus::ok(2)));
    }
}
