// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet buffer allocator.
//!
//! The buffer is a single address range carved into aligned regions.
//! Free space is kept as an address-ordered set of extents; an
//! allocation takes the front of the first extent large enough
//! (first fit) and a free coalesces with both neighbours, so a fully
//! freed buffer is again a single extent.
//!
//! Admission never waits. A request either gets a region right away
//! or is dropped and counted.

use crate::api::BufferRegion;
use crate::api::DropReason;
use crate::api::Error;
use crate::api::align_up;
use crate::cfg::BufferCfg;
use crate::ddi::stat::StatProvider;
use crate::ddi::stat::StatU64;
use crate::ddi::sync::KMutex;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

#[derive(StatProvider)]
pub struct AllocStats {
    pub allocs: StatU64,
    pub frees: StatU64,
    pub drop_oversize: StatU64,
    pub drop_no_space: StatU64,
    pub bytes_in_use: StatU64,
    pub invalid_free: StatU64,
}

#[derive(Debug)]
struct Extents {
    /// Free extents, keyed by address, valued by size.
    free: BTreeMap<u64, u64>,
    /// Allocated regions, keyed by address, valued by size.
    used: BTreeMap<u64, u64>,
}

impl Extents {
    fn take_first_fit(&mut self, size: u64) -> Option<u64> {
        let (&addr, &len) = self.free.iter().find(|&(_, &len)| len >= size)?;
        self.free.remove(&addr);
        if len > size {
            self.free.insert(addr + size, len - size);
        }
        self.used.insert(addr, size);
        Some(addr)
    }

    fn give_back(&mut self, mut addr: u64, mut size: u64) {
        if let Some((&prev, &prev_len)) = self.free.range(..addr).next_back() {
            if prev + prev_len == addr {
                self.free.remove(&prev);
                addr = prev;
                size += prev_len;
            }
        }

        if let Some(next_len) = self.free.remove(&(addr + size)) {
            size += next_len;
        }

        self.free.insert(addr, size);
    }
}

pub struct BufferAllocator {
    cfg: BufferCfg,
    max_size: u64,
    extents: KMutex<Extents>,
    stats: AllocStats,
}

impl BufferAllocator {
    pub fn new(cfg: BufferCfg) -> Result<Self, Error> {
        cfg.validate()?;
        let mut free = BTreeMap::new();
        free.insert(cfg.start, cfg.size);

        Ok(Self {
            cfg,
            max_size: align_up(cfg.max_pkt_size, cfg.align),
            extents: KMutex::new(Extents { free, used: BTreeMap::new() }),
            stats: AllocStats::new(),
        })
    }

    pub fn cfg(&self) -> &BufferCfg {
        &self.cfg
    }

    /// The size actually reserved for a request of `size` bytes.
    pub fn alloc_size(&self, size: u64) -> u64 {
        align_up(size, self.cfg.align).max(self.cfg.align)
    }

    /// Reserve a region for a packet of `size` bytes, or say why not.
    pub fn admit(&self, size: u64) -> Result<BufferRegion, DropReason> {
        let rounded = self.alloc_size(size);
        if rounded > self.max_size {
            self.stats.drop_oversize.incr(1);
            return Err(DropReason::Oversize);
        }

        match self.extents.lock().take_first_fit(rounded) {
            Some(addr) => {
                self.stats.allocs.incr(1);
                self.stats.bytes_in_use.incr(rounded);
                Ok(BufferRegion { addr, size: rounded })
            }

            None => {
                self.stats.drop_no_space.incr(1);
                Err(DropReason::NoSpace)
            }
        }
    }

    pub fn try_allocate(&self, size: u64) -> Option<BufferRegion> {
        self.admit(size).ok()
    }

    /// Return a region. `region.size` may be the size originally
    /// requested or the size allocated; both round to the same value.
    pub fn free(&self, region: BufferRegion) -> Result<(), Error> {
        let rounded = self.alloc_size(region.size);
        let mut ext = self.extents.lock();

        let found = ext.used.get(&region.addr).copied();
        match found {
            Some(size) if size == rounded => {
                ext.used.remove(&region.addr);
                ext.give_back(region.addr, size);
                drop(ext);
                self.stats.frees.incr(1);
                self.stats.bytes_in_use.decr(size);
                Ok(())
            }

            _ => {
                drop(ext);
                self.stats.invalid_free.incr(1);
                Err(Error::InvalidFree {
                    addr: region.addr,
                    size: region.size,
                })
            }
        }
    }

    /// Packets refused for any reason.
    pub fn dropped(&self) -> u64 {
        self.stats.drop_oversize.val() + self.stats.drop_no_space.val()
    }

    /// Bytes currently allocated.
    pub fn in_use(&self) -> u64 {
        self.stats.bytes_in_use.val()
    }

    /// The currently allocated regions, in address order.
    pub fn outstanding(&self) -> Vec<BufferRegion> {
        self.extents
            .lock()
            .used
            .iter()
            .map(|(&addr, &size)| BufferRegion { addr, size })
            .collect()
    }

    /// The largest region that could be allocated right now.
    pub fn largest_free(&self) -> u64 {
        self.extents.lock().free.values().copied().max().unwrap_or(0)
    }

    pub fn stats(&self) -> AllocStatsSnap {
        self.stats.snapshot()
    }

    /// Verify the bookkeeping: regions lie within the buffer, nothing
    /// overlaps, free extents never touch, and free plus used space
    /// covers the buffer exactly.
    #[cfg(any(feature = "test-help", test))]
    pub fn check_invariants(&self) -> Result<(), String> {
        let ext = self.extents.lock();
        let buf_end = self.cfg.start + self.cfg.size;
        let mut all: Vec<(u64, u64, bool)> = ext
            .free
            .iter()
            .map(|(&a, &s)| (a, s, true))
            .chain(ext.used.iter().map(|(&a, &s)| (a, s, false)))
            .collect();
        all.sort_unstable();

        let mut cursor = self.cfg.start;
        let mut prev_free = false;
        for (addr, size, is_free) in all {
            if addr != cursor {
                return Err(format!("gap or overlap at {addr:#x}"));
            }
            if size == 0 || addr % self.cfg.align != 0 {
                return Err(format!("bad extent {addr:#x}+{size:#x}"));
            }
            if is_free && prev_free {
                return Err(format!("uncoalesced free extent at {addr:#x}"));
            }
            prev_free = is_free;
            cursor = addr + size;
        }

        if cursor != buf_end {
            return Err(format!("extents end at {cursor:#x}, not {buf_end:#x}"));
        }

        let used: u64 = ext.used.values().sum();
        if used != self.stats.bytes_in_use.val() {
            return Err(format!(
                "bytes_in_use {} but {used} outstanding",
                self.stats.bytes_in_use.val()
            ));
        }

        Ok(())
    }
}
