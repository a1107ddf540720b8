// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A context's port into its host memory window.
//!
//! Host data always passes through a staging RAM. A read stages the
//! host bytes there and copies them out once the read completes; a
//! write copies the caller's bytes into staging and then pushes them
//! out. Reads are issued in whole DMA beats, so the descriptor may be
//! longer than the caller asked for; the excess is discarded.
//!
//! Tags are drawn per port and only need to be unique among host
//! transfers. Statuses must come from the transport's host queue, not
//! from the queue packet writes complete on.

use super::buffer::BufferAllocator;
use super::dma::Completion;
use super::dma::DmaTracker;
use super::dma::HostTransfer;
use super::dma::LocalTransfer;
use super::tag::MsgIds;
use crate::api::BufferRegion;
use crate::api::DescStatus;
use crate::api::DmaDesc;
use crate::api::DmaOp;
use crate::api::Error;
use crate::api::MemRegion;
use crate::api::RAM_SEL_STAGE;
use crate::api::TagLayout;
use crate::api::align_up;
use crate::cfg::BufferCfg;
use crate::cfg::DmaCfg;
use crate::ddi::sync::KMutex;
use crate::ddi::time::Moment;
use alloc::sync::Arc;
use alloc::vec::Vec;

#[derive(Clone, Copy, Debug)]
pub struct HostOp {
    stage: BufferRegion,
    /// Bytes the caller asked for.
    len: u32,
}

/// A finished host transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostDone {
    Read { tag: u64, data: Vec<u8> },
    Write { tag: u64 },
}

pub struct HostMem<D> {
    ctx_id: u8,
    window: MemRegion,
    dma_align: u64,
    xfer: Arc<D>,
    stage: BufferAllocator,
    tracker: DmaTracker<HostOp>,
    msgids: KMutex<MsgIds>,
}

impl<D: LocalTransfer + HostTransfer> HostMem<D> {
    pub fn new(
        ctx_id: u8,
        window: MemRegion,
        stage: BufferCfg,
        dma: DmaCfg,
        layout: TagLayout,
        xfer: Arc<D>,
    ) -> Result<Self, Error> {
        if u64::from(ctx_id) > layout.max_ctx_id() {
            return Err(Error::InvalidConfig(format!(
                "context {ctx_id} does not fit in the tag"
            )));
        }

        Ok(Self {
            ctx_id,
            window,
            dma_align: dma.align,
            xfer,
            stage: BufferAllocator::new(stage)?,
            tracker: DmaTracker::new(dma.timeout_ms),
            msgids: KMutex::new(MsgIds::new(layout, u32::from(ctx_id) + 1)),
        })
    }

    fn check_window(&self, addr: u64, len: u64) -> Result<(), Error> {
        let end = addr.checked_add(len);
        let inside = addr >= self.window.addr
            && end.is_some_and(|end| end <= self.window.end());
        if !inside {
            return Err(Error::InvalidConfig(format!(
                "host access {addr:#x}+{len:#x} outside window {}",
                self.window
            )));
        }
        Ok(())
    }

    fn ram_addr(&self, region: BufferRegion) -> u64 {
        region.addr - self.stage.cfg().start
    }

    /// Submit `desc` under a fresh tag and start it with `start`.
    fn submit<F>(
        &self,
        op: HostOp,
        mut desc: DmaDesc,
        is_read: bool,
        start: F,
    ) -> Result<Option<u64>, Error>
    where
        F: FnOnce(&D, &DmaDesc) -> Result<(), Error>,
    {
        let mut ids = self.msgids.lock();
        let tagged =
            ids.next_tag(self.ctx_id, false, |t| self.tracker.is_pending(t))?;
        let Some((_, tag)) = tagged else {
            self.stage.free(op.stage)?;
            return Ok(None);
        };

        desc.tag = tag;
        let now = Moment::now();
        if is_read {
            self.tracker.submit_read(desc, op, now)?;
        } else {
            self.tracker.submit_write(desc, op, now)?;
        }
        drop(ids);

        if let Err(e) = start(&*self.xfer, &desc) {
            self.tracker.cancel(tag);
            self.stage.free(op.stage)?;
            return Err(e);
        }

        Ok(Some(tag))
    }

    /// Start reading `len` bytes at `host_addr`. `None` means there is
    /// no staging space or no free tag right now.
    pub fn read(
        &self,
        host_addr: u64,
        len: u32,
    ) -> Result<Option<u64>, Error> {
        self.check_window(host_addr, u64::from(len))?;
        let desc_len = align_up(u64::from(len), self.dma_align);
        let Some(stage) = self.stage.try_allocate(desc_len) else {
            return Ok(None);
        };

        let desc = DmaDesc {
            addr: host_addr,
            ram_sel: RAM_SEL_STAGE,
            ram_addr: self.ram_addr(stage),
            len: u32::try_from(desc_len).map_err(|_| {
                Error::InvalidConfig(format!("read of {len} bytes too long"))
            })?,
            tag: 0,
        };

        self.submit(HostOp { stage, len }, desc, true, |x, d| {
            x.start_host_read(d)
        })
    }

    /// Start writing `data` at `host_addr`.
    pub fn write(
        &self,
        host_addr: u64,
        data: &[u8],
    ) -> Result<Option<u64>, Error> {
        let len = u32::try_from(data.len()).map_err(|_| {
            Error::InvalidConfig(format!("write of {} bytes", data.len()))
        })?;
        self.check_window(host_addr, u64::from(len))?;
        let Some(stage) = self.stage.try_allocate(u64::from(len)) else {
            return Ok(None);
        };

        let ram_addr = self.ram_addr(stage);
        self.xfer.write_local(RAM_SEL_STAGE, ram_addr, data);
        let desc = DmaDesc {
            addr: host_addr,
            ram_sel: RAM_SEL_STAGE,
            ram_addr,
            len,
            tag: 0,
        };

        self.submit(HostOp { stage, len }, desc, false, |x, d| {
            x.start_host_write(d)
        })
    }

    fn finish(&self, c: Completion<HostOp>) -> Result<HostDone, Error> {
        let data = match (&c.result, c.op) {
            (Ok(()), DmaOp::Read) => Some(self.xfer.read_local(
                RAM_SEL_STAGE,
                self.ram_addr(c.cookie.stage),
                c.cookie.len as usize,
            )),
            _ => None,
        };

        self.stage.free(c.cookie.stage)?;
        c.result?;

        let tag = c.desc.tag;
        Ok(match data {
            Some(data) => HostDone::Read { tag, data },
            None => HostDone::Write { tag },
        })
    }

    /// Feed in a status. Errors are `UnknownTag`, or the failure of
    /// the transfer the status belongs to.
    pub fn complete(&self, status: DescStatus) -> Result<HostDone, Error> {
        let c = self.tracker.complete(status)?;
        self.finish(c)
    }

    /// Fail every transfer that has waited too long.
    pub fn expire(&self, now: Moment) -> Vec<Error> {
        self.tracker
            .expire(now)
            .into_iter()
            .filter_map(|c| self.finish(c).err())
            .collect()
    }

    pub fn pending_tags(&self) -> Vec<u64> {
        self.tracker.pending_tags()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::RAM_SEL_PKT;
    use crate::engine::sim::ERR_INJECTED;
    use crate::engine::sim::SimDma;
    use core::time::Duration;

    const WINDOW: MemRegion = MemRegion::new(0x8000_0000, 0x10000);

    fn port(stage_size: u64) -> (Arc<SimDma>, HostMem<SimDma>) {
        let sim = Arc::new(SimDma::new(&[
            (RAM_SEL_PKT, 4096),
            (RAM_SEL_STAGE, stage_size as usize),
        ]));
        let stage = BufferCfg {
            size: stage_size,
            max_pkt_size: stage_size,
            ..Default::default()
        };
        let hm = HostMem::new(
            1,
            WINDOW,
            stage,
            DmaCfg::default(),
            TagLayout::default(),
            sim.clone(),
        )
        .unwrap();
        (sim, hm)
    }

    #[test]
    fn read_rounds_descriptor_and_trims_data() {
        let (sim, hm) = port(4096);
        let bytes: Vec<u8> = (1..=100).collect();
        sim.host_poke(WINDOW.addr + 8, &bytes);

        let tag = hm.read(WINDOW.addr + 8, 100).unwrap().unwrap();
        let status = sim.poll_host().unwrap();
        assert_eq!(status.tag, tag);

        match hm.complete(status).unwrap() {
            HostDone::Read { tag: t, data } => {
                assert_eq!(t, tag);
                assert_eq!(data, bytes);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(hm.pending_tags().is_empty());
    }

    #[test]
    fn write_reaches_host() {
        let (sim, hm) = port(4096);
        let tag = hm.write(WINDOW.addr, b"hello").unwrap().unwrap();
        assert_eq!(
            hm.complete(sim.poll_host().unwrap()).unwrap(),
            HostDone::Write { tag }
        );
        assert_eq!(sim.host_peek(WINDOW.addr, 5), b"hello".to_vec());
    }

    #[test]
    fn reads_complete_out_of_order() {
        let (sim, hm) = port(4096);
        sim.host_poke(WINDOW.addr, &[0xaa; 64]);
        sim.host_poke(WINDOW.addr + 64, &[0xbb; 64]);
        let a = hm.read(WINDOW.addr, 64).unwrap().unwrap();
        let b = hm.read(WINDOW.addr + 64, 64).unwrap().unwrap();
        assert_ne!(a, b);

        let done_b = hm.complete(sim.take_host_status(b).unwrap()).unwrap();
        let done_a = hm.complete(sim.take_host_status(a).unwrap()).unwrap();
        assert_eq!(done_b, HostDone::Read { tag: b, data: vec![0xbb; 64] });
        assert_eq!(done_a, HostDone::Read { tag: a, data: vec![0xaa; 64] });

        assert_eq!(
            hm.complete(DescStatus::ok(a)),
            Err(Error::UnknownTag(a))
        );
    }

    #[test]
    fn outside_window_is_refused() {
        let (_sim, hm) = port(4096);
        assert!(hm.read(WINDOW.addr - 1, 4).is_err());
        assert!(hm.read(WINDOW.end() - 2, 4).is_err());
        assert!(hm.write(WINDOW.end(), &[0]).is_err());
    }

    #[test]
    fn staging_exhaustion_and_failures_release_space() {
        let (sim, hm) = port(128);
        let a = hm.read(WINDOW.addr, 100).unwrap().unwrap();
        // 100 rounds to 128 and fills the staging RAM.
        assert_eq!(hm.read(WINDOW.addr, 1).unwrap(), None);

        // Report the read as failed instead of the queued success.
        sim.poll_host().unwrap();
        assert_eq!(
            hm.complete(DescStatus { tag: a, error: ERR_INJECTED }),
            Err(Error::TransferFailed { tag: a, error: ERR_INJECTED })
        );
        assert!(hm.read(WINDOW.addr, 1).unwrap().is_some());
    }

    #[test]
    fn expired_reads_release_space() {
        let (sim, hm) = port(128);
        let tag = hm.read(WINDOW.addr, 64).unwrap().unwrap();
        let errs = hm.expire(Moment::now() + Duration::from_millis(50));
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0], Error::Timeout { tag: t, .. } if t == tag));
        assert!(hm.read(WINDOW.addr, 128).unwrap().is_some());
        // The late status no longer matches anything.
        assert!(hm.complete(sim.take_host_status(tag).unwrap()).is_err());
    }
}
