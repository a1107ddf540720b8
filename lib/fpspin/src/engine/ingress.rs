// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The ingress pipeline.
//!
//! ```text
//! packet -> classify -+-> bypass
//!                     |
//!                     +-> admit -> tag -> HER -> local write
//!                            |      |               |
//!                         dropped dropped      (completion)
//!                                                   |
//!                                               HER emitted
//! ```
//!
//! A HER is only handed out once the packet bytes are in the buffer.
//! The region stays allocated until the consumer of the HER frees it;
//! only a failed or expired write frees it on the consumer's behalf.

use super::buffer::AllocStatsSnap;
use super::buffer::BufferAllocator;
use super::dma::Completion;
use super::dma::DmaTracker;
use super::dma::LocalTransfer;
use super::her::Her;
use super::her::HerGen;
use super::matcher::Matcher;
use super::matcher::RuleTable;
use super::tag::MsgIds;
use crate::ExecCtx;
use crate::api::BufferRegion;
use crate::api::DescStatus;
use crate::api::DmaDesc;
use crate::api::DropReason;
use crate::api::Error;
use crate::api::ExecutionContext;
use crate::api::RAM_SEL_PKT;
use crate::cfg::IngressCfg;
use crate::ddi::stat::StatProvider;
use crate::ddi::stat::StatU64;
use crate::ddi::sync::KMutex;
use crate::ddi::time::Moment;
use crate::provider::LogLevel;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

#[derive(StatProvider)]
pub struct IngressStats {
    pub rx_pkts: StatU64,
    pub bypass_pkts: StatU64,
    pub matched_pkts: StatU64,
    pub her_emitted: StatU64,
    pub drop_oversize: StatU64,
    pub drop_no_space: StatU64,
    pub drop_no_tag: StatU64,
    pub xfer_errors: StatU64,
    pub xfer_timeouts: StatU64,
    pub table_loads: StatU64,
    pub ctx_loads: StatU64,
}

/// What happened to a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngressVerdict {
    /// No ruleset matched; the packet is not ours.
    Bypass,
    /// The packet is being written to `region`; its HER follows the
    /// completion of `tag`.
    Dispatched { tag: u64, region: BufferRegion },
    /// A ruleset matched but the packet could not be buffered.
    Dropped(DropReason),
}

impl Display for IngressVerdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bypass => write!(f, "bypass"),
            Self::Dispatched { tag, region } => {
                write!(f, "dispatched tag {tag:#x} to {region}")
            }
            Self::Dropped(reason) => write!(f, "dropped ({reason})"),
        }
    }
}

pub struct Ingress<L> {
    cfg: IngressCfg,
    ectx: ExecCtx,
    matcher: Matcher,
    buf: BufferAllocator,
    her: HerGen,
    msgids: KMutex<MsgIds>,
    tracker: DmaTracker<Her>,
    xfer: Arc<L>,
    stats: IngressStats,
}

impl<L: LocalTransfer> Ingress<L> {
    pub fn new(
        cfg: IngressCfg,
        ectx: ExecCtx,
        xfer: Arc<L>,
    ) -> Result<Self, Error> {
        if let Err(e) = cfg.validate() {
            ectx.log.log(LogLevel::Error, &format!("ingress config: {e}"));
            return Err(e);
        }

        Ok(Self {
            matcher: Matcher::new(cfg.matcher)?,
            buf: BufferAllocator::new(cfg.buffer)?,
            her: HerGen::new(cfg.num_contexts, cfg.tag),
            msgids: KMutex::new(MsgIds::new(cfg.tag, cfg.num_contexts)),
            tracker: DmaTracker::new(cfg.dma.timeout_ms),
            stats: IngressStats::new(),
            cfg,
            ectx,
            xfer,
        })
    }

    fn log_err(&self, e: &Error) {
        let level =
            if e.is_config() { LogLevel::Error } else { LogLevel::Warn };
        self.ectx.log.log(level, &format!("ingress: {e}"));
    }

    pub fn cfg(&self) -> &IngressCfg {
        &self.cfg
    }

    /// Swap in a new rule table.
    pub fn load_table(&self, table: RuleTable) -> Result<(), Error> {
        self.matcher.load_table(table).inspect_err(|e| self.log_err(e))?;
        self.stats.table_loads.incr(1);
        self.ectx.log.log(LogLevel::Note, "ingress: rule table loaded");
        Ok(())
    }

    pub fn table(&self) -> RuleTable {
        self.matcher.table()
    }

    /// Install the metadata of one context, enabling it.
    pub fn load_ctx(
        &self,
        ctx_id: u8,
        ctx: ExecutionContext,
    ) -> Result<(), Error> {
        self.her.load(ctx_id, ctx).inspect_err(|e| self.log_err(e))?;
        self.stats.ctx_loads.incr(1);
        self.ectx
            .log
            .log(LogLevel::Note, &format!("ingress: context {ctx_id} loaded"));
        Ok(())
    }

    /// Remove the metadata of one context, disabling it.
    pub fn unload_ctx(&self, ctx_id: u8) -> Result<(), Error> {
        self.her.unload(ctx_id).inspect_err(|e| self.log_err(e))?;
        self.ectx.log.log(
            LogLevel::Note,
            &format!("ingress: context {ctx_id} unloaded"),
        );
        Ok(())
    }

    pub fn contexts(&self) -> Vec<(u8, ExecutionContext)> {
        self.her.contexts()
    }

    pub fn is_ready(&self) -> bool {
        self.her.is_ready()
    }

    fn drop_pkt(&self, reason: DropReason, len: usize) -> IngressVerdict {
        let stat = match reason {
            DropReason::Oversize => &self.stats.drop_oversize,
            DropReason::NoSpace => &self.stats.drop_no_space,
            DropReason::NoTag => &self.stats.drop_no_tag,
        };
        stat.incr(1);
        self.ectx.log.log(
            LogLevel::Warn,
            &format!("ingress: dropped {len} byte packet: {reason}"),
        );
        IngressVerdict::Dropped(reason)
    }

    /// Run one packet through the pipeline.
    pub fn process(&self, pkt: &[u8]) -> Result<IngressVerdict, Error> {
        self.stats.rx_pkts.incr(1);

        let class = self.matcher.classify(pkt);
        let Some(ctx_id) = class.ruleset else {
            self.stats.bypass_pkts.incr(1);
            return Ok(IngressVerdict::Bypass);
        };
        let eom = class.raw_eom();
        self.stats.matched_pkts.incr(1);

        if !self.her.is_enabled(ctx_id) {
            let e = Error::ContextNotEnabled(ctx_id);
            self.log_err(&e);
            return Err(e);
        }

        let region = match self.buf.admit(pkt.len() as u64) {
            Ok(region) => region,
            Err(reason) => return Ok(self.drop_pkt(reason, pkt.len())),
        };

        match self.submit(ctx_id, eom, region, pkt) {
            Ok(Some(tag)) => Ok(IngressVerdict::Dispatched { tag, region }),

            Ok(None) => {
                self.buf.free(region)?;
                Ok(self.drop_pkt(DropReason::NoTag, pkt.len()))
            }

            Err(e) => {
                self.buf.free(region)?;
                self.log_err(&e);
                Err(e)
            }
        }
    }

    fn submit(
        &self,
        ctx_id: u8,
        eom: bool,
        region: BufferRegion,
        pkt: &[u8],
    ) -> Result<Option<u64>, Error> {
        let xfer_size = pkt.len() as u64;
        let len = u32::try_from(pkt.len()).map_err(|_| {
            Error::InvalidConfig(format!("{} byte packet", pkt.len()))
        })?;
        let desc = {
            let mut ids = self.msgids.lock();
            let tagged =
                ids.next_tag(ctx_id, eom, |t| self.tracker.is_pending(t))?;
            let Some((fields, tag)) = tagged else {
                return Ok(None);
            };

            let her = self.her.dispatch(
                ctx_id,
                eom,
                region,
                xfer_size,
                fields.msgid,
            )?;
            let desc = DmaDesc {
                addr: region.addr,
                ram_sel: RAM_SEL_PKT,
                ram_addr: region.addr - self.cfg.buffer.start,
                len,
                tag,
            };
            self.tracker.submit_write(desc, her, Moment::now())?;
            desc
        };

        if let Err(e) = self.xfer.start_local_write(&desc, pkt) {
            self.tracker.cancel(desc.tag);
            return Err(e);
        }

        Ok(Some(desc.tag))
    }

    fn fail(&self, c: Completion<Her>) -> Error {
        let e = match c.result {
            Err(e) => e,
            Ok(()) => Error::TransferFailed { tag: c.desc.tag, error: 0 },
        };

        match e {
            Error::Timeout { .. } => self.stats.xfer_timeouts.incr(1),
            _ => self.stats.xfer_errors.incr(1),
        }

        if let Err(free_err) = self.buf.free(c.cookie.region()) {
            self.log_err(&free_err);
        }
        self.log_err(&e);
        e
    }

    /// Feed in a local write status. On success the packet's HER is
    /// returned; on failure its region has been freed.
    pub fn complete(&self, status: DescStatus) -> Result<Her, Error> {
        let c = self
            .tracker
            .complete(status)
            .inspect_err(|e| self.log_err(e))?;

        if c.is_ok() {
            self.stats.her_emitted.incr(1);
            Ok(c.cookie)
        } else {
            Err(self.fail(c))
        }
    }

    /// Fail every write that has waited too long, freeing its region.
    pub fn expire(&self, now: Moment) -> Vec<Error> {
        self.tracker.expire(now).into_iter().map(|c| self.fail(c)).collect()
    }

    /// A consumer is done with a region. `size` may be the HER's
    /// `xfer_size` or `buf_size`.
    pub fn free(&self, addr: u64, size: u64) -> Result<(), Error> {
        self.buf
            .free(BufferRegion { addr, size })
            .inspect_err(|e| self.log_err(e))
    }

    pub fn pending_tags(&self) -> Vec<u64> {
        self.tracker.pending_tags()
    }

    /// Packets dropped at admission.
    pub fn dropped(&self) -> u64 {
        let s = &self.stats;
        s.drop_oversize.val() + s.drop_no_space.val() + s.drop_no_tag.val()
    }

    pub fn stats(&self) -> IngressStatsSnap {
        self.stats.snapshot()
    }

    pub fn alloc_stats(&self) -> AllocStatsSnap {
        self.buf.stats()
    }

    pub fn outstanding(&self) -> Vec<BufferRegion> {
        self.buf.outstanding()
    }

    #[cfg(any(feature = "test-help", test))]
    pub fn check_invariants(&self) -> Result<(), String> {
        self.buf.check_invariants()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::MatcherCfg;
    use crate::api::RuleSet;
    use crate::engine::sim::SimDma;
    use crate::provider::CollectLog;
    use core::time::Duration;

    fn setup() -> (Arc<SimDma>, CollectLog, Ingress<SimDma>) {
        let cfg = IngressCfg::default();
        let sim = Arc::new(SimDma::new(&[(
            RAM_SEL_PKT,
            cfg.buffer.size as usize,
        )]));
        let log = CollectLog::new();
        let ectx = ExecCtx { log: Box::new(log.clone()) };
        let ing = Ingress::new(cfg, ectx, sim.clone()).unwrap();
        let table = RuleTable::program(
            MatcherCfg::default(),
            vec![RuleSet::match_all(4, true).unwrap()],
        )
        .unwrap();
        ing.load_table(table).unwrap();
        ing.load_ctx(0, ExecutionContext::default()).unwrap();
        (sim, log, ing)
    }

    #[test]
    fn her_follows_completion() {
        let (sim, _log, ing) = setup();
        let pkt = vec![0x5a; 100];
        let IngressVerdict::Dispatched { tag, region } =
            ing.process(&pkt).unwrap()
        else {
            panic!("not dispatched");
        };
        assert_eq!(ing.pending_tags(), vec![tag]);
        assert_eq!(sim.read_local(RAM_SEL_PKT, region.addr, 100), pkt);

        let her = ing.complete(sim.poll().unwrap()).unwrap();
        assert_eq!(her.tag, tag);
        assert_eq!(her.xfer_size, 100);
        assert_eq!(her.buf_size, 128);
        assert!(her.eom);
        assert!(ing.pending_tags().is_empty());

        // The region stays allocated until freed.
        assert_eq!(ing.outstanding(), vec![region]);
        ing.free(her.addr, her.xfer_size).unwrap();
        assert!(ing.outstanding().is_empty());
        assert_eq!(ing.stats().her_emitted, 1);
    }

    #[test]
    fn disabled_context_is_an_error() {
        let (_sim, log, ing) = setup();
        ing.unload_ctx(0).unwrap();
        assert_eq!(ing.process(&[0; 64]), Err(Error::ContextNotEnabled(0)));
        assert!(ing.outstanding().is_empty());
        assert_eq!(log.count(LogLevel::Error), 1);
        assert!(ing.unload_ctx(0).is_err());
    }

    #[test]
    fn failed_write_frees_region() {
        let (sim, log, ing) = setup();
        sim.inject_error(0b100);
        let v = ing.process(&[0; 64]).unwrap();
        assert!(matches!(v, IngressVerdict::Dispatched { tag: 0b100, .. }));
        let e = ing.complete(sim.poll().unwrap()).unwrap_err();
        assert!(matches!(e, Error::TransferFailed { tag: 0b100, .. }));
        assert!(ing.outstanding().is_empty());
        assert_eq!(ing.stats().xfer_errors, 1);
        assert_eq!(log.count(LogLevel::Warn), 1);
    }

    #[test]
    fn lost_write_times_out() {
        let (sim, _log, ing) = setup();
        sim.lose_completion(0b100);
        ing.process(&[0; 64]).unwrap();
        assert_eq!(sim.queued(), 0);

        let errs = ing.expire(Moment::now() + Duration::from_millis(100));
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0], Error::Timeout { tag: 0b100, .. }));
        assert!(ing.outstanding().is_empty());
        assert_eq!(ing.stats().xfer_timeouts, 1);
    }

    #[test]
    fn unknown_completion() {
        let (_sim, _log, ing) = setup();
        assert_eq!(
            ing.complete(DescStatus::ok(0x42)),
            Err(Error::UnknownTag(0x42))
        );
    }

    #[test]
    fn drops_are_counted() {
        let (_sim, log, ing) = setup();
        for _ in 0..3 {
            assert_eq!(
                ing.process(&[0; 2000]).unwrap(),
                IngressVerdict::Dropped(DropReason::Oversize)
            );
        }
        assert_eq!(ing.dropped(), 3);
        assert_eq!(ing.stats().drop_oversize, 3);
        assert_eq!(ing.alloc_stats().drop_oversize, 3);
        assert_eq!(log.count(LogLevel::Warn), 3);
    }

    #[test]
    fn out_of_tags_drops() {
        let mut cfg = IngressCfg::default();
        cfg.tag = crate::api::TagLayout::new(1, 2).unwrap();
        let sim = Arc::new(SimDma::new(&[(RAM_SEL_PKT, 128 * 1024)]));
        let ing = Ingress::new(cfg, ExecCtx::println(), sim.clone()).unwrap();
        ing.load_table(
            RuleTable::program(
                MatcherCfg::default(),
                vec![RuleSet::match_all(4, false).unwrap()],
            )
            .unwrap(),
        )
        .unwrap();
        ing.load_ctx(0, ExecutionContext::default()).unwrap();

        // Two message ids; both in flight.
        for _ in 0..2 {
            assert!(matches!(
                ing.process(&[0; 64]).unwrap(),
                IngressVerdict::Dispatched { .. }
            ));
        }
        assert_eq!(
            ing.process(&[0; 64]).unwrap(),
            IngressVerdict::Dropped(DropReason::NoTag)
        );
        assert_eq!(ing.outstanding().len(), 2);

        // Completing one frees its id.
        ing.complete(sim.poll().unwrap()).unwrap();
        assert!(matches!(
            ing.process(&[0; 64]).unwrap(),
            IngressVerdict::Dispatched { .. }
        ));
        ing.check_invariants().unwrap();
    }
}
