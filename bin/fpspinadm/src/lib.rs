// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! fpspin administration library.
//!
//! Everything `fpspinadm` does short of argument parsing and printing
//! lives here so it can be driven from tests.

pub mod config;
pub mod log;

use config::AdmCfg;
use fpspin::ExecCtx;
use fpspin::api::DescStatus;
use fpspin::api::RAM_SEL_PKT;
use fpspin::capture::CaptureError;
use fpspin::capture::split_pcap;
use fpspin::engine::Ingress;
use fpspin::engine::IngressVerdict;
use fpspin::engine::buffer::AllocStatsSnap;
use fpspin::engine::her::Her;
use fpspin::engine::ingress::IngressStatsSnap;
use fpspin::engine::sim::SimDma;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad config file: {0}")]
    Config(#[from] toml::de::Error),

    #[error("bad capture: {0}")]
    Pcap(#[from] CaptureError),

    #[error("encoding failed: {0}")]
    Encode(#[from] postcard::Error),

    #[error(transparent)]
    Engine(#[from] fpspin::api::Error),
}

/// Read every packet of an Ethernet pcap file, in capture order.
pub fn read_pcap(path: &Path) -> Result<Vec<Vec<u8>>, Error> {
    Ok(split_pcap(&std::fs::read(path)?)?)
}

/// How [`simulate()`] delivers transfer completions.
#[derive(Clone, Copy, Debug)]
pub struct SimOpts {
    /// Packets submitted between completion polls.
    pub batch: usize,
    /// Deliver each batch of completions newest first.
    pub reverse: bool,
}

impl Default for SimOpts {
    fn default() -> Self {
        Self { batch: 1, reverse: false }
    }
}

#[derive(Debug)]
pub struct SimReport {
    pub verdicts: Vec<IngressVerdict>,
    pub hers: Vec<Her>,
    pub stats: IngressStatsSnap,
    pub alloc: AllocStatsSnap,
}

/// Run `pkts` through an ingress pipeline built from `cfg` over
/// simulated memory. Each HER is consumed as soon as it is emitted,
/// freeing its buffer.
pub fn simulate(
    cfg: &AdmCfg,
    pkts: &[Vec<u8>],
    ectx: ExecCtx,
    opts: SimOpts,
) -> Result<SimReport, Error> {
    let sim = Arc::new(SimDma::new(&[(
        RAM_SEL_PKT,
        cfg.ingress.buffer.size as usize,
    )]));
    let ing = Ingress::new(cfg.ingress, ectx, sim.clone())?;
    ing.load_table(cfg.table()?)?;
    for c in &cfg.contexts {
        ing.load_ctx(c.id, c.ctx)?;
    }

    let mut verdicts = Vec::with_capacity(pkts.len());
    let mut hers = Vec::new();
    let batch = opts.batch.max(1);

    let drain = |hers: &mut Vec<Her>| -> Result<(), Error> {
        let statuses: Vec<DescStatus> = if opts.reverse {
            sim.poll_all_reversed()
        } else {
            sim.poll_all()
        };

        for st in statuses {
            let her = ing.complete(st)?;
            ing.free(her.addr, her.buf_size)?;
            hers.push(her);
        }
        Ok(())
    };

    for (i, pkt) in pkts.iter().enumerate() {
        verdicts.push(ing.process(pkt)?);
        if (i + 1) % batch == 0 {
            drain(&mut hers)?;
        }
    }
    drain(&mut hers)?;

    Ok(SimReport {
        verdicts,
        hers,
        stats: ing.stats(),
        alloc: ing.alloc_stats(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use fpspin::provider::NullLog;
    use fpspin_test_utils::SAMPLE_PKTS;
    use fpspin_test_utils::SAMPLE_SSH_IN;
    use fpspin_test_utils::sample_capture;
    use fpspin_test_utils::sample_pcap;

    const SSH_CFG: &str = r#"
        [ingress]
        num_contexts = 4

        [[ruleset]]
        preset = "tcp-dport"
        port = 22

        [[context]]
        id = 0
        handler_mem = { addr = 0x10000, size = 0x10000 }
        host_mem = { addr = 0x80000000, size = 0x100000 }
        hh = { addr = 0x10000, size = 0x400 }
        ph = { addr = 0x10400, size = 0x800 }
        th = { addr = 0x10c00, size = 0x400 }
        scratchpad = [
            { addr = 0x110000, size = 0x1000 },
            { addr = 0x111000, size = 0x1000 },
            { addr = 0x112000, size = 0x1000 },
            { addr = 0x113000, size = 0x1000 },
        ]
    "#;

    #[test]
    fn pcap_file() {
        let path = std::env::temp_dir()
            .join(format!("fpspinadm-{}.pcap", std::process::id()));
        std::fs::write(&path, sample_pcap()).unwrap();
        let pkts = read_pcap(&path);
        std::fs::write(&path, [0u8; 10]).unwrap();
        let bad = read_pcap(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(pkts.unwrap(), sample_capture());
        assert!(matches!(bad, Err(Error::Pcap(CaptureError::Header(_)))));
        assert!(matches!(
            read_pcap(Path::new("/nonexistent/fpspinadm.pcap")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn simulate_sample() {
        let cfg = AdmCfg::from_toml(SSH_CFG).unwrap();
        let ectx = ExecCtx { log: Box::new(NullLog) };
        let opts = SimOpts { batch: 8, reverse: true };
        let r = simulate(&cfg, &sample_capture(), ectx, opts).unwrap();

        assert_eq!(r.verdicts.len(), SAMPLE_PKTS);
        assert_eq!(r.hers.len(), SAMPLE_SSH_IN);
        assert!(r.hers.iter().all(|h| h.ctx_id == 0));
        assert_eq!(r.stats.her_emitted, SAMPLE_SSH_IN as u64);
        assert_eq!(r.alloc.allocs, r.alloc.frees);
        assert_eq!(r.alloc.bytes_in_use, 0);

        // Message ids count up in submission order.
        let mut ids: Vec<u64> = r.hers.iter().map(|h| h.msgid).collect();
        ids.sort();
        assert_eq!(ids, (0..SAMPLE_SSH_IN as u64).collect::<Vec<_>>());
    }

    #[test]
    fn simulate_without_context() {
        let cfg = AdmCfg::from_toml(
            r#"
            [[ruleset]]
            preset = "match-all"
            "#,
        )
        .unwrap();
        let ectx = ExecCtx { log: Box::new(NullLog) };
        let err = simulate(&cfg, &sample_capture(), ectx, SimOpts::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(fpspin::api::Error::ContextNotEnabled(0))
        ));
    }
}
