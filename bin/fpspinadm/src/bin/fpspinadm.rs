// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use slog::info;
use tabwriter::TabWriter;

use fpspin::ExecCtx;
use fpspin::api::API_VERSION;
use fpspin::engine::IngressVerdict;
use fpspin::engine::RuleTable;
use fpspin::print::print_contexts_into;
use fpspin::print::print_her;
use fpspin::print::print_her_header;
use fpspin::print::print_rule_table;
use fpspin::print::print_stats_into;
use fpspin::print::write_hr;
use fpspinadm::SimOpts;
use fpspinadm::config::AdmCfg;
use fpspinadm::log::SlogLog;
use fpspinadm::log::logger;

/// Inspect and exercise fpspin ingress rule tables.
#[derive(Debug, Parser)]
#[command(version=fpspin_pkg_version())]
enum Command {
    /// Dump the rule table and contexts described by a config file.
    DumpRules { config: PathBuf },

    /// Classify every packet of a capture.
    Classify {
        config: PathBuf,
        pcap: PathBuf,

        /// Print the result for each packet.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Write the rule table of a config file in its binary form.
    EncodeRules {
        config: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Dump a rule table written by `encode-rules`.
    DecodeRules { file: PathBuf },

    /// Run a capture through the full ingress pipeline over simulated
    /// memory, printing each HER and the final counters.
    Simulate {
        config: PathBuf,
        pcap: PathBuf,

        /// Packets submitted between completion polls.
        #[arg(long, default_value_t = 1)]
        batch: usize,

        /// Deliver each batch of completions newest first.
        #[arg(long)]
        reverse: bool,

        /// Print counters as JSON.
        #[arg(long)]
        json: bool,

        /// Also write the HERs, postcard encoded, to this file.
        #[arg(long)]
        save_hers: Option<PathBuf>,
    },
}

fn fpspin_pkg_version() -> String {
    format!("{} (API {API_VERSION})", env!("CARGO_PKG_VERSION"))
}

fn dump_table(table: &RuleTable) -> anyhow::Result<()> {
    print_rule_table(table)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let log = logger();
    let cmd = Command::parse();

    match cmd {
        Command::DumpRules { config } => {
            let cfg = AdmCfg::load(&config)?;
            dump_table(&cfg.table()?)?;
            let ctxs: Vec<_> =
                cfg.contexts.iter().map(|c| (c.id, c.ctx)).collect();
            println!();
            print_contexts_into(&mut std::io::stdout(), &ctxs)?;
        }

        Command::Classify { config, pcap, verbose } => {
            let cfg = AdmCfg::load(&config)?;
            let table = cfg.table()?;
            let pkts = fpspinadm::read_pcap(&pcap)?;
            let mut hits: BTreeMap<Option<u8>, usize> = BTreeMap::new();

            let mut t = TabWriter::new(std::io::stdout());
            if verbose {
                writeln!(t, "PKT\tLEN\tRULESET\tEOM")?;
                write_hr(&mut t)?;
            }
            for (i, pkt) in pkts.iter().enumerate() {
                let c = table.classify(pkt);
                *hits.entry(c.ruleset).or_default() += 1;
                if verbose {
                    let eom = if c.raw_eom() { "yes" } else { "no" };
                    let set = match c.ruleset {
                        Some(id) => id.to_string(),
                        None => "bypass".to_string(),
                    };
                    writeln!(t, "{i}\t{}\t{set}\t{eom}", pkt.len())?;
                }
            }
            if verbose {
                writeln!(t)?;
            }

            writeln!(t, "RULESET\tPACKETS")?;
            write_hr(&mut t)?;
            for (set, n) in hits {
                match set {
                    Some(id) => writeln!(t, "{id}\t{n}")?,
                    None => writeln!(t, "bypass\t{n}")?,
                }
            }
            t.flush()?;
        }

        Command::EncodeRules { config, out } => {
            let cfg = AdmCfg::load(&config)?;
            let bytes = cfg.table()?.encode()?;
            std::fs::write(&out, &bytes)?;
            info!(log, "wrote rule table";
                "path" => out.display().to_string(),
                "bytes" => bytes.len());
        }

        Command::DecodeRules { file } => {
            let table = RuleTable::decode(&std::fs::read(&file)?)?;
            dump_table(&table)?;
        }

        Command::Simulate { config, pcap, batch, reverse, json, save_hers } => {
            let cfg = AdmCfg::load(&config)?;
            let pkts = fpspinadm::read_pcap(&pcap)?;
            let ectx = ExecCtx { log: Box::new(SlogLog(log.clone())) };
            let opts = SimOpts { batch, reverse };
            let report = fpspinadm::simulate(&cfg, &pkts, ectx, opts)?;

            let bypass = report
                .verdicts
                .iter()
                .filter(|v| **v == IngressVerdict::Bypass)
                .count();
            info!(log, "simulation done";
                "packets" => pkts.len(),
                "bypass" => bypass,
                "hers" => report.hers.len());

            if let Some(path) = save_hers {
                let bytes = postcard::to_allocvec(&report.hers)
                    .map_err(fpspinadm::Error::from)?;
                std::fs::write(&path, bytes)?;
            }

            if json {
                let out = serde_json::json!({
                    "ingress": report.stats,
                    "alloc": report.alloc,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }

            let mut t = TabWriter::new(std::io::stdout());
            print_her_header(&mut t)?;
            write_hr(&mut t)?;
            for her in &report.hers {
                print_her(&mut t, her)?;
            }
            writeln!(t)?;
            t.flush()?;

            let mut out = std::io::stdout();
            print_stats_into(&mut out, "Ingress", &report.stats.pairs())?;
            println!();
            print_stats_into(&mut out, "Buffer", &report.alloc.pairs())?;
        }
    }

    Ok(())
}
