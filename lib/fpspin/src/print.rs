// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print engine state in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both fpspinadm and integration tests.

use crate::api::ExecutionContext;
use crate::api::MatchRule;
use crate::engine::her::Her;
use crate::engine::matcher::RuleTable;
use itertools::Itertools;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`RuleTable`].
pub fn print_rule_table(table: &RuleTable) -> std::io::Result<()> {
    print_rule_table_into(&mut std::io::stdout(), table)
}

/// Print a [`RuleTable`], one line per rule. The EOM rule of each
/// ruleset is flagged.
pub fn print_rule_table_into(
    writer: &mut impl Write,
    table: &RuleTable,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    let cfg = table.cfg();

    writeln!(
        t,
        "Rule Table ({} rulesets x {} rules, {}-bit words, window {})",
        cfg.rulesets, cfg.entries, cfg.width, cfg.matcher_len
    )?;
    write_hrb(&mut t)?;
    writeln!(t, "SET\tMODE\tRULE\tWORD\tMASK\tRANGE\tEOM")?;
    write_hr(&mut t)?;

    for (id, rs) in table.rulesets().iter().enumerate() {
        if rs.is_bypass() {
            writeln!(t, "{id}\t{}\t--\t--\t--\tbypass\t", rs.mode)?;
            continue;
        }

        let last = rs.rules().len() - 1;
        for (i, rule) in rs.rules().iter().enumerate() {
            let set = if i == 0 { id.to_string() } else { String::new() };
            let mode =
                if i == 0 { rs.mode.to_string() } else { String::new() };
            print_rule(&mut t, &set, &mode, i, rule, i == last)?;
        }
    }

    t.flush()
}

fn print_rule(
    t: &mut impl Write,
    set: &str,
    mode: &str,
    idx: usize,
    rule: &MatchRule,
    eom: bool,
) -> std::io::Result<()> {
    let eom = if eom { "*" } else { "" };
    if *rule == MatchRule::EMPTY {
        writeln!(t, "{set}\t{mode}\t{idx}\t--\t--\talways\t{eom}")
    } else if *rule == MatchRule::FALSE {
        writeln!(t, "{set}\t{mode}\t{idx}\t--\t--\tnever\t{eom}")
    } else {
        writeln!(
            t,
            "{set}\t{mode}\t{idx}\t{}\t{:#x}\t[{:#x}, {:#x}]\t{eom}",
            rule.idx, rule.mask, rule.start, rule.end
        )
    }
}

/// Print the installed execution contexts.
pub fn print_contexts_into(
    writer: &mut impl Write,
    ctxs: &[(u8, ExecutionContext)],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "CTX\tHANDLER\tHOST\tHH\tPH\tTH\tSCRATCHPAD")?;
    write_hr(&mut t)?;
    for (id, ctx) in ctxs {
        writeln!(
            t,
            "{id}\t{}\t{}\t{}\t{}\t{}\t{}",
            ctx.handler_mem,
            ctx.host_mem,
            ctx.hh,
            ctx.ph,
            ctx.th,
            ctx.scratchpad.iter().join(" "),
        )?;
    }
    t.flush()
}

/// Print the header for the [`print_her()`] output.
pub fn print_her_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "CTX\tMSGID\tEOM\tADDR\tXFER\tBUF\tTAG")
}

/// Print a [`Her`].
pub fn print_her(t: &mut impl Write, her: &Her) -> std::io::Result<()> {
    writeln!(
        t,
        "{}\t{}\t{}\t{:#x}\t{}\t{}\t{:#x}",
        her.ctx_id,
        her.msgid,
        if her.eom { "yes" } else { "no" },
        her.addr,
        her.xfer_size,
        her.buf_size,
        her.tag
    )
}

/// Print counter name/value pairs, as produced by a stats
/// snapshot's `pairs()`.
pub fn print_stats_into(
    writer: &mut impl Write,
    title: &str,
    pairs: &[(&str, u64)],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "{title}")?;
    write_hr(&mut t)?;
    for (name, val) in pairs {
        writeln!(t, "{name}\t{val}")?;
    }
    t.flush()
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
