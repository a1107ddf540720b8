// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Workloads shared by the benchmarks.

use fpspin::api::MatcherCfg;
use fpspin::api::RuleSet;
use fpspin::engine::RuleTable;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Named rule tables to classify against.
pub fn tables() -> Vec<(&'static str, RuleTable)> {
    let cfg = MatcherCfg::default();
    let program = |sets: Vec<RuleSet>| {
        RuleTable::program(cfg, sets).expect("valid bench table")
    };
    let e = cfg.entries;

    vec![
        ("bypass", program(vec![])),
        ("ssh", program(vec![RuleSet::tcp_dport(e, 22).unwrap()])),
        (
            // Most packets walk all four rulesets.
            "deep",
            program(vec![
                RuleSet::tcp_dport(e, 443).unwrap(),
                RuleSet::tcp_dport(e, 80).unwrap(),
                RuleSet::udp(e).unwrap(),
                RuleSet::tcp_dport(e, 22).unwrap(),
            ]),
        ),
    ]
}

/// Packet sizes between 60 and 1518 bytes, reproducible for a seed.
pub fn pkt_sizes(seed: u64, n: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.random_range(60..=1518)).collect()
}
