// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The `fpspinadm` configuration file.
//!
//! ```toml
//! [ingress]
//! num_contexts = 4
//! matcher = { width = 32, entries = 4, rulesets = 4 }
//!
//! [[ruleset]]
//! preset = "tcp-dport"
//! port = 22
//!
//! [[ruleset]]
//! mode = "and"
//! rules = [
//!     { idx = 3, mask = 0xffff0000, start = 0x08000000, end = 0x08000000 },
//!     { idx = 5, mask = 0xff, start = 17, end = 17 },
//! ]
//!
//! [[context]]
//! id = 0
//! handler_mem = { addr = 0x10000, size = 0x10000 }
//! # ...
//! ```
//!
//! Rulesets fill table slots in order; slots without a `[[ruleset]]`
//! are bypass. A ruleset without an `eom` rule never reports EOM.

use crate::Error;
use fpspin::api::Error as ApiError;
use fpspin::api::ExecutionContext;
use fpspin::api::MatchMode;
use fpspin::api::MatchRule;
use fpspin::api::RuleSet;
use fpspin::cfg::IngressCfg;
use fpspin::engine::RuleTable;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdmCfg {
    #[serde(default)]
    pub ingress: IngressCfg,
    #[serde(default, rename = "ruleset")]
    pub rulesets: Vec<RuleSetSpec>,
    #[serde(default, rename = "context")]
    pub contexts: Vec<ContextSpec>,
}

/// A match mode, by name or by number.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ModeSpec {
    Num(u8),
    Name(String),
}

impl TryFrom<&ModeSpec> for MatchMode {
    type Error = ApiError;

    fn try_from(spec: &ModeSpec) -> Result<Self, Self::Error> {
        match spec {
            ModeSpec::Num(n) => MatchMode::try_from(*n),
            ModeSpec::Name(s) => MatchMode::from_str(s),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    Bypass,
    MatchAll,
    Udp,
    TcpDport,
    TcpOrUdp,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RuleSetSpec {
    Preset {
        preset: Preset,
        port: Option<u16>,
        #[serde(default)]
        eom: bool,
    },

    Rules {
        mode: ModeSpec,
        #[serde(default)]
        rules: Vec<MatchRule>,
        eom: Option<MatchRule>,
    },
}

impl RuleSetSpec {
    /// Build the ruleset for a table with `entries` rules per set.
    pub fn build(&self, entries: usize) -> Result<RuleSet, ApiError> {
        match self {
            Self::Preset { preset, port, eom } => match preset {
                Preset::Bypass => RuleSet::bypass(entries),
                Preset::MatchAll => RuleSet::match_all(entries, *eom),
                Preset::Udp => RuleSet::udp(entries),
                Preset::TcpOrUdp => RuleSet::tcp_or_udp(entries),
                Preset::TcpDport => {
                    let port = port.ok_or_else(|| {
                        ApiError::InvalidConfig(
                            "tcp-dport preset needs a port".into(),
                        )
                    })?;
                    RuleSet::tcp_dport(entries, port)
                }
            },

            Self::Rules { mode, rules, eom } => RuleSet::with_rules(
                MatchMode::try_from(mode)?,
                rules,
                eom.unwrap_or(MatchRule::FALSE),
                entries,
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ContextSpec {
    pub id: u8,
    #[serde(flatten)]
    pub ctx: ExecutionContext,
}

impl AdmCfg {
    pub fn from_toml(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Program a rule table from the `[[ruleset]]` entries.
    pub fn table(&self) -> Result<RuleTable, ApiError> {
        let entries = self.ingress.matcher.entries;
        let rulesets = self
            .rulesets
            .iter()
            .map(|rs| rs.build(entries))
            .collect::<Result<Vec<_>, _>>()?;
        RuleTable::program(self.ingress.matcher, rulesets)
    }
}
