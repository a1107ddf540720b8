// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Match rules and rulesets.
//!
//! A [`MatchRule`] compares one fixed-width, big-endian word of the
//! packet against an inclusive range after masking. A [`RuleSet`] folds
//! a fixed number of rules with a [`MatchMode`]; its final slot is not
//! part of the fold and instead decides the end-of-message flag.
//!
//! The presets in this module describe word offsets for an untagged
//! Ethernet + IPv4 frame read with 32-bit words.

use super::error::Error;
use super::error::Result;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub const ETHER_TYPE_IPV4: u64 = 0x0800;
pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;
pub const TCP_FLAG_ACK: u64 = 0x10;

/// Read the `idx`th word of `width` bits from `pkt`, big-endian.
///
/// Bytes past the end of `pkt` read as zero.
pub fn field_word(pkt: &[u8], idx: u32, width: u8) -> u64 {
    let nbytes = usize::from(width / 8);
    let off = (idx as usize).saturating_mul(nbytes);
    let mut word = 0u64;

    for i in 0..nbytes {
        let b = off
            .checked_add(i)
            .and_then(|pos| pkt.get(pos))
            .copied()
            .unwrap_or(0);
        word = (word << 8) | u64::from(b);
    }

    word
}

/// Compare one packet word against a masked, inclusive range.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MatchRule {
    /// Word index into the packet.
    pub idx: u32,
    pub mask: u64,
    pub start: u64,
    pub end: u64,
}

impl MatchRule {
    /// Always true: the masked word is always zero.
    pub const EMPTY: Self = Self::new(0, 0, 0, 0);

    /// Always false: the range is empty.
    pub const FALSE: Self = Self::new(0, 0, 1, 0);

    pub const fn new(idx: u32, mask: u64, start: u64, end: u64) -> Self {
        Self { idx, mask, start, end }
    }

    /// Match an exact masked value.
    pub const fn exact(idx: u32, mask: u64, val: u64) -> Self {
        Self::new(idx, mask, val, val)
    }

    pub fn is_match(&self, word: u64) -> bool {
        let val = word & self.mask;
        self.start <= val && val <= self.end
    }

    /// Evaluate this rule against `pkt` read as `width`-bit words.
    pub fn eval(&self, pkt: &[u8], width: u8) -> bool {
        self.is_match(field_word(pkt, self.idx, width))
    }

    /// Do the mask and range fit in a word of `width` bits?
    pub fn fits(&self, width: u8) -> bool {
        let max = word_max(width);
        self.mask <= max && self.start <= max && self.end <= max
    }

    /// EtherType is IPv4.
    pub const fn ip() -> Self {
        Self::exact(3, 0xffff_0000, ETHER_TYPE_IPV4 << 16)
    }

    /// IPv4 protocol number.
    pub const fn ip_proto(proto: u8) -> Self {
        Self::exact(5, 0xff, proto as u64)
    }

    /// TCP destination port.
    pub const fn tcp_dport(port: u16) -> Self {
        Self::exact(9, 0xffff_0000, (port as u64) << 16)
    }

    /// UDP destination port. Lands in the same word as the TCP one.
    pub const fn udp_dport(port: u16) -> Self {
        Self::tcp_dport(port)
    }

    /// TCP ACK flag set.
    pub const fn tcp_ack() -> Self {
        Self::exact(11, TCP_FLAG_ACK, TCP_FLAG_ACK)
    }
}

impl Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if *self == Self::EMPTY {
            write!(f, "*")
        } else if self.start > self.end {
            write!(f, "!")
        } else {
            write!(
                f,
                "w{}&{:#x} in [{:#x}, {:#x}]",
                self.idx, self.mask, self.start, self.end
            )
        }
    }
}

fn word_max(width: u8) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

/// How the match rules of a ruleset are folded.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MatchMode {
    And = 0,
    Or = 1,
}

impl MatchMode {
    /// The rule which leaves the fold unchanged.
    pub const fn identity(&self) -> MatchRule {
        match self {
            Self::And => MatchRule::EMPTY,
            Self::Or => MatchRule::FALSE,
        }
    }
}

impl TryFrom<u8> for MatchMode {
    type Error = Error;

    fn try_from(val: u8) -> Result<Self> {
        match val {
            0 => Ok(Self::And),
            1 => Ok(Self::Or),
            _ => Err(Error::InvalidConfig(format!("bad match mode: {val}"))),
        }
    }
}

impl From<MatchMode> for u8 {
    fn from(mode: MatchMode) -> u8 {
        mode as u8
    }
}

impl FromStr for MatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "and" | "0" => Ok(Self::And),
            "or" | "1" => Ok(Self::Or),
            _ => Err(Error::InvalidConfig(format!("bad match mode: {s}"))),
        }
    }
}

impl Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::And => "AND",
            Self::Or => "OR",
        };
        write!(f, "{s}")
    }
}

/// Shape of the classifier.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct MatcherCfg {
    /// Word width in bits.
    pub width: u8,
    /// Rules per ruleset, including the EOM slot.
    pub entries: usize,
    /// Number of ruleset slots.
    pub rulesets: usize,
    /// Number of leading packet bytes visible to the rules.
    pub matcher_len: usize,
}

impl Default for MatcherCfg {
    fn default() -> Self {
        Self {
            width: super::DEF_MATCH_WIDTH,
            entries: super::DEF_MATCH_ENTRIES,
            rulesets: super::DEF_RULESETS,
            matcher_len: super::DEF_MATCHER_LEN,
        }
    }
}

impl MatcherCfg {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.width, 8 | 16 | 32 | 64) {
            return Err(Error::InvalidConfig(format!(
                "match width must be 8, 16, 32 or 64: {}",
                self.width
            )));
        }

        if self.entries < 2 {
            return Err(Error::InvalidConfig(format!(
                "a ruleset needs at least one match rule and an EOM rule: \
                 entries = {}",
                self.entries
            )));
        }

        if self.rulesets == 0 || self.rulesets > usize::from(u8::MAX) + 1 {
            return Err(Error::InvalidConfig(format!(
                "ruleset count out of range: {}",
                self.rulesets
            )));
        }

        if self.matcher_len == 0 {
            return Err(Error::InvalidConfig("matcher_len is zero".to_string()));
        }

        Ok(())
    }
}

/// The outcome of evaluating one ruleset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RuleSetEval {
    pub matched: bool,
    pub eom: bool,
}

/// A fixed-size group of match rules plus a trailing EOM rule.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RuleSet {
    pub mode: MatchMode,
    rules: Vec<MatchRule>,
}

impl RuleSet {
    /// Build a ruleset from exactly `entries` rules, the last one being
    /// the EOM rule.
    pub fn new(
        mode: MatchMode,
        rules: Vec<MatchRule>,
        entries: usize,
    ) -> Result<Self> {
        if entries < 2 || rules.len() != entries {
            return Err(Error::InvalidConfig(format!(
                "ruleset needs exactly {entries} rules, got {}",
                rules.len()
            )));
        }

        Ok(Self { mode, rules })
    }

    /// Build a ruleset from fewer match rules than there are slots,
    /// filling the rest with the mode's identity rule.
    pub fn with_rules(
        mode: MatchMode,
        match_rules: &[MatchRule],
        eom: MatchRule,
        entries: usize,
    ) -> Result<Self> {
        let slots = entries.saturating_sub(1);
        if match_rules.len() > slots {
            return Err(Error::InvalidConfig(format!(
                "{} match rules do not fit in {slots} slots",
                match_rules.len()
            )));
        }

        let mut rules = Vec::with_capacity(entries);
        rules.extend_from_slice(match_rules);
        rules.resize(slots, mode.identity());
        rules.push(eom);
        Self::new(mode, rules, entries)
    }

    /// Matches nothing.
    pub fn bypass(entries: usize) -> Result<Self> {
        Self::with_rules(MatchMode::Or, &[], MatchRule::FALSE, entries)
    }

    /// Matches every packet.
    pub fn match_all(entries: usize, eom: bool) -> Result<Self> {
        let eom = if eom { MatchRule::EMPTY } else { MatchRule::FALSE };
        Self::with_rules(MatchMode::And, &[], eom, entries)
    }

    /// IPv4 UDP, never EOM.
    pub fn udp(entries: usize) -> Result<Self> {
        Self::with_rules(
            MatchMode::And,
            &[MatchRule::ip(), MatchRule::ip_proto(IP_PROTO_UDP)],
            MatchRule::FALSE,
            entries,
        )
    }

    /// IPv4 TCP to `port`, EOM when ACK is set.
    pub fn tcp_dport(entries: usize, port: u16) -> Result<Self> {
        Self::with_rules(
            MatchMode::And,
            &[
                MatchRule::ip(),
                MatchRule::ip_proto(IP_PROTO_TCP),
                MatchRule::tcp_dport(port),
            ],
            MatchRule::tcp_ack(),
            entries,
        )
    }

    /// TCP or UDP, never EOM.
    pub fn tcp_or_udp(entries: usize) -> Result<Self> {
        Self::with_rules(
            MatchMode::Or,
            &[
                MatchRule::ip_proto(IP_PROTO_TCP),
                MatchRule::ip_proto(IP_PROTO_UDP),
            ],
            MatchRule::FALSE,
            entries,
        )
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn match_rules(&self) -> &[MatchRule] {
        &self.rules[..self.rules.len().saturating_sub(1)]
    }

    pub fn eom_rule(&self) -> MatchRule {
        self.rules.last().copied().unwrap_or(MatchRule::FALSE)
    }

    /// Is every match rule the always-false rule?
    pub fn is_bypass(&self) -> bool {
        match self.mode {
            MatchMode::Or => {
                self.match_rules().iter().all(|r| *r == MatchRule::FALSE)
            }
            MatchMode::And => {
                self.match_rules().iter().any(|r| *r == MatchRule::FALSE)
            }
        }
    }

    pub fn eval(&self, pkt: &[u8], width: u8) -> RuleSetEval {
        let rules = self.match_rules().iter();
        let matched = match self.mode {
            MatchMode::And => {
                rules.fold(true, |acc, r| acc && r.eval(pkt, width))
            }
            MatchMode::Or => {
                rules.fold(false, |acc, r| acc || r.eval(pkt, width))
            }
        };

        RuleSetEval { matched, eom: self.eom_rule().eval(pkt, width) }
    }

    /// Check this ruleset against the matcher shape.
    pub fn validate(&self, cfg: &MatcherCfg) -> Result<()> {
        if self.rules.len() != cfg.entries {
            return Err(Error::InvalidConfig(format!(
                "ruleset needs exactly {} rules, got {}",
                cfg.entries,
                self.rules.len()
            )));
        }

        if let Some(r) = self.rules.iter().find(|r| !r.fits(cfg.width)) {
            return Err(Error::InvalidConfig(format!(
                "rule {r} does not fit in {} bits",
                cfg.width
            )));
        }

        Ok(())
    }
}

impl Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rules: Vec<String> =
            self.match_rules().iter().map(|r| r.to_string()).collect();
        write!(
            f,
            "{} [{}] eom: {}",
            self.mode,
            rules.join(", "),
            self.eom_rule()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tcp_syn_ack(dport: u16, flags: u8) -> Vec<u8> {
        let mut pkt = vec![0u8; 54];
        pkt[12] = 0x08;
        pkt[14] = 0x45;
        pkt[23] = IP_PROTO_TCP;
        pkt[36..38].copy_from_slice(&dport.to_be_bytes());
        pkt[47] = flags;
        pkt
    }

    #[test]
    fn field_word_is_big_endian() {
        let pkt = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        assert_eq!(field_word(&pkt, 0, 32), 0x0102_0304);
        assert_eq!(field_word(&pkt, 1, 16), 0x0304);
        assert_eq!(field_word(&pkt, 5, 8), 0x06);
        // Short reads are zero filled.
        assert_eq!(field_word(&pkt, 1, 32), 0x0506_0000);
        assert_eq!(field_word(&pkt, 9, 32), 0);
        assert_eq!(field_word(&pkt, u32::MAX, 64), 0);
    }

    #[test]
    fn degenerate_rules() {
        for word in [0, 1, 0xffff_ffff, u64::MAX] {
            assert!(MatchRule::EMPTY.is_match(word));
            assert!(!MatchRule::FALSE.is_match(word));
        }
    }

    #[test]
    fn range_is_inclusive() {
        let r = MatchRule::new(0, 0xff, 10, 20);
        assert!(!r.is_match(9));
        assert!(r.is_match(10));
        assert!(r.is_match(20));
        assert!(!r.is_match(21));
        // Mask applies before the compare.
        assert!(r.is_match(0xab0f));
    }

    #[test]
    fn mode_parse() {
        assert_eq!(MatchMode::try_from(0).unwrap(), MatchMode::And);
        assert_eq!(MatchMode::try_from(1).unwrap(), MatchMode::Or);
        assert!(matches!(
            MatchMode::try_from(2),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!("or".parse::<MatchMode>().unwrap(), MatchMode::Or);
        assert_eq!("AND".parse::<MatchMode>().unwrap(), MatchMode::And);
        assert!("xor".parse::<MatchMode>().is_err());
    }

    #[test]
    fn mode_serde_rejects_unknown() {
        let bytes = postcard::to_allocvec(&2u8).unwrap();
        assert!(postcard::from_bytes::<MatchMode>(&bytes).is_err());
        let bytes = postcard::to_allocvec(&MatchMode::Or).unwrap();
        assert_eq!(
            postcard::from_bytes::<MatchMode>(&bytes).unwrap(),
            MatchMode::Or
        );
    }

    #[test]
    fn ruleset_entry_count() {
        let e = RuleSet::new(MatchMode::And, vec![MatchRule::EMPTY; 3], 4);
        assert!(matches!(e, Err(Error::InvalidConfig(_))));

        let e = RuleSet::with_rules(
            MatchMode::And,
            &[MatchRule::EMPTY; 4],
            MatchRule::EMPTY,
            4,
        );
        assert!(matches!(e, Err(Error::InvalidConfig(_))));

        let rs = RuleSet::with_rules(
            MatchMode::Or,
            &[MatchRule::ip()],
            MatchRule::tcp_ack(),
            4,
        )
        .unwrap();
        assert_eq!(
            rs.rules(),
            &[
                MatchRule::ip(),
                MatchRule::FALSE,
                MatchRule::FALSE,
                MatchRule::tcp_ack()
            ]
        );
    }

    #[test]
    fn presets() {
        let ssh_ack = tcp_syn_ack(22, 0x10);
        let ssh_syn = tcp_syn_ack(22, 0x02);
        let http = tcp_syn_ack(80, 0x10);

        let rs = RuleSet::tcp_dport(4, 22).unwrap();
        assert_eq!(
            rs.eval(&ssh_ack, 32),
            RuleSetEval { matched: true, eom: true }
        );
        assert_eq!(
            rs.eval(&ssh_syn, 32),
            RuleSetEval { matched: true, eom: false }
        );
        assert!(!rs.eval(&http, 32).matched);

        assert!(RuleSet::tcp_or_udp(4).unwrap().eval(&http, 32).matched);
        assert!(!RuleSet::udp(4).unwrap().eval(&http, 32).matched);
        assert!(!RuleSet::bypass(4).unwrap().eval(&http, 32).matched);
        assert!(RuleSet::bypass(4).unwrap().is_bypass());

        let all = RuleSet::match_all(4, true).unwrap();
        assert_eq!(all.eval(&[], 32), RuleSetEval { matched: true, eom: true });
    }

    #[test]
    fn rule_width_check() {
        let cfg = MatcherCfg { width: 16, ..Default::default() };
        let rs = RuleSet::tcp_dport(4, 22).unwrap();
        assert!(rs.validate(&cfg).is_err());
        assert!(rs.validate(&MatcherCfg::default()).is_ok());
    }

    #[test]
    fn matcher_cfg_validate() {
        assert!(MatcherCfg::default().validate().is_ok());
        let bad = [
            MatcherCfg { width: 24, ..Default::default() },
            MatcherCfg { entries: 1, ..Default::default() },
            MatcherCfg { rulesets: 0, ..Default::default() },
            MatcherCfg { rulesets: 257, ..Default::default() },
            MatcherCfg { matcher_len: 0, ..Default::default() },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }
}
