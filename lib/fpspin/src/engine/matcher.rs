// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The ruleset classifier.

use crate::api::API_VERSION;
use crate::api::Error;
use crate::api::MatcherCfg;
use crate::api::RuleSet;
use crate::ddi::sync::KRwLock;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The result of classifying one packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Classification {
    /// The lowest-indexed matching ruleset.
    pub ruleset: Option<u8>,
    raw_eom: bool,
}

impl Classification {
    pub fn is_bypass(&self) -> bool {
        self.ruleset.is_none()
    }

    /// The EOM flag of the matching ruleset, if any ruleset matched.
    pub fn eom(&self) -> Option<bool> {
        self.ruleset.map(|_| self.raw_eom)
    }

    /// The EOM flag as the hardware reports it. On bypass this is the
    /// EOM rule of the last ruleset evaluated and carries no meaning.
    pub fn raw_eom(&self) -> bool {
        self.raw_eom
    }
}

impl Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ruleset {
            Some(id) => {
                let eom = if self.raw_eom { " eom" } else { "" };
                write!(f, "ruleset {id}{eom}")
            }
            None => write!(f, "bypass"),
        }
    }
}

/// A full set of rulesets, one per slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleTable {
    cfg: MatcherCfg,
    rulesets: Vec<RuleSet>,
}

#[derive(Deserialize, Serialize)]
struct EncodedTable {
    version: u64,
    cfg: MatcherCfg,
    rulesets: Vec<RuleSet>,
}

impl RuleTable {
    /// A table in which every slot bypasses.
    pub fn new(cfg: MatcherCfg) -> Result<Self, Error> {
        Self::program(cfg, Vec::new())
    }

    /// Install `rulesets` into the leading slots; the remaining slots
    /// bypass.
    pub fn program(
        cfg: MatcherCfg,
        mut rulesets: Vec<RuleSet>,
    ) -> Result<Self, Error> {
        cfg.validate()?;

        if rulesets.len() > cfg.rulesets {
            return Err(Error::InvalidConfig(format!(
                "{} rulesets do not fit in {} slots",
                rulesets.len(),
                cfg.rulesets
            )));
        }

        for rs in &rulesets {
            rs.validate(&cfg)?;
        }

        let bypass = RuleSet::bypass(cfg.entries)?;
        rulesets.resize(cfg.rulesets, bypass);
        Ok(Self { cfg, rulesets })
    }

    /// Replace one slot.
    pub fn set(&mut self, id: u8, rs: RuleSet) -> Result<(), Error> {
        rs.validate(&self.cfg)?;
        let slot = self.slot_mut(id)?;
        *slot = rs;
        Ok(())
    }

    /// Replace one slot with the bypass ruleset.
    pub fn unload(&mut self, id: u8) -> Result<(), Error> {
        let bypass = RuleSet::bypass(self.cfg.entries)?;
        let slot = self.slot_mut(id)?;
        *slot = bypass;
        Ok(())
    }

    fn slot_mut(&mut self, id: u8) -> Result<&mut RuleSet, Error> {
        let n = self.rulesets.len();
        self.rulesets.get_mut(usize::from(id)).ok_or_else(|| {
            Error::InvalidConfig(format!("no ruleset slot {id} of {n}"))
        })
    }

    pub fn cfg(&self) -> &MatcherCfg {
        &self.cfg
    }

    pub fn rulesets(&self) -> &[RuleSet] {
        &self.rulesets
    }

    pub fn get(&self, id: u8) -> Option<&RuleSet> {
        self.rulesets.get(usize::from(id))
    }

    /// Classify `pkt`. Only the first `matcher_len` bytes are visible.
    pub fn classify(&self, pkt: &[u8]) -> Classification {
        let window = &pkt[..pkt.len().min(self.cfg.matcher_len)];
        let mut raw_eom = false;

        for (id, rs) in self.rulesets.iter().enumerate() {
            let res = rs.eval(window, self.cfg.width);
            if res.matched {
                return Classification {
                    ruleset: Some(id as u8),
                    raw_eom: res.eom,
                };
            }
            raw_eom = res.eom;
        }

        Classification { ruleset: None, raw_eom }
    }

    /// Serialize for persisting.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let enc = EncodedTable {
            version: API_VERSION,
            cfg: self.cfg,
            rulesets: self.rulesets.clone(),
        };

        postcard::to_allocvec(&enc).map_err(|e| {
            Error::InvalidConfig(format!("failed to encode rule table: {e}"))
        })
    }

    /// Deserialize and validate a persisted table.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let enc: EncodedTable = postcard::from_bytes(bytes).map_err(|e| {
            Error::InvalidConfig(format!("failed to decode rule table: {e}"))
        })?;

        if enc.version != API_VERSION {
            return Err(Error::InvalidConfig(format!(
                "rule table version {} is not {API_VERSION}",
                enc.version
            )));
        }

        if enc.rulesets.len() != enc.cfg.rulesets {
            return Err(Error::InvalidConfig(format!(
                "rule table has {} rulesets, expected {}",
                enc.rulesets.len(),
                enc.cfg.rulesets
            )));
        }

        Self::program(enc.cfg, enc.rulesets)
    }
}

/// The classifier as seen by the pipeline: a rule table that can be
/// swapped out whole.
pub struct Matcher {
    cfg: MatcherCfg,
    table: KRwLock<RuleTable>,
}

impl Matcher {
    pub fn new(cfg: MatcherCfg) -> Result<Self, Error> {
        Ok(Self { cfg, table: KRwLock::new(RuleTable::new(cfg)?) })
    }

    /// Replace the current table. A classification in progress
    /// finishes against the old table; every later one sees the new
    /// one.
    pub fn load_table(&self, table: RuleTable) -> Result<(), Error> {
        if table.cfg != self.cfg {
            return Err(Error::InvalidConfig(format!(
                "rule table shape {:?} does not match matcher {:?}",
                table.cfg, self.cfg
            )));
        }

        *self.table.write() = table;
        Ok(())
    }

    pub fn unload(&self, id: u8) -> Result<(), Error> {
        self.table.write().unload(id)
    }

    pub fn classify(&self, pkt: &[u8]) -> Classification {
        self.table.read().classify(pkt)
    }

    pub fn cfg(&self) -> &MatcherCfg {
        &self.cfg
    }

    /// A copy of the current table.
    pub fn table(&self) -> RuleTable {
        self.table.read().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::MatchMode;
    use crate::api::MatchRule;

    fn cfg() -> MatcherCfg {
        MatcherCfg::default()
    }

    fn ipv4_tcp(dport: u16, flags: u8) -> Vec<u8> {
        let mut pkt = vec![0u8; 60];
        pkt[12] = 0x08;
        pkt[14] = 0x45;
        pkt[23] = 6;
        pkt[36..38].copy_from_slice(&dport.to_be_bytes());
        pkt[47] = flags;
        pkt
    }

    #[test]
    fn all_bypass_matches_nothing() {
        let table = RuleTable::new(cfg()).unwrap();
        for pkt in [vec![], vec![0xff; 64], ipv4_tcp(22, 0x10)] {
            let c = table.classify(&pkt);
            assert!(c.is_bypass());
            assert_eq!(c.eom(), None);
        }
    }

    #[test]
    fn all_match_hits_ruleset_zero() {
        let rs = vec![RuleSet::match_all(4, true).unwrap(); 4];
        let table = RuleTable::program(cfg(), rs).unwrap();
        for pkt in [vec![], vec![0xff; 64], ipv4_tcp(22, 0x10)] {
            let c = table.classify(&pkt);
            assert_eq!(c.ruleset, Some(0));
            assert_eq!(c.eom(), Some(true));
        }
    }

    #[test]
    fn lowest_index_wins() {
        let table = RuleTable::program(
            cfg(),
            vec![
                RuleSet::udp(4).unwrap(),
                RuleSet::tcp_dport(4, 22).unwrap(),
                RuleSet::tcp_or_udp(4).unwrap(),
            ],
        )
        .unwrap();

        let c = table.classify(&ipv4_tcp(22, 0x10));
        assert_eq!(c.ruleset, Some(1));
        assert_eq!(c.eom(), Some(true));

        let c = table.classify(&ipv4_tcp(22, 0x02));
        assert_eq!(c.ruleset, Some(1));
        assert_eq!(c.eom(), Some(false));

        let c = table.classify(&ipv4_tcp(80, 0x10));
        assert_eq!(c.ruleset, Some(2));
        assert_eq!(c.eom(), Some(false));
    }

    #[test]
    fn bypass_eom_is_from_last_ruleset() {
        // Last slot never matches but its EOM rule always fires.
        let last = RuleSet::with_rules(
            MatchMode::Or,
            &[],
            MatchRule::EMPTY,
            4,
        )
        .unwrap();
        let mut rs = vec![RuleSet::bypass(4).unwrap(); 3];
        rs.push(last);
        let table = RuleTable::program(cfg(), rs).unwrap();
        let c = table.classify(&[0u8; 64]);
        assert_eq!(c.ruleset, None);
        assert!(c.raw_eom());
        assert_eq!(c.eom(), None);
    }

    #[test]
    fn matcher_window_hides_tail() {
        let short = MatcherCfg { matcher_len: 40, ..cfg() };
        let table = RuleTable::program(
            short,
            vec![RuleSet::tcp_dport(4, 22).unwrap()],
        )
        .unwrap();

        // The port (bytes 36..38) is visible but the ACK flag (byte
        // 47) is not.
        let c = table.classify(&ipv4_tcp(22, 0x10));
        assert_eq!(c.ruleset, Some(0));
        assert_eq!(c.eom(), Some(false));

        let tiny = MatcherCfg { matcher_len: 30, ..cfg() };
        let table = RuleTable::program(
            tiny,
            vec![RuleSet::tcp_dport(4, 22).unwrap()],
        )
        .unwrap();
        assert!(table.classify(&ipv4_tcp(22, 0x10)).is_bypass());
    }

    #[test]
    fn program_limits() {
        let five = vec![RuleSet::udp(4).unwrap(); 5];
        assert!(matches!(
            RuleTable::program(cfg(), five),
            Err(Error::InvalidConfig(_))
        ));

        let wide = RuleSet::new(MatchMode::And, vec![MatchRule::EMPTY; 5], 5)
            .unwrap();
        assert!(RuleTable::program(cfg(), vec![wide]).is_err());
    }

    #[test]
    fn unload_restores_bypass() {
        let mut table = RuleTable::program(
            cfg(),
            vec![RuleSet::match_all(4, false).unwrap()],
        )
        .unwrap();
        assert_eq!(table.classify(&[]).ruleset, Some(0));
        table.unload(0).unwrap();
        assert!(table.classify(&[]).is_bypass());
        assert!(table.get(0).unwrap().is_bypass());
        assert!(table.unload(4).is_err());
    }

    #[test]
    fn encode_decode() {
        let table = RuleTable::program(
            cfg(),
            vec![
                RuleSet::tcp_dport(4, 22).unwrap(),
                RuleSet::tcp_or_udp(4).unwrap(),
            ],
        )
        .unwrap();
        let bytes = table.encode().unwrap();
        assert_eq!(RuleTable::decode(&bytes).unwrap(), table);

        assert!(RuleTable::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(RuleTable::decode(&[]).is_err());
    }

    #[test]
    fn decode_rejects_bad_mode() {
        let table = RuleTable::program(
            cfg(),
            vec![RuleSet::match_all(4, true).unwrap()],
        )
        .unwrap();
        let mut bytes = table.encode().unwrap();

        // The first ruleset's mode byte follows the version and the
        // matcher shape, and sits just before its rule count of 4.
        let enc: EncodedTable = postcard::from_bytes(&bytes).unwrap();
        let prefix = postcard::to_allocvec(&(
            enc.version,
            enc.cfg,
            enc.rulesets.len(),
        ))
        .unwrap();
        assert_eq!(bytes[prefix.len()], 0);
        bytes[prefix.len()] = 7;
        assert!(matches!(
            RuleTable::decode(&bytes),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn matcher_swaps_table() {
        let m = Matcher::new(cfg()).unwrap();
        let pkt = ipv4_tcp(22, 0x10);
        assert!(m.classify(&pkt).is_bypass());

        let table = RuleTable::program(
            cfg(),
            vec![RuleSet::tcp_dport(4, 22).unwrap()],
        )
        .unwrap();
        m.load_table(table).unwrap();
        assert_eq!(m.classify(&pkt).ruleset, Some(0));

        let other =
            RuleTable::new(MatcherCfg { entries: 3, ..cfg() }).unwrap();
        assert!(m.load_table(other).is_err());
        assert_eq!(m.classify(&pkt).ruleset, Some(0));

        m.unload(0).unwrap();
        assert!(m.classify(&pkt).is_bypass());
    }
}
