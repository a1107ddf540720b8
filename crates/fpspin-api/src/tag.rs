// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Correlation tags.
//!
//! A tag is laid out, from the most significant bit down, as
//! `msgid | eom | ctx_id`:
//!
//! ```text
//!  msgid_bits + ctx_bits               ctx_bits         0
//! +------------------------------------+---+------------+
//! |              msgid                 |eom|   ctx_id   |
//! +------------------------------------+---+------------+
//! ```

use super::error::Error;
use super::error::Result;
use super::error::TagField;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The unpacked form of a tag.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TagFields {
    pub msgid: u64,
    pub eom: bool,
    pub ctx_id: u8,
}

impl Display for TagFields {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let eom = if self.eom { "*" } else { "" };
        write!(f, "{}/{}{eom}", self.ctx_id, self.msgid)
    }
}

/// Bit widths of the tag fields.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "RawTagLayout")]
pub struct TagLayout {
    msgid_bits: u8,
    ctx_bits: u8,
}

#[derive(Deserialize)]
struct RawTagLayout {
    msgid_bits: u8,
    ctx_bits: u8,
}

impl TryFrom<RawTagLayout> for TagLayout {
    type Error = Error;

    fn try_from(raw: RawTagLayout) -> Result<Self> {
        Self::new(raw.msgid_bits, raw.ctx_bits)
    }
}

impl Default for TagLayout {
    fn default() -> Self {
        Self { msgid_bits: 13, ctx_bits: 2 }
    }
}

fn bits_max(bits: u8) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

impl TagLayout {
    pub fn new(msgid_bits: u8, ctx_bits: u8) -> Result<Self> {
        let total = u32::from(msgid_bits) + u32::from(ctx_bits) + 1;
        if total > 64 {
            return Err(Error::InvalidConfig(format!(
                "tag layout needs {total} bits, only 64 available"
            )));
        }

        if ctx_bits > 8 {
            return Err(Error::InvalidConfig(format!(
                "ctx_bits must be at most 8: {ctx_bits}"
            )));
        }

        Ok(Self { msgid_bits, ctx_bits })
    }

    /// The smallest layout able to address `num_contexts` contexts.
    pub fn for_contexts(num_contexts: u32, msgid_bits: u8) -> Result<Self> {
        if num_contexts == 0 {
            return Err(Error::InvalidConfig(
                "at least one context is required".into(),
            ));
        }

        // ceil(log2(n)); a single context needs no bits.
        let ctx_bits = (u32::BITS - (num_contexts - 1).leading_zeros()) as u8;
        Self::new(msgid_bits, ctx_bits)
    }

    pub fn msgid_bits(&self) -> u8 {
        self.msgid_bits
    }

    pub fn ctx_bits(&self) -> u8 {
        self.ctx_bits
    }

    /// Total tag width in bits.
    pub fn bits(&self) -> u8 {
        self.msgid_bits + self.ctx_bits + 1
    }

    pub fn max_msgid(&self) -> u64 {
        bits_max(self.msgid_bits)
    }

    pub fn max_ctx_id(&self) -> u64 {
        bits_max(self.ctx_bits)
    }

    pub fn pack(&self, msgid: u64, eom: bool, ctx_id: u8) -> Result<u64> {
        if msgid > self.max_msgid() {
            return Err(Error::TagOverflow {
                field: TagField::MsgId,
                value: msgid,
                bits: self.msgid_bits,
            });
        }

        if u64::from(ctx_id) > self.max_ctx_id() {
            return Err(Error::TagOverflow {
                field: TagField::CtxId,
                value: u64::from(ctx_id),
                bits: self.ctx_bits,
            });
        }

        // A nonzero msgid implies msgid_bits > 0, keeping the shift
        // below 64.
        let mut tag = u64::from(ctx_id);
        tag |= u64::from(eom) << self.ctx_bits;
        if msgid != 0 {
            tag |= msgid << (self.ctx_bits + 1);
        }
        Ok(tag)
    }

    pub fn pack_fields(&self, fields: TagFields) -> Result<u64> {
        self.pack(fields.msgid, fields.eom, fields.ctx_id)
    }

    pub fn unpack(&self, tag: u64) -> Result<TagFields> {
        if tag > bits_max(self.bits()) {
            return Err(Error::TagOverflow {
                field: TagField::Tag,
                value: tag,
                bits: self.bits(),
            });
        }

        let ctx_id = (tag & self.max_ctx_id()) as u8;
        let eom = (tag >> self.ctx_bits) & 1 == 1;
        let msgid = tag >> (self.ctx_bits + 1);
        Ok(TagFields { msgid, eom, ctx_id })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout_limits() {
        assert!(TagLayout::new(63, 0).is_ok());
        assert!(TagLayout::new(61, 2).is_ok());
        assert!(matches!(
            TagLayout::new(62, 2),
            Err(Error::InvalidConfig(_))
        ));
        assert!(TagLayout::new(4, 9).is_err());
    }

    #[test]
    fn for_contexts_rounds_up() {
        let bits = |n| TagLayout::for_contexts(n, 8).unwrap().ctx_bits();
        assert_eq!(bits(1), 0);
        assert_eq!(bits(2), 1);
        assert_eq!(bits(3), 2);
        assert_eq!(bits(4), 2);
        assert_eq!(bits(5), 3);
        assert_eq!(bits(256), 8);
        assert!(TagLayout::for_contexts(0, 8).is_err());
        assert!(TagLayout::for_contexts(257, 8).is_err());
    }

    #[test]
    fn pack_matches_bit_layout() {
        let l = TagLayout::default();
        assert_eq!(l.pack(0, false, 0).unwrap(), 0);
        assert_eq!(l.pack(0, false, 3).unwrap(), 0b011);
        assert_eq!(l.pack(0, true, 0).unwrap(), 0b100);
        assert_eq!(l.pack(5, true, 2).unwrap(), (5 << 3) | 0b110);
        assert_eq!(l.pack(l.max_msgid(), true, 3).unwrap(), 0xffff);
    }

    #[test]
    fn unpack_inverts_pack() {
        let l = TagLayout::new(6, 3).unwrap();
        for msgid in [0, 1, 17, 63] {
            for eom in [false, true] {
                for ctx_id in [0, 1, 7] {
                    let tag = l.pack(msgid, eom, ctx_id).unwrap();
                    assert_eq!(
                        l.unpack(tag).unwrap(),
                        TagFields { msgid, eom, ctx_id }
                    );
                }
            }
        }
    }

    #[test]
    fn overflow_is_an_error() {
        let l = TagLayout::default();
        assert_eq!(
            l.pack(1 << 13, false, 0),
            Err(Error::TagOverflow {
                field: TagField::MsgId,
                value: 1 << 13,
                bits: 13
            })
        );
        assert!(matches!(
            l.pack(0, false, 4),
            Err(Error::TagOverflow { field: TagField::CtxId, .. })
        ));
        assert!(matches!(
            l.unpack(1 << 16),
            Err(Error::TagOverflow { field: TagField::Tag, .. })
        ));
    }

    #[test]
    fn zero_width_fields() {
        let l = TagLayout::new(0, 0).unwrap();
        assert_eq!(l.pack(0, true, 0).unwrap(), 1);
        assert!(l.pack(1, false, 0).is_err());
        assert_eq!(
            l.unpack(1).unwrap(),
            TagFields { msgid: 0, eom: true, ctx_id: 0 }
        );
    }

    #[test]
    fn deserialize_validates() {
        let bytes = postcard::to_allocvec(&(70u8, 2u8)).unwrap();
        assert!(postcard::from_bytes::<TagLayout>(&bytes).is_err());
        let bytes = postcard::to_allocvec(&TagLayout::default()).unwrap();
        assert_eq!(
            postcard::from_bytes::<TagLayout>(&bytes).unwrap(),
            TagLayout::default()
        );
    }
}
