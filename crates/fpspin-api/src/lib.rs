// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the fpspin ingress engine, its administration
//! tooling, and anything else that needs to speak about rule tables,
//! execution contexts, and DMA descriptors.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod ctx;
pub mod dma;
pub mod error;
pub mod rule;
pub mod tag;

pub use ctx::*;
pub use dma::*;
pub use error::*;
pub use rule::*;
pub use tag::*;

/// The overall version of the API. Anytime a type in this crate is
/// added, removed, or modified in a way that changes its serialized
/// form, this number should increment. Persisted rule tables carry
/// it so that stale encodings are refused rather than misread.
pub const API_VERSION: u64 = 3;

/// Major version of the fpspin package.
pub const MAJOR_VERSION: u64 = 0;

/// The default width, in bits, of a single matched field.
pub const DEF_MATCH_WIDTH: u8 = 32;

/// The default number of rules in each ruleset, including the
/// trailing EOM rule.
pub const DEF_MATCH_ENTRIES: usize = 4;

/// The default number of rulesets in a rule table.
pub const DEF_RULESETS: usize = 4;

/// The default number of leading packet bytes visible to the
/// classifier.
pub const DEF_MATCHER_LEN: usize = 2048;

/// The default number of handler execution contexts.
pub const DEF_NUM_CONTEXTS: u32 = 4;

/// The default packet buffer alignment.
pub const DEF_BUF_ALIGN: u64 = 64;

/// The default DMA bus width in bytes; descriptors are sized in
/// multiples of this.
pub const DEF_DMA_ALIGN: u64 = 64;

/// The default largest packet admitted into the packet buffer.
pub const DEF_MAX_PKT_SIZE: u64 = 1518;

/// Round `val` up to the next multiple of `align`.
///
/// An `align` of zero leaves the value untouched.
pub const fn align_up(val: u64, align: u64) -> u64 {
    if align == 0 {
        return val;
    }

    val.div_ceil(align) * align
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(1518, 64), 1536);
        assert_eq!(align_up(77, 0), 77);
    }
}
