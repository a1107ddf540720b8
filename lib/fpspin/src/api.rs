// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

pub use fpspin_api::*;

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// A region of the packet buffer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct BufferRegion {
    pub addr: u64,
    /// Allocated size, a multiple of the buffer alignment.
    pub size: u64,
}

impl BufferRegion {
    pub fn end(&self) -> u64 {
        self.addr + self.size
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.addr < other.end() && other.addr < self.end()
    }
}

impl Display for BufferRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}+{:#x}", self.addr, self.size)
    }
}

/// Why a matched packet did not make it into the packet buffer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DropReason {
    /// Larger than the largest admissible packet.
    Oversize,
    /// No contiguous free space.
    NoSpace,
    /// Every message id of the context is in flight.
    NoTag,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Oversize => "oversize",
            Self::NoSpace => "no space",
            Self::NoTag => "no tag",
        };
        write!(f, "{s}")
    }
}
