// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! DMA descriptors and their completion status.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Direction of a transfer, as seen from the device.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DmaOp {
    /// Host memory into local RAM.
    Read,
    /// Local RAM out to host memory, or packet bytes into local RAM.
    Write,
}

impl Display for DmaOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Read => "R",
            Self::Write => "W",
        };
        write!(f, "{s}")
    }
}

/// Which local RAM a descriptor targets.
pub const RAM_SEL_PKT: u8 = 0;
pub const RAM_SEL_STAGE: u8 = 1;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DmaDesc {
    /// Remote (host) address, or the packet buffer address for local
    /// writes.
    pub addr: u64,
    pub ram_sel: u8,
    pub ram_addr: u64,
    pub len: u32,
    pub tag: u64,
}

impl Display for DmaDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:#x} <-> ram{}:{:#x} len {} tag {:#x}",
            self.addr, self.ram_sel, self.ram_addr, self.len, self.tag
        )
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DescStatus {
    pub tag: u64,
    /// Nonzero on failure.
    pub error: u8,
}

impl DescStatus {
    pub const fn ok(tag: u64) -> Self {
        Self { tag, error: 0 }
    }

    pub fn is_ok(&self) -> bool {
        self.error == 0
    }
}
