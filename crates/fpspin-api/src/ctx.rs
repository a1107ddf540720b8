// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Execution context metadata.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Number of scratchpad regions per context.
pub const NUM_SCRATCHPADS: usize = 4;

/// An address/size pair.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct MemRegion {
    pub addr: u64,
    pub size: u32,
}

impl MemRegion {
    pub const fn new(addr: u64, size: u32) -> Self {
        Self { addr, size }
    }

    pub fn end(&self) -> u64 {
        self.addr + u64::from(self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Display for MemRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}+{:#x}", self.addr, self.size)
    }
}

/// The memory layout handed to a handler with every request: where
/// its code lives, where its host buffer is, the three handler
/// regions and its scratchpads.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct ExecutionContext {
    pub handler_mem: MemRegion,
    pub host_mem: MemRegion,
    /// Header handler.
    pub hh: MemRegion,
    /// Payload handler.
    pub ph: MemRegion,
    /// Completion (tail) handler.
    pub th: MemRegion,
    pub scratchpad: [MemRegion; NUM_SCRATCHPADS],
}
