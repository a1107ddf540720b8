// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine configuration.

use crate::api::DEF_BUF_ALIGN;
use crate::api::DEF_DMA_ALIGN;
use crate::api::DEF_MAX_PKT_SIZE;
use crate::api::DEF_NUM_CONTEXTS;
use crate::api::Error;
use crate::api::MatcherCfg;
use crate::api::TagLayout;
use serde::Deserialize;
use serde::Serialize;

/// Size of the default packet buffer.
pub const DEF_BUF_SIZE: u64 = 128 * 1024;

/// How long a transfer may stay outstanding.
pub const DEF_DMA_TIMEOUT_MS: u64 = 10;

/// The packet buffer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct BufferCfg {
    pub start: u64,
    pub size: u64,
    pub align: u64,
    /// Largest packet admitted, before rounding up to `align`.
    pub max_pkt_size: u64,
}

impl Default for BufferCfg {
    fn default() -> Self {
        Self {
            start: 0,
            size: DEF_BUF_SIZE,
            align: DEF_BUF_ALIGN,
            max_pkt_size: DEF_MAX_PKT_SIZE,
        }
    }
}

impl BufferCfg {
    pub fn validate(&self) -> Result<(), Error> {
        if self.align == 0 || !self.align.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "buffer alignment must be a power of two: {}",
                self.align
            )));
        }

        if self.start % self.align != 0 || self.size % self.align != 0 {
            return Err(Error::InvalidConfig(format!(
                "buffer {:#x}+{:#x} is not {}-byte aligned",
                self.start, self.size, self.align
            )));
        }

        if self.size == 0 || self.start.checked_add(self.size).is_none() {
            return Err(Error::InvalidConfig(format!(
                "bad buffer size: {:#x}",
                self.size
            )));
        }

        if self.max_pkt_size == 0 {
            return Err(Error::InvalidConfig("max_pkt_size is zero".into()));
        }

        // Descriptor lengths are 32 bits.
        if self.max_pkt_size > u64::from(u32::MAX) {
            return Err(Error::InvalidConfig(format!(
                "max_pkt_size {:#x} does not fit a descriptor",
                self.max_pkt_size
            )));
        }

        Ok(())
    }
}

/// Data movement.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct DmaCfg {
    pub timeout_ms: u64,
    /// Host transfers are issued in multiples of this many bytes.
    pub align: u64,
}

impl Default for DmaCfg {
    fn default() -> Self {
        Self { timeout_ms: DEF_DMA_TIMEOUT_MS, align: DEF_DMA_ALIGN }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct IngressCfg {
    pub buffer: BufferCfg,
    pub matcher: MatcherCfg,
    pub tag: TagLayout,
    pub dma: DmaCfg,
    pub num_contexts: u32,
}

impl Default for IngressCfg {
    fn default() -> Self {
        Self {
            buffer: BufferCfg::default(),
            matcher: MatcherCfg::default(),
            tag: TagLayout::default(),
            dma: DmaCfg::default(),
            num_contexts: DEF_NUM_CONTEXTS,
        }
    }
}

impl IngressCfg {
    pub fn validate(&self) -> Result<(), Error> {
        self.buffer.validate()?;
        self.matcher.validate()?;

        if self.num_contexts == 0 {
            return Err(Error::InvalidConfig(
                "at least one context is required".into(),
            ));
        }

        // Every ruleset id must name a context, and every context id
        // must fit in the tag.
        if (self.matcher.rulesets as u64) > u64::from(self.num_contexts) {
            return Err(Error::InvalidConfig(format!(
                "{} rulesets but only {} contexts",
                self.matcher.rulesets, self.num_contexts
            )));
        }

        if u64::from(self.num_contexts - 1) > self.tag.max_ctx_id() {
            return Err(Error::InvalidConfig(format!(
                "{} contexts do not fit in {} ctx_bits",
                self.num_contexts,
                self.tag.ctx_bits()
            )));
        }

        if self.dma.align == 0 || !self.dma.align.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "DMA alignment must be a power of two: {}",
                self.dma.align
            )));
        }

        Ok(())
    }
}
