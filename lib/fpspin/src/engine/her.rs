// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Handler execution requests.

use crate::api::BufferRegion;
use crate::api::Error;
use crate::api::ExecutionContext;
use crate::api::TagLayout;
use crate::ddi::sync::KRwLock;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Tells an execution context that a packet is waiting for it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Her {
    pub ctx_id: u8,
    pub msgid: u64,
    pub eom: bool,
    /// Packet buffer address.
    pub addr: u64,
    /// Size of the allocated region.
    pub buf_size: u64,
    /// Packet bytes actually written; at most `buf_size`.
    pub xfer_size: u64,
    pub tag: u64,
    pub ctx: ExecutionContext,
}

impl Her {
    pub fn region(&self) -> BufferRegion {
        BufferRegion { addr: self.addr, size: self.buf_size }
    }
}

impl Display for Her {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ctx {} msg {}{} @ {:#x} xfer {}/{} tag {:#x}",
            self.ctx_id,
            self.msgid,
            if self.eom { " (eom)" } else { "" },
            self.addr,
            self.xfer_size,
            self.buf_size,
            self.tag,
        )
    }
}

/// Builds HERs from the installed execution contexts.
pub struct HerGen {
    num_contexts: u32,
    layout: TagLayout,
    ctxs: KRwLock<BTreeMap<u8, ExecutionContext>>,
}

impl HerGen {
    pub fn new(num_contexts: u32, layout: TagLayout) -> Self {
        Self { num_contexts, layout, ctxs: KRwLock::new(BTreeMap::new()) }
    }

    /// Install or replace the metadata for `ctx_id`, enabling it.
    pub fn load(
        &self,
        ctx_id: u8,
        ctx: ExecutionContext,
    ) -> Result<(), Error> {
        if u32::from(ctx_id) >= self.num_contexts {
            return Err(Error::InvalidConfig(format!(
                "context id {ctx_id} out of range, {} contexts",
                self.num_contexts
            )));
        }

        self.ctxs.write().insert(ctx_id, ctx);
        Ok(())
    }

    /// Remove the metadata for `ctx_id`, disabling it.
    pub fn unload(&self, ctx_id: u8) -> Result<ExecutionContext, Error> {
        self.ctxs
            .write()
            .remove(&ctx_id)
            .ok_or(Error::ContextNotEnabled(ctx_id))
    }

    pub fn is_enabled(&self, ctx_id: u8) -> bool {
        self.ctxs.read().contains_key(&ctx_id)
    }

    /// Is at least one context enabled?
    pub fn is_ready(&self) -> bool {
        !self.ctxs.read().is_empty()
    }

    pub fn get(&self, ctx_id: u8) -> Option<ExecutionContext> {
        self.ctxs.read().get(&ctx_id).copied()
    }

    pub fn contexts(&self) -> Vec<(u8, ExecutionContext)> {
        self.ctxs.read().iter().map(|(&id, &ctx)| (id, ctx)).collect()
    }

    /// Build the HER for a packet of `xfer_size` bytes matched by
    /// `ruleset_id` and landed in `region`.
    pub fn dispatch(
        &self,
        ruleset_id: u8,
        eom: bool,
        region: BufferRegion,
        xfer_size: u64,
        msgid: u64,
    ) -> Result<Her, Error> {
        let ctx = self
            .get(ruleset_id)
            .ok_or(Error::ContextNotEnabled(ruleset_id))?;

        if xfer_size > region.size {
            return Err(Error::InvalidConfig(format!(
                "{xfer_size} bytes do not fit in region {region}"
            )));
        }

        let tag = self.layout.pack(msgid, eom, ruleset_id)?;

        Ok(Her {
            ctx_id: ruleset_id,
            msgid,
            eom,
            addr: region.addr,
            buf_size: region.size,
            xfer_size,
            tag,
            ctx,
        })
    }
}
