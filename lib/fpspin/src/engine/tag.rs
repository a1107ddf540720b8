// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-context message ids.

use crate::api::Error;
use crate::api::TagFields;
use crate::api::TagLayout;
use alloc::vec::Vec;

/// One wrapping message id counter per context.
///
/// A tag must be unique among in-flight operations, so handing out
/// the next id skips every value whose tag is still pending.
#[derive(Debug)]
pub struct MsgIds {
    layout: TagLayout,
    next: Vec<u64>,
}

impl MsgIds {
    pub fn new(layout: TagLayout, num_contexts: u32) -> Self {
        Self { layout, next: vec![0; num_contexts as usize] }
    }

    pub fn layout(&self) -> &TagLayout {
        &self.layout
    }

    /// Allocate the next free tag for `ctx_id`. `None` means every
    /// message id of the context is in flight.
    pub fn next_tag<F>(
        &mut self,
        ctx_id: u8,
        eom: bool,
        in_flight: F,
    ) -> Result<Option<(TagFields, u64)>, Error>
    where
        F: Fn(u64) -> bool,
    {
        let n = self.next.len();
        let next = self.next.get_mut(usize::from(ctx_id)).ok_or_else(|| {
            Error::InvalidConfig(format!("no context {ctx_id} of {n}"))
        })?;

        let max = self.layout.max_msgid();
        let mut msgid = *next;
        // `max` may be u64::MAX; count with a wrapping bound.
        let mut tries = 0u64;
        loop {
            let tag = self.layout.pack(msgid, eom, ctx_id)?;
            let succ = if msgid == max { 0 } else { msgid + 1 };
            if !in_flight(tag) {
                *next = succ;
                return Ok(Some((TagFields { msgid, eom, ctx_id }, tag)));
            }

            if tries == max {
                return Ok(None);
            }
            tries += 1;
            msgid = succ;
        }
    }
}
