// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The fpspin ingress engine.
//!
//! Packets arriving on the wire are classified against a small table
//! of rulesets. A matching packet is admitted into the packet buffer,
//! written there by a tagged local transfer, and announced to its
//! execution context with a handler execution request (HER) once that
//! transfer completes. Everything else bypasses the engine untouched.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate alloc;

// This is needed so that the stat-macro (`#[derive(StatProvider)]`)
// can use fully-qualified type paths.
extern crate self as fpspin;

use alloc::boxed::Box;
use provider::LogProvider;

pub mod api;
pub mod capture;
pub mod cfg;
pub mod ddi;
pub mod engine;
pub mod print;
pub mod provider;

/// The execution context of the engine: the providers it reaches out
/// to for anything platform specific.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
}

impl ExecCtx {
    pub fn println() -> Self {
        Self { log: Box::new(provider::PrintlnLog) }
    }
}
