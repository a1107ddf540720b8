// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Named counters.
//!
//! Declare a struct of [`StatU64`] fields and derive
//! [`StatProvider`]:
//!
//! ```
//! use fpspin::ddi::stat::StatProvider;
//! use fpspin::ddi::stat::StatU64;
//!
//! #[derive(StatProvider)]
//! pub struct RxStats {
//!     pkts: StatU64,
//!     bytes: StatU64,
//! }
//!
//! let stats = RxStats::new();
//! stats.pkts.incr(1);
//! stats.bytes.incr(64);
//! assert_eq!(stats.snapshot().bytes, 64);
//! ```
//!
//! Counters are updated through a shared reference. Each value is
//! individually consistent; a snapshot taken while the engine runs
//! may mix values from before and after a given packet.

use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

pub use stat_macro::StatProvider;

/// A provider of named counters. Use the derive rather than
/// implementing this by hand.
pub trait StatProvider {
    const NUM_FIELDS: u32;
    const NAMES: &'static [&'static str];
    type Snap;

    fn new() -> Self;

    fn num_fields(&self) -> u32 {
        Self::NUM_FIELDS
    }

    /// Return a snapshot of the stats. This is how you obtain a copy,
    /// as opposed to the traditional clone().
    fn snapshot(&self) -> Self::Snap;
}

#[derive(Debug, Default)]
pub struct StatU64 {
    value: AtomicU64,
}

impl StatU64 {
    pub const fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    pub fn incr(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    pub fn decr(&self, val: u64) {
        self.value.fetch_sub(val, Ordering::Relaxed);
    }

    pub fn set(&self, val: u64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn val(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}
