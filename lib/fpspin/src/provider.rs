// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers let the engine run wherever it is embedded by plugging
//! in platform services. Today that is only logging: the admin tool
//! bridges into its own logger, tests print, and anything that wants
//! to assert on log output can collect.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use std::sync::Arc;

use crate::ddi::sync::KMutex;

/// A logging provider provides the means to log messages to some
/// destination based on the context the engine is running in.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Drop everything.
#[derive(Clone, Copy)]
pub struct NullLog;

impl LogProvider for NullLog {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

/// Keep every message in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct CollectLog {
    msgs: Arc<KMutex<Vec<(LogLevel, String)>>>,
}

impl CollectLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn msgs(&self) -> Vec<(LogLevel, String)> {
        self.msgs.lock().clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.msgs.lock().iter().filter(|(l, _)| *l == level).count()
    }
}

impl LogProvider for CollectLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.msgs.lock().push((level, msg.into()));
    }
}
