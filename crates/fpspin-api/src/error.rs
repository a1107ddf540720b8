// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The field of a tag which failed to pack or unpack.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TagField {
    MsgId,
    CtxId,
    /// The tag as a whole is wider than its layout.
    Tag,
}

impl Display for TagField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::MsgId => "msgid",
            Self::CtxId => "ctx_id",
            Self::Tag => "tag",
        };
        write!(f, "{s}")
    }
}

/// Errors produced by the ingress engine.
///
/// Configuration errors (`InvalidConfig`, `ContextNotEnabled`,
/// `TagOverflow`) are caller mistakes. Transport errors (`Timeout`,
/// `TransferFailed`) are expected in steady state and are reported
/// without stopping the pipeline. Resource exhaustion is not an error
/// at all; see the drop counters.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("execution context {0} is not enabled")]
    ContextNotEnabled(u8),

    #[error("region {addr:#x}+{size} is not outstanding")]
    InvalidFree { addr: u64, size: u64 },

    #[error("{field} value {value:#x} does not fit in {bits} bits")]
    TagOverflow { field: TagField, value: u64, bits: u8 },

    #[error("completion for unknown tag {0:#x}")]
    UnknownTag(u64),

    #[error("tag {0:#x} is already in flight")]
    TagInUse(u64),

    #[error("transfer {tag:#x} timed out after {elapsed_ms}ms")]
    Timeout { tag: u64, elapsed_ms: u64 },

    #[error("transfer {tag:#x} failed with status {error}")]
    TransferFailed { tag: u64, error: u8 },
}

impl Error {
    /// Is this a caller/configuration error, as opposed to a transport
    /// condition the pipeline is expected to ride out?
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::ContextNotEnabled(_)
                | Self::TagOverflow { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, Error>;
