// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The ingress engine.
pub mod buffer;
pub mod dma;
pub mod her;
pub mod hostmem;
pub mod ingress;
pub mod matcher;
pub mod sim;
pub mod tag;

pub use ingress::Ingress;
pub use ingress::IngressVerdict;
pub use matcher::Classification;
pub use matcher::Matcher;
pub use matcher::RuleTable;
