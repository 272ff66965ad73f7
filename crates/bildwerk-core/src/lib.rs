// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bildwerk — Core types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod features;
pub mod types;

pub use config::CommonParams;
pub use error::BildwerkError;
pub use features::{FeatureSet, Query};
pub use types::*;
