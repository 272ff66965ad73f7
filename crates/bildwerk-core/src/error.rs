// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Bildwerk.

use thiserror::Error;

/// Top-level error type for all Bildwerk operations.
#[derive(Debug, Error)]
pub enum BildwerkError {
    // -- Setup errors (abort the whole run) --
    #[error("invalid configuration: {0}")]
    Configuration(String),

    // -- Per-node errors (absorbed by the walker) --
    #[error(
        "no image of {node} matches selector '{selector}' and filter '{filter}'"
    )]
    FeatureResolution {
        node: String,
        selector: String,
        filter: String,
    },

    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("external command failed: {0}")]
    Command(String),

    // -- Storage / persistence --
    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BildwerkError>;
