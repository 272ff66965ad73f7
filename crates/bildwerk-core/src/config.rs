// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Parameters shared by every operation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BildwerkError, Result};
use crate::features::{FeatureSet, Query};
use crate::types::Level;

/// Resolution assumed when neither the parameters nor the page carry one.
pub const FALLBACK_DPI: f32 = 300.0;

/// Parameter keys owned by [`CommonParams`]. Everything else in a parameter
/// object belongs to the selected operation.
pub const COMMON_KEYS: [&str; 4] = [
    "level-of-operation",
    "input_feature_selector",
    "input_feature_filter",
    "dpi",
];

/// Run-wide settings that apply regardless of the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonParams {
    /// Deepest hierarchy level that receives the operation.
    #[serde(rename = "level-of-operation", default = "default_level")]
    pub level_of_operation: Level,
    /// Overrides the operation's required features when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_feature_selector: Option<FeatureSet>,
    /// Overrides the operation's forbidden features when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_feature_filter: Option<FeatureSet>,
    /// Pixel density override; 0 means "take it from the page".
    #[serde(default)]
    pub dpi: f32,
}

fn default_level() -> Level {
    Level::Page
}

impl Default for CommonParams {
    fn default() -> Self {
        Self {
            level_of_operation: Level::Page,
            input_feature_selector: None,
            input_feature_filter: None,
            dpi: 0.0,
        }
    }
}

/// Where the pixel density of a page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpiSource {
    Parameter,
    ImageMetadata,
    Fallback,
}

impl CommonParams {
    /// Split a flat parameter object into the common part and the remaining
    /// operation-specific keys.
    pub fn split_from(mut params: Map<String, Value>) -> Result<(Self, Map<String, Value>)> {
        let mut own = Map::new();
        for key in COMMON_KEYS {
            if let Some(value) = params.remove(key) {
                own.insert(key.to_owned(), value);
            }
        }
        let common: CommonParams = serde_json::from_value(Value::Object(own))
            .map_err(|e| BildwerkError::Configuration(e.to_string()))?;
        if common.dpi < 0.0 {
            return Err(BildwerkError::Configuration(format!(
                "dpi must not be negative, got {}",
                common.dpi
            )));
        }
        Ok((common, params))
    }

    /// The operation's default query with any user overrides applied.
    pub fn query(&self, default: &Query) -> Query {
        Query {
            selector: self
                .input_feature_selector
                .clone()
                .unwrap_or_else(|| default.selector.clone()),
            filter: self
                .input_feature_filter
                .clone()
                .unwrap_or_else(|| default.filter.clone()),
        }
    }

    /// Pixel density for a page: parameter override, then image metadata,
    /// then [`FALLBACK_DPI`].
    pub fn resolve_dpi(&self, page_resolution: Option<f32>) -> (f32, DpiSource) {
        if self.dpi > 0.0 {
            return (self.dpi, DpiSource::Parameter);
        }
        match page_resolution {
            // A resolution of 1 is what writers emit when they know nothing.
            Some(res) if res > 1.0 => (res, DpiSource::ImageMetadata),
            _ => (FALLBACK_DPI, DpiSource::Fallback),
        }
    }
}
