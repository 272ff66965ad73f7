// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The operation capability and the closed set of operation variants.

use std::str::FromStr;

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::{FeatureSet, ImageMime, Query};
use image::DynamicImage;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::binarize::{Binarize, BinarizeParams};
use crate::denoise::{Denoise, DenoiseParams};
use crate::despeckle::{Despeckle, DespeckleParams};
use crate::normalize::{Normalize, NormalizeParams};
use crate::shell::{ShellCommand, ShellParams};

/// Per-invocation facts an operation may need.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationContext {
    /// Pixel density of the page the image belongs to.
    pub dpi: f32,
    /// Human-readable node description for log lines, e.g. `region 'r1'`.
    pub label: String,
    /// Identifier the result will be recorded under.
    pub image_id: String,
}

impl OperationContext {
    pub fn new(dpi: f32, label: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self {
            dpi,
            label: label.into(),
            image_id: image_id.into(),
        }
    }
}

/// What an operation produced for one node.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// A new raster of the input's size plus the features it adds.
    Success {
        image: DynamicImage,
        features_added: FeatureSet,
    },
    /// Nothing to record; the node's history stays untouched.
    Skip { reason: String },
}

impl OperationResult {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }
}

/// Capability shared by every operation.
pub trait ImageOperation {
    /// Processor name recorded in page metadata.
    fn name(&self) -> &'static str;

    /// Query used to pick the input image unless the user overrides it.
    fn default_query(&self) -> Query;

    /// Features a successful run adds to the image it produces.
    fn feature_added(&self) -> FeatureSet;

    /// Token appended to the file identifier of every produced image.
    fn id_suffix(&self) -> String;

    /// Encoding of the produced images.
    fn output_mime(&self) -> ImageMime {
        ImageMime::Png
    }

    /// Transform one raster. `Err` is an operation failure for this node.
    fn apply(&self, image: &DynamicImage, ctx: &OperationContext) -> Result<OperationResult>;
}

/// Names of the available operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Binarize,
    Despeckle,
    Denoise,
    Normalize,
    Shell,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        Self::Binarize,
        Self::Despeckle,
        Self::Denoise,
        Self::Normalize,
        Self::Shell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binarize => "binarize",
            Self::Despeckle => "despeckle",
            Self::Denoise => "denoise",
            Self::Normalize => "normalize",
            Self::Shell => "shell",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = BildwerkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BildwerkError::Configuration(format!("unknown operation '{s}'")))
    }
}

/// A configured operation, ready to be applied to any number of images.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Binarize(Binarize),
    Despeckle(Despeckle),
    Denoise(Denoise),
    Normalize(Normalize),
    Shell(ShellCommand),
}

impl Operation {
    /// Build an operation from its operation-specific parameters.
    ///
    /// Unknown keys and invalid values are configuration errors.
    pub fn from_params(kind: OperationKind, params: Map<String, Value>) -> Result<Self> {
        Ok(match kind {
            OperationKind::Binarize => {
                Self::Binarize(Binarize::new(parse_params::<BinarizeParams>(params)?)?)
            }
            OperationKind::Despeckle => {
                Self::Despeckle(Despeckle::new(parse_params::<DespeckleParams>(params)?)?)
            }
            OperationKind::Denoise => {
                Self::Denoise(Denoise::new(parse_params::<DenoiseParams>(params)?))
            }
            OperationKind::Normalize => {
                Self::Normalize(Normalize::new(parse_params::<NormalizeParams>(params)?)?)
            }
            OperationKind::Shell => {
                Self::Shell(ShellCommand::new(parse_params::<ShellParams>(params)?)?)
            }
        })
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Binarize(_) => OperationKind::Binarize,
            Self::Despeckle(_) => OperationKind::Despeckle,
            Self::Denoise(_) => OperationKind::Denoise,
            Self::Normalize(_) => OperationKind::Normalize,
            Self::Shell(_) => OperationKind::Shell,
        }
    }

    /// Effective operation parameters, for provenance.
    pub fn parameters(&self) -> Value {
        let value = match self {
            Self::Binarize(op) => serde_json::to_value(op.params()),
            Self::Despeckle(op) => serde_json::to_value(op.params()),
            Self::Denoise(op) => serde_json::to_value(op.params()),
            Self::Normalize(op) => serde_json::to_value(op.params()),
            Self::Shell(op) => serde_json::to_value(op.params()),
        };
        value.unwrap_or(Value::Null)
    }

    /// Apply the operation and enforce that a result keeps the input's size.
    pub fn run(&self, image: &DynamicImage, ctx: &OperationContext) -> Result<OperationResult> {
        let result = self.apply(image, ctx)?;
        if let OperationResult::Success { image: output, .. } = &result {
            let expected = (image.width(), image.height());
            let actual = (output.width(), output.height());
            if expected != actual {
                warn!(
                    node = %ctx.label,
                    expected = ?expected,
                    actual = ?actual,
                    "operation changed the image size"
                );
                return Ok(OperationResult::skip(format!(
                    "output size {}x{} differs from input size {}x{}",
                    actual.0, actual.1, expected.0, expected.1
                )));
            }
        }
        Ok(result)
    }

    fn as_capability(&self) -> &dyn ImageOperation {
        match self {
            Self::Binarize(op) => op,
            Self::Despeckle(op) => op,
            Self::Denoise(op) => op,
            Self::Normalize(op) => op,
            Self::Shell(op) => op,
        }
    }
}

impl ImageOperation for Operation {
    fn name(&self) -> &'static str {
        self.as_capability().name()
    }

    fn default_query(&self) -> Query {
        self.as_capability().default_query()
    }

    fn feature_added(&self) -> FeatureSet {
        self.as_capability().feature_added()
    }

    fn id_suffix(&self) -> String {
        self.as_capability().id_suffix()
    }

    fn output_mime(&self) -> ImageMime {
        self.as_capability().output_mime()
    }

    fn apply(&self, image: &DynamicImage, ctx: &OperationContext) -> Result<OperationResult> {
        self.as_capability().apply(image, ctx)
    }
}

fn parse_params<T: DeserializeOwned>(params: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(params))
        .map_err(|e| BildwerkError::Configuration(e.to_string()))
}

/// Successful result carrying `image` and `features`.
pub(crate) fn success(image: DynamicImage, features: FeatureSet) -> OperationResult {
    OperationResult::Success {
        image,
        features_added: features,
    }
}
