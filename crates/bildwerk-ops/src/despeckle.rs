// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Despeckling of binarized images: small white specks become black, then small
// black specks become white.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::{FeatureSet, Query};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::operation::{ImageOperation, OperationContext, OperationResult, success};

/// Points per inch.
const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DespeckleParams {
    /// Largest speck to remove, in points.
    #[serde(default = "default_maxsize")]
    pub maxsize: f32,
}

fn default_maxsize() -> f32 {
    3.0
}

impl Default for DespeckleParams {
    fn default() -> Self {
        Self {
            maxsize: default_maxsize(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Despeckle {
    params: DespeckleParams,
}

impl Despeckle {
    pub fn new(params: DespeckleParams) -> Result<Self> {
        if !params.maxsize.is_finite() || params.maxsize < 0.0 {
            return Err(BildwerkError::Configuration(format!(
                "maxsize must not be negative, got {}",
                params.maxsize
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &DespeckleParams {
        &self.params
    }

    /// Speck size limit in pixels at the given density.
    pub fn max_pixels(&self, dpi: f32) -> usize {
        (self.params.maxsize * dpi / POINTS_PER_INCH).round() as usize
    }

    /// Remove components smaller than `max_pixels` from a two-tone image.
    ///
    /// Pixels above mid-gray count as white.
    pub fn despeckle(&self, gray: &GrayImage, max_pixels: usize) -> GrayImage {
        let mut bilevel = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([if gray.get_pixel(x, y).0[0] > 127 { 255 } else { 0 }])
        });
        let white_removed = remove_small_components(&mut bilevel, 255, max_pixels);
        let black_removed = remove_small_components(&mut bilevel, 0, max_pixels);
        debug!(white_removed, black_removed, "components removed");
        bilevel
    }
}

/// Repaint every `tone` component of fewer than `max_pixels` pixels in the
/// opposite tone. Returns the number of components removed.
fn remove_small_components(image: &mut GrayImage, tone: u8, max_pixels: usize) -> usize {
    let background = Luma([255 - tone]);
    let labels = connected_components(&*image, Connectivity::Four, background);

    let mut sizes: Vec<usize> = Vec::new();
    for label in labels.pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        if label >= sizes.len() {
            sizes.resize(label + 1, 0);
        }
        sizes[label] += 1;
    }

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label != 0 && sizes[label] < max_pixels {
            image.put_pixel(x, y, background);
        }
    }
    sizes.iter().filter(|&&size| size > 0 && size < max_pixels).count()
}

impl ImageOperation for Despeckle {
    fn name(&self) -> &'static str {
        "bildwerk-despeckle"
    }

    fn default_query(&self) -> Query {
        Query::new("binarized", "")
    }

    fn feature_added(&self) -> FeatureSet {
        FeatureSet::parse("despeckled")
    }

    fn id_suffix(&self) -> String {
        ".IMG-DEN".to_owned()
    }

    #[instrument(skip_all, fields(node = %ctx.label))]
    fn apply(&self, image: &DynamicImage, ctx: &OperationContext) -> Result<OperationResult> {
        let max_pixels = self.max_pixels(ctx.dpi);
        info!(maxsize = self.params.maxsize, max_pixels, "despeckling");
        let output = self.despeckle(&image.to_luma8(), max_pixels);
        Ok(success(DynamicImage::ImageLuma8(output), self.feature_added()))
    }
}
