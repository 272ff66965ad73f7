// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Contrast normalization of raw images: a percentile stretch or contrast
// limited adaptive histogram equalization. Color images are normalized on
// their HSV value, keeping hue and saturation.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::{FeatureSet, Query};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::operation::{ImageOperation, OperationContext, OperationResult, success};

/// Tiles per image side for adaptive equalization.
const TILES_PER_SIDE: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMethod {
    /// Linear stretch between the black and white percentiles.
    #[default]
    Stretch,
    /// Tile-based contrast limited histogram equalization.
    Adapthist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeParams {
    #[serde(default)]
    pub method: NormalizeMethod,
    /// Percentage of darkest pixels mapped to black.
    #[serde(rename = "black-point", default = "default_point")]
    pub black_point: f32,
    /// Percentage of brightest pixels mapped to white.
    #[serde(rename = "white-point", default = "default_point")]
    pub white_point: f32,
}

fn default_point() -> f32 {
    1.0
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            method: NormalizeMethod::Stretch,
            black_point: default_point(),
            white_point: default_point(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalize {
    params: NormalizeParams,
}

impl Normalize {
    pub fn new(params: NormalizeParams) -> Result<Self> {
        for (name, value) in [
            ("black-point", params.black_point),
            ("white-point", params.white_point),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(BildwerkError::Configuration(format!(
                    "{name} must be a percentage, got {value}"
                )));
            }
        }
        if params.black_point + params.white_point >= 100.0 {
            return Err(BildwerkError::Configuration(format!(
                "black-point ({}) and white-point ({}) must sum to less than 100",
                params.black_point, params.white_point
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &NormalizeParams {
        &self.params
    }

    /// Normalize one 8-bit channel to floating-point values in [0, 255].
    ///
    /// `None` means the channel has no contrast to work with.
    fn normalize_channel(&self, values: &[u8], width: usize, height: usize) -> Option<Vec<f64>> {
        match self.params.method {
            NormalizeMethod::Stretch => {
                let histogram = Histogram::of(values);
                let low = histogram.percentile(f64::from(self.params.black_point));
                let high = histogram.percentile(100.0 - f64::from(self.params.white_point));
                debug!(low, high, "stretch range");
                if high - low < f64::EPSILON {
                    return None;
                }
                Some(
                    values
                        .iter()
                        .map(|&v| ((f64::from(v) - low) / (high - low)).clamp(0.0, 1.0) * 255.0)
                        .collect(),
                )
            }
            NormalizeMethod::Adapthist => {
                let limit = f64::from(self.params.black_point.min(self.params.white_point)) / 100.0;
                Some(equalize_adaptive(values, width, height, limit))
            }
        }
    }
}

impl ImageOperation for Normalize {
    fn name(&self) -> &'static str {
        "bildwerk-normalize"
    }

    fn default_query(&self) -> Query {
        Query::new("", "binarized")
    }

    fn feature_added(&self) -> FeatureSet {
        FeatureSet::parse("normalized")
    }

    fn id_suffix(&self) -> String {
        ".IMG-NRM".to_owned()
    }

    #[instrument(skip_all, fields(node = %ctx.label, method = ?self.params.method))]
    fn apply(&self, image: &DynamicImage, ctx: &OperationContext) -> Result<OperationResult> {
        info!(
            black_point = self.params.black_point,
            white_point = self.params.white_point,
            "normalizing"
        );
        let (width, height) = (image.width() as usize, image.height() as usize);

        let output = if image.color().has_color() {
            let rgb = image.to_rgb8();
            let value: Vec<u8> = rgb
                .pixels()
                .map(|p| p.0.iter().copied().max().unwrap_or(0))
                .collect();
            log_percentiles("before", &value);
            let Some(normalized) = self.normalize_channel(&value, width, height) else {
                return Ok(OperationResult::skip("image has no contrast to normalize"));
            };
            let out = RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let i = y as usize * width + x as usize;
                let scale = if value[i] == 0 {
                    0.0
                } else {
                    normalized[i] / f64::from(value[i])
                };
                let pixel = rgb.get_pixel(x, y).0;
                Rgb(pixel.map(|c| to_byte(f64::from(c) * scale)))
            });
            DynamicImage::ImageRgb8(out)
        } else {
            let gray = image.to_luma8();
            log_percentiles("before", gray.as_raw());
            let Some(normalized) = self.normalize_channel(gray.as_raw(), width, height) else {
                return Ok(OperationResult::skip("image has no contrast to normalize"));
            };
            let bytes: Vec<u8> = normalized.into_iter().map(to_byte).collect();
            let out = GrayImage::from_raw(gray.width(), gray.height(), bytes).ok_or_else(|| {
                BildwerkError::ImageError("normalized buffer does not fit the image".into())
            })?;
            DynamicImage::ImageLuma8(out)
        };
        log_percentiles("after", output.to_luma8().as_raw());
        Ok(success(output, self.feature_added()))
    }
}

fn to_byte(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn log_percentiles(stage: &str, values: &[u8]) {
    let histogram = Histogram::of(values);
    debug!(
        stage,
        p0_2 = histogram.percentile(0.2),
        p99_8 = histogram.percentile(99.8),
        "2‰ percentiles"
    );
}

/// 256-bin histogram with linear-interpolation percentiles.
struct Histogram {
    counts: [u64; 256],
    total: u64,
}

impl Histogram {
    fn of(values: &[u8]) -> Self {
        let mut counts = [0u64; 256];
        for &v in values {
            counts[v as usize] += 1;
        }
        Self {
            counts,
            total: values.len() as u64,
        }
    }

    /// Value of rank `k` in sorted order.
    fn nth(&self, k: u64) -> f64 {
        let mut seen = 0;
        for (value, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen > k {
                return value as f64;
            }
        }
        255.0
    }

    /// Percentile `p` (0..=100), interpolating between neighbouring ranks.
    fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let rank = p.clamp(0.0, 100.0) / 100.0 * (self.total - 1) as f64;
        let lower = rank.floor() as u64;
        let fraction = rank - lower as f64;
        let low = self.nth(lower);
        if fraction == 0.0 {
            return low;
        }
        low + fraction * (self.nth(lower + 1) - low)
    }
}

/// Contrast limited adaptive histogram equalization.
///
/// The image is split into `TILES_PER_SIDE`² tiles; each tile gets a clipped,
/// redistributed histogram whose cumulative sum is its gray-level mapping.
/// Pixels blend the mappings of the four nearest tile centres bilinearly.
fn equalize_adaptive(values: &[u8], width: usize, height: usize, clip_limit: f64) -> Vec<f64> {
    let tile_w = (width / TILES_PER_SIDE).max(1);
    let tile_h = (height / TILES_PER_SIDE).max(1);
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);
    let clip = ((clip_limit * (tile_w * tile_h) as f64) as u64).max(1);

    let mut mappings = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x_range = tx * tile_w..((tx + 1) * tile_w).min(width);
            let y_range = ty * tile_h..((ty + 1) * tile_h).min(height);
            let mut counts = [0u64; 256];
            for y in y_range {
                for x in x_range.clone() {
                    counts[values[y * width + x] as usize] += 1;
                }
            }
            mappings.push(tile_mapping(&counts, clip));
        }
    }

    let axis = |pos: usize, tile: usize, tiles: usize| -> (usize, usize, f64) {
        let centre = ((pos as f64 + 0.5) / tile as f64 - 0.5).clamp(0.0, (tiles - 1) as f64);
        let first = centre.floor() as usize;
        let second = (first + 1).min(tiles - 1);
        (first, second, centre - first as f64)
    };

    let mut out = Vec::with_capacity(values.len());
    for y in 0..height {
        let (y0, y1, fy) = axis(y, tile_h, tiles_y);
        for x in 0..width {
            let (x0, x1, fx) = axis(x, tile_w, tiles_x);
            let v = values[y * width + x] as usize;
            let at = |tx: usize, ty: usize| mappings[ty * tiles_x + tx][v];
            let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
            let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
            out.push(top * (1.0 - fy) + bottom * fy);
        }
    }
    out
}

/// Clip a tile histogram at `clip`, spread the excess evenly over all bins,
/// and return the cumulative mapping scaled to [0, 255].
fn tile_mapping(counts: &[u64; 256], clip: u64) -> [f64; 256] {
    let mut excess = 0u64;
    let mut clipped = [0.0f64; 256];
    for (slot, &count) in clipped.iter_mut().zip(counts) {
        let kept = count.min(clip);
        excess += count - kept;
        *slot = kept as f64;
    }
    let share = excess as f64 / 256.0;
    let total = clipped.iter().sum::<f64>() + excess as f64;

    let mut mapping = [0.0; 256];
    let mut cumulative = 0.0;
    for (value, &count) in clipped.iter().enumerate() {
        cumulative += count + share;
        mapping[value] = if total == 0.0 {
            value as f64
        } else {
            cumulative * 255.0 / total
        };
    }
    mapping
}
