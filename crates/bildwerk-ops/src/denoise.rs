// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Wavelet denoising of raw (non-binarized) images.
//
// Each channel is decomposed with a multi-level orthonormal Haar transform;
// the detail coefficients are soft-thresholded and the channel is rebuilt.
// Color images are denoised in YCbCr space. The noise level is estimated from
// the finest diagonal detail band (median absolute deviation).

use std::f64::consts::FRAC_1_SQRT_2;

use bildwerk_core::error::Result;
use bildwerk_core::{FeatureSet, Query};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::operation::{ImageOperation, OperationContext, OperationResult, success};

/// Noise levels below this are treated as an already clean image.
const MIN_SIGMA: f64 = 1e-5;

/// Scale from median absolute deviation to standard deviation for Gaussian noise.
const MAD_SCALE: f64 = 0.6745;

/// Threshold selection rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShrinkMethod {
    /// One universal threshold for every band.
    VisuShrink,
    /// An adaptive threshold per detail band.
    #[default]
    BayesShrink,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenoiseParams {
    #[serde(default)]
    pub method: ShrinkMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Denoise {
    params: DenoiseParams,
}

impl Denoise {
    pub fn new(params: DenoiseParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DenoiseParams {
        &self.params
    }
}

impl ImageOperation for Denoise {
    fn name(&self) -> &'static str {
        "bildwerk-denoise"
    }

    fn default_query(&self) -> Query {
        Query::new("", "binarized")
    }

    fn feature_added(&self) -> FeatureSet {
        FeatureSet::parse("despeckled")
    }

    fn id_suffix(&self) -> String {
        ".IMG-DEN".to_owned()
    }

    #[instrument(skip_all, fields(node = %ctx.label, method = ?self.params.method))]
    fn apply(&self, image: &DynamicImage, ctx: &OperationContext) -> Result<OperationResult> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        if width == 0 || height == 0 {
            return Ok(OperationResult::skip("image is empty"));
        }
        let color = image.color().has_color();
        let planes = if color {
            split_rgb(&image.to_rgb8())
        } else {
            vec![gray_plane(&image.to_luma8())]
        };

        let sigma = average_sigma(&planes, width, height);
        debug!(sigma, "estimated noise before");
        if sigma < MIN_SIGMA {
            return Ok(OperationResult::skip(format!(
                "image is already clean (estimated noise {sigma:.2e})"
            )));
        }

        let levels = wavelet_levels(width, height);
        info!(sigma, levels, "denoising");
        let output = if color {
            let [y, cb, cr] = rgb_to_ycbcr(&planes);
            let denoised = [y, cb, cr].map(|plane| {
                denoise_plane(&plane, width, height, levels, self.params.method)
            });
            let rgb = ycbcr_to_rgb(&denoised);
            debug!(sigma = average_sigma(&rgb, width, height), "estimated noise after");
            DynamicImage::ImageRgb8(join_rgb(&rgb, width, height))
        } else {
            let plane = denoise_plane(&planes[0], width, height, levels, self.params.method);
            debug!(sigma = estimate_sigma(&plane, width, height), "estimated noise after");
            DynamicImage::ImageLuma8(join_gray(&plane, width, height))
        };
        Ok(success(output, self.feature_added()))
    }
}

// -- Channel plumbing ---------------------------------------------------------

fn gray_plane(gray: &GrayImage) -> Vec<f64> {
    gray.pixels().map(|p| f64::from(p.0[0]) / 255.0).collect()
}

fn split_rgb(rgb: &RgbImage) -> Vec<Vec<f64>> {
    (0..3)
        .map(|c| rgb.pixels().map(|p| f64::from(p.0[c]) / 255.0).collect())
        .collect()
}

fn to_byte(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn join_gray(plane: &[f64], width: usize, height: usize) -> GrayImage {
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([to_byte(plane[y as usize * width + x as usize])])
    })
}

fn join_rgb(planes: &[Vec<f64>], width: usize, height: usize) -> RgbImage {
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let i = y as usize * width + x as usize;
        Rgb([to_byte(planes[0][i]), to_byte(planes[1][i]), to_byte(planes[2][i])])
    })
}

/// Full-range BT.601 conversion of RGB planes in [0, 1].
fn rgb_to_ycbcr(planes: &[Vec<f64>]) -> [Vec<f64>; 3] {
    let n = planes[0].len();
    let mut out = [vec![0.0; n], vec![0.0; n], vec![0.0; n]];
    for i in 0..n {
        let (r, g, b) = (planes[0][i], planes[1][i], planes[2][i]);
        out[0][i] = 0.299 * r + 0.587 * g + 0.114 * b;
        out[1][i] = 0.5 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        out[2][i] = 0.5 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    }
    out
}

fn ycbcr_to_rgb(planes: &[Vec<f64>; 3]) -> Vec<Vec<f64>> {
    let n = planes[0].len();
    let mut out = vec![vec![0.0; n]; 3];
    for i in 0..n {
        let (y, cb, cr) = (planes[0][i], planes[1][i] - 0.5, planes[2][i] - 0.5);
        out[0][i] = y + 1.402 * cr;
        out[1][i] = y - 0.344_136 * cb - 0.714_136 * cr;
        out[2][i] = y + 1.772 * cb;
    }
    out
}

// -- Noise estimation ---------------------------------------------------------

fn average_sigma(planes: &[Vec<f64>], width: usize, height: usize) -> f64 {
    let total: f64 = planes
        .iter()
        .map(|plane| estimate_sigma(plane, width, height))
        .sum();
    total / planes.len() as f64
}

/// Noise standard deviation from the finest diagonal band.
fn estimate_sigma(plane: &[f64], width: usize, height: usize) -> f64 {
    let mut padded = Padded::new(plane, width, height, 1);
    haar_forward(&mut padded.data, padded.width, padded.width, padded.height);
    let (hw, hh) = (padded.width / 2, padded.height / 2);
    let mut diagonal: Vec<f64> = band(&padded, hw, hh, hw, hh).map(f64::abs).collect();
    median(&mut diagonal) / MAD_SCALE
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if values.len() % 2 == 1 {
        return upper;
    }
    let lower = values[..mid].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (lower + upper) / 2.0
}

/// Number of decomposition levels: three short of the maximum, at least one.
fn wavelet_levels(width: usize, height: usize) -> u32 {
    let max_level = width.min(height).max(1).ilog2();
    max_level.saturating_sub(3).max(1)
}

// -- Haar transform -----------------------------------------------------------

/// A plane padded by edge replication to dimensions divisible by `2^levels`.
struct Padded {
    data: Vec<f64>,
    width: usize,
    height: usize,
}

impl Padded {
    fn new(plane: &[f64], width: usize, height: usize, levels: u32) -> Self {
        let block = 1usize << levels;
        let padded_width = width.div_ceil(block) * block;
        let padded_height = height.div_ceil(block) * block;
        let mut data = vec![0.0; padded_width * padded_height];
        for y in 0..padded_height {
            let sy = y.min(height - 1);
            for x in 0..padded_width {
                data[y * padded_width + x] = plane[sy * width + x.min(width - 1)];
            }
        }
        Self {
            data,
            width: padded_width,
            height: padded_height,
        }
    }

    fn crop(&self, width: usize, height: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(width * height);
        for y in 0..height {
            out.extend_from_slice(&self.data[y * self.width..y * self.width + width]);
        }
        out
    }
}

/// Coefficients of the `w`×`h` band whose top-left corner is (x0, y0).
fn band(
    padded: &Padded,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
) -> impl Iterator<Item = f64> + '_ {
    (y0..y0 + h).flat_map(move |y| {
        padded.data[y * padded.width + x0..y * padded.width + x0 + w]
            .iter()
            .copied()
    })
}

fn haar_step(values: &mut [f64], scratch: &mut [f64]) {
    let half = values.len() / 2;
    for i in 0..half {
        let (a, b) = (values[2 * i], values[2 * i + 1]);
        scratch[i] = (a + b) * FRAC_1_SQRT_2;
        scratch[half + i] = (a - b) * FRAC_1_SQRT_2;
    }
    values.copy_from_slice(&scratch[..values.len()]);
}

fn haar_step_inverse(values: &mut [f64], scratch: &mut [f64]) {
    let half = values.len() / 2;
    for i in 0..half {
        let (a, d) = (values[i], values[half + i]);
        scratch[2 * i] = (a + d) * FRAC_1_SQRT_2;
        scratch[2 * i + 1] = (a - d) * FRAC_1_SQRT_2;
    }
    values.copy_from_slice(&scratch[..values.len()]);
}

/// One 2D level on the top-left `width`×`height` block: rows, then columns.
fn haar_forward(data: &mut [f64], stride: usize, width: usize, height: usize) {
    let mut scratch = vec![0.0; width.max(height)];
    for y in 0..height {
        haar_step(&mut data[y * stride..y * stride + width], &mut scratch);
    }
    let mut column = vec![0.0; height];
    for x in 0..width {
        for y in 0..height {
            column[y] = data[y * stride + x];
        }
        haar_step(&mut column, &mut scratch);
        for y in 0..height {
            data[y * stride + x] = column[y];
        }
    }
}

fn haar_inverse(data: &mut [f64], stride: usize, width: usize, height: usize) {
    let mut scratch = vec![0.0; width.max(height)];
    let mut column = vec![0.0; height];
    for x in 0..width {
        for y in 0..height {
            column[y] = data[y * stride + x];
        }
        haar_step_inverse(&mut column, &mut scratch);
        for y in 0..height {
            data[y * stride + x] = column[y];
        }
    }
    for y in 0..height {
        haar_step_inverse(&mut data[y * stride..y * stride + width], &mut scratch);
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    value.signum() * (value.abs() - threshold).max(0.0)
}

/// Denoise one channel; the noise level is estimated from the channel itself.
fn denoise_plane(
    plane: &[f64],
    width: usize,
    height: usize,
    levels: u32,
    method: ShrinkMethod,
) -> Vec<f64> {
    let sigma = estimate_sigma(plane, width, height);
    if sigma < MIN_SIGMA {
        return plane.to_vec();
    }
    let mut padded = Padded::new(plane, width, height, levels);
    let stride = padded.width;
    for level in 0..levels {
        haar_forward(
            &mut padded.data,
            stride,
            padded.width >> level,
            padded.height >> level,
        );
    }

    let universal = sigma * (2.0 * ((width * height) as f64).ln()).sqrt();
    for level in 0..levels {
        let (bw, bh) = (padded.width >> level, padded.height >> level);
        let (hw, hh) = (bw / 2, bh / 2);
        for (x0, y0) in [(hw, 0), (0, hh), (hw, hh)] {
            let threshold = match method {
                ShrinkMethod::VisuShrink => universal,
                ShrinkMethod::BayesShrink => {
                    let (sum_sq, count) = band(&padded, x0, y0, hw, hh)
                        .fold((0.0, 0usize), |(s, n), c| (s + c * c, n + 1));
                    let variance = sum_sq / count.max(1) as f64;
                    let signal = (variance - sigma * sigma).max(f64::EPSILON).sqrt();
                    sigma * sigma / signal
                }
            };
            for y in y0..y0 + hh {
                for x in x0..x0 + hw {
                    let c = &mut padded.data[y * stride + x];
                    *c = soft_threshold(*c, threshold);
                }
            }
        }
    }

    for level in (0..levels).rev() {
        haar_inverse(
            &mut padded.data,
            stride,
            padded.width >> level,
            padded.height >> level,
        );
    }
    padded.crop(width, height)
}
