// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Binarization — global (Otsu, Li, Yen) and local (Gaussian, Niblack, Sauvola)
// thresholding of a grayscale copy of the input.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::{FeatureSet, Query};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::operation::{ImageOperation, OperationContext, OperationResult, success};

/// Dynamic range of the standard deviation in Sauvola's formula.
const SAUVOLA_RANGE: f64 = 127.5;

/// `k` used when the parameter is left at 0.
const DEFAULT_K: f32 = 0.34;

/// Thresholding algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    Otsu,
    Li,
    Yen,
    Gauss,
    Niblack,
    #[default]
    Sauvola,
}

impl ThresholdMethod {
    fn is_local(&self) -> bool {
        matches!(self, Self::Gauss | Self::Niblack | Self::Sauvola)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinarizeParams {
    #[serde(default)]
    pub method: ThresholdMethod,
    /// Side of the local window in pixels; must be odd. 0 means one inch.
    #[serde(default)]
    pub window_size: u32,
    /// Weight of the local standard deviation; 0 means 0.34.
    #[serde(default)]
    pub k: f32,
}

impl Default for BinarizeParams {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::Sauvola,
            window_size: 0,
            k: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binarize {
    params: BinarizeParams,
}

impl Binarize {
    pub fn new(params: BinarizeParams) -> Result<Self> {
        if params.window_size == 1 {
            return Err(BildwerkError::Configuration(
                "window_size must be at least 3".to_owned(),
            ));
        }
        if params.window_size != 0 && params.window_size % 2 == 0 {
            return Err(BildwerkError::Configuration(format!(
                "window_size must be odd, got {}",
                params.window_size
            )));
        }
        if !params.k.is_finite() || params.k < 0.0 {
            return Err(BildwerkError::Configuration(format!(
                "k must not be negative, got {}",
                params.k
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &BinarizeParams {
        &self.params
    }

    /// Effective window size for an image of the given density.
    pub fn window_size(&self, dpi: f32) -> u32 {
        if self.params.window_size > 0 {
            return self.params.window_size;
        }
        let inch = (dpi.round() as u32).max(3);
        if inch % 2 == 0 { inch + 1 } else { inch }
    }

    pub fn k(&self) -> f32 {
        if self.params.k == 0.0 {
            DEFAULT_K
        } else {
            self.params.k
        }
    }

    /// Threshold a grayscale image with the configured method.
    pub fn binarize(&self, gray: &GrayImage, dpi: f32) -> GrayImage {
        let window = self.window_size(dpi);
        let k = f64::from(self.k());
        match self.params.method {
            ThresholdMethod::Otsu => apply_global(gray, otsu_threshold),
            ThresholdMethod::Li => apply_global(gray, li_threshold),
            ThresholdMethod::Yen => apply_global(gray, yen_threshold),
            ThresholdMethod::Gauss => {
                let sigma = (window - 1) as f32 / 6.0;
                let blurred = gaussian_blur_f32(gray, sigma);
                GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
                    binary(gray.get_pixel(x, y).0[0] > blurred.get_pixel(x, y).0[0])
                })
            }
            ThresholdMethod::Niblack => {
                apply_local(gray, window / 2, |mean, std| mean - k * std)
            }
            ThresholdMethod::Sauvola => apply_local(gray, window / 2, |mean, std| {
                mean * (1.0 + k * (std / SAUVOLA_RANGE - 1.0))
            }),
        }
    }
}

impl ImageOperation for Binarize {
    fn name(&self) -> &'static str {
        "bildwerk-binarize"
    }

    fn default_query(&self) -> Query {
        Query::new("", "binarized")
    }

    fn feature_added(&self) -> FeatureSet {
        FeatureSet::parse("binarized")
    }

    fn id_suffix(&self) -> String {
        ".IMG-BIN".to_owned()
    }

    #[instrument(skip_all, fields(node = %ctx.label, method = ?self.params.method))]
    fn apply(&self, image: &DynamicImage, ctx: &OperationContext) -> Result<OperationResult> {
        if self.params.method.is_local() {
            info!(window_size = self.window_size(ctx.dpi), k = self.k(), "binarizing");
        } else {
            info!("binarizing");
        }
        let output = self.binarize(&image.to_luma8(), ctx.dpi);
        Ok(success(DynamicImage::ImageLuma8(output), self.feature_added()))
    }
}

fn binary(white: bool) -> Luma<u8> {
    Luma([if white { 255 } else { 0 }])
}

fn histogram(gray: &GrayImage) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    histogram
}

/// Threshold every pixel against one histogram-derived value.
///
/// An image with a single gray value is split at mid-gray instead.
fn apply_global(gray: &GrayImage, method: fn(&[u64; 256]) -> f64) -> GrayImage {
    let histogram = histogram(gray);
    let distinct = histogram.iter().filter(|&&count| count > 0).count();
    let threshold = if distinct < 2 { 127.5 } else { method(&histogram) };
    debug!(threshold, "global threshold computed");

    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        binary(f64::from(gray.get_pixel(x, y).0[0]) > threshold)
    })
}

/// Threshold every pixel against a function of the mean and standard
/// deviation of the square window of `radius` around it.
fn apply_local(gray: &GrayImage, radius: u32, threshold: impl Fn(f64, f64) -> f64) -> GrayImage {
    let (width, height) = gray.dimensions();
    let integral = IntegralImage::new(gray);
    GrayImage::from_fn(width, height, |x, y| {
        let (mean, std) = integral.window_stats(x, y, radius);
        binary(f64::from(gray.get_pixel(x, y).0[0]) > threshold(mean, std))
    })
}

/// Otsu's method: maximise the between-class variance.
fn otsu_threshold(histogram: &[u64; 256]) -> f64 {
    let total_pixels: u64 = histogram.iter().sum();
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background: f64 = 0.0;
    let mut weight_background: u64 = 0;
    let mut max_variance: f64 = 0.0;
    let mut best_threshold = 0usize;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total_pixels - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;

        let between_variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between_variance > max_variance {
            max_variance = between_variance;
            best_threshold = t;
        }
    }

    best_threshold as f64
}

/// Li's iterative minimum cross entropy method.
fn li_threshold(histogram: &[u64; 256]) -> f64 {
    const TOLERANCE: f64 = 0.5;

    let Some(min) = histogram.iter().position(|&c| c > 0) else {
        return 127.5;
    };
    // Shift intensities so the darkest is 0; the logarithms need positive means.
    let class_mean = |range: std::ops::Range<usize>| -> Option<f64> {
        let (mut sum, mut count) = (0.0, 0u64);
        for value in range.start.max(min)..range.end {
            sum += (value - min) as f64 * histogram[value] as f64;
            count += histogram[value];
        }
        (count > 0).then(|| sum / count as f64)
    };

    let Some(mut next) = class_mean(0..256) else {
        return 127.5;
    };
    let mut current = -2.0 * TOLERANCE;
    for _ in 0..256 {
        if (next - current).abs() <= TOLERANCE {
            break;
        }
        current = next;
        let split = (min + current.floor().max(0.0) as usize + 1).min(256);
        let (Some(back), Some(fore)) = (class_mean(0..split), class_mean(split..256)) else {
            break;
        };
        if back <= 0.0 {
            break;
        }
        next = (back - fore) / (back.ln() - fore.ln());
    }

    next + min as f64
}

/// Yen's maximum correlation criterion.
fn yen_threshold(histogram: &[u64; 256]) -> f64 {
    let total: u64 = histogram.iter().sum();
    let pmf: Vec<f64> = histogram.iter().map(|&c| c as f64 / total as f64).collect();

    let mut cumulative = [0.0f64; 256];
    let mut cumulative_sq = [0.0f64; 256];
    let (mut p, mut p_sq) = (0.0, 0.0);
    for i in 0..256 {
        p += pmf[i];
        p_sq += pmf[i] * pmf[i];
        cumulative[i] = p;
        cumulative_sq[i] = p_sq;
    }
    let mut tail_sq = [0.0f64; 256];
    let mut acc = 0.0;
    for i in (0..256).rev() {
        acc += pmf[i] * pmf[i];
        tail_sq[i] = acc;
    }

    let mut best = (f64::NEG_INFINITY, 0usize);
    for t in 0..255 {
        let spread = cumulative[t] * (1.0 - cumulative[t]);
        let denominator = cumulative_sq[t] * tail_sq[t + 1];
        if spread <= 0.0 || denominator <= 0.0 {
            continue;
        }
        let criterion = (spread * spread / denominator).ln();
        if criterion > best.0 {
            best = (criterion, t);
        }
    }
    best.1 as f64
}

/// Summed-area tables of the pixel values and their squares.
///
/// Entry `y * (width+1) + x` holds the sum over the rectangle [0, 0) to (x, y)
/// (exclusive on both axes); row and column 0 are zero.
struct IntegralImage {
    width: u32,
    height: u32,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl IntegralImage {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        let stride = (w + 1) as usize;
        let mut sum = vec![0u64; stride * (h + 1) as usize];
        let mut sum_sq = vec![0u64; stride * (h + 1) as usize];

        for y in 0..h {
            let mut row_sum: u64 = 0;
            let mut row_sum_sq: u64 = 0;
            for x in 0..w {
                let value = u64::from(gray.get_pixel(x, y).0[0]);
                row_sum += value;
                row_sum_sq += value * value;
                let idx = (y + 1) as usize * stride + (x + 1) as usize;
                let above = y as usize * stride + (x + 1) as usize;
                sum[idx] = row_sum + sum[above];
                sum_sq[idx] = row_sum_sq + sum_sq[above];
            }
        }

        Self {
            width: w,
            height: h,
            sum,
            sum_sq,
        }
    }

    /// Mean and standard deviation of the window of `radius` centred on
    /// (cx, cy), clamped to the image.
    fn window_stats(&self, cx: u32, cy: u32, radius: u32) -> (f64, f64) {
        let stride = (self.width + 1) as usize;
        let x1 = cx.saturating_sub(radius) as usize;
        let y1 = cy.saturating_sub(radius) as usize;
        let x2 = ((cx + radius + 1) as usize).min(self.width as usize);
        let y2 = ((cy + radius + 1) as usize).min(self.height as usize);

        let area = ((x2 - x1) * (y2 - y1)) as f64;
        let lookup = |table: &[u64]| {
            table[y2 * stride + x2] as f64 - table[y1 * stride + x2] as f64
                - table[y2 * stride + x1] as f64
                + table[y1 * stride + x1] as f64
        };

        let mean = lookup(&self.sum) / area;
        let variance = (lookup(&self.sum_sq) / area - mean * mean).max(0.0);
        (mean, variance.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binarizer(method: ThresholdMethod) -> Binarize {
        Binarize::new(BinarizeParams {
            method,
            ..BinarizeParams::default()
        })
        .unwrap()
    }

    /// Dark text-like strokes on a light background with a brightness ramp.
    fn page_like() -> GrayImage {
        GrayImage::from_fn(60, 40, |x, y| {
            let background = 170 + (x / 4) as u8;
            if (10..14).contains(&x) || (20..23).contains(&y) {
                Luma([background - 140])
            } else {
                Luma([background])
            }
        })
    }

    #[test]
    fn even_window_is_rejected() {
        let result = Binarize::new(BinarizeParams {
            window_size: 24,
            ..BinarizeParams::default()
        });
        assert!(matches!(result, Err(BildwerkError::Configuration(_))));
    }

    #[test]
    fn single_pixel_window_is_rejected() {
        for method in [ThresholdMethod::Gauss, ThresholdMethod::Sauvola] {
            let result = Binarize::new(BinarizeParams {
                method,
                window_size: 1,
                k: 0.0,
            });
            assert!(
                matches!(result, Err(BildwerkError::Configuration(_))),
                "{method:?}"
            );
        }
    }

    #[test]
    fn window_defaults_to_one_inch() {
        let op = binarizer(ThresholdMethod::Sauvola);
        assert_eq!(op.window_size(300.0), 301);
        assert_eq!(op.window_size(301.0), 301);
        assert_eq!(op.k(), DEFAULT_K);
    }

    #[test]
    fn every_method_separates_strokes_from_background() {
        let gray = page_like();
        for method in [
            ThresholdMethod::Otsu,
            ThresholdMethod::Li,
            ThresholdMethod::Yen,
            ThresholdMethod::Gauss,
            ThresholdMethod::Niblack,
            ThresholdMethod::Sauvola,
        ] {
            let out = Binarize::new(BinarizeParams {
                method,
                window_size: 15,
                k: 0.2,
            })
            .unwrap()
            .binarize(&gray, 300.0);
            assert_eq!(out.dimensions(), gray.dimensions(), "{method:?}");
            assert_eq!(out.get_pixel(11, 5).0[0], 0, "{method:?} stroke");
            assert!(
                out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255),
                "{method:?} output is not binary"
            );
        }
    }

    #[test]
    fn global_methods_keep_background_white() {
        let gray = page_like();
        for method in [ThresholdMethod::Otsu, ThresholdMethod::Li, ThresholdMethod::Yen] {
            let out = binarizer(method).binarize(&gray, 300.0);
            assert_eq!(out.get_pixel(40, 5).0[0], 255, "{method:?}");
        }
    }

    #[test]
    fn li_handles_images_without_pure_black() {
        let gray = GrayImage::from_fn(4, 1, |x, _| Luma([if x < 2 { 40 } else { 200 }]));
        let out = binarizer(ThresholdMethod::Li).binarize(&gray, 300.0);
        let values: Vec<u8> = out.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![0, 0, 255, 255]);
    }

    #[test]
    fn uniform_image_keeps_its_tone() {
        let white = GrayImage::from_pixel(8, 8, Luma([250u8]));
        let out = binarizer(ThresholdMethod::Otsu).binarize(&white, 300.0);
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn window_stats_match_direct_computation() {
        let gray = GrayImage::from_fn(5, 5, |x, y| Luma([(x * 10 + y) as u8]));
        let integral = IntegralImage::new(&gray);
        let (mean, std) = integral.window_stats(0, 0, 1);
        let values = [0.0, 1.0, 10.0, 11.0];
        let expected_mean = values.iter().sum::<f64>() / 4.0;
        let expected_var =
            values.iter().map(|v| (v - expected_mean).powi(2)).sum::<f64>() / 4.0;
        assert!((mean - expected_mean).abs() < 1e-9);
        assert!((std - expected_var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn apply_adds_binarized_feature() {
        let op = binarizer(ThresholdMethod::Otsu);
        let ctx = OperationContext::new(300.0, "page 'p1'", "OUT_0001.IMG-BIN");
        let img = DynamicImage::ImageLuma8(page_like());
        match op.apply(&img, &ctx).unwrap() {
            OperationResult::Success { image, features_added } => {
                assert_eq!(features_added, FeatureSet::parse("binarized"));
                assert!(matches!(image, DynamicImage::ImageLuma8(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
