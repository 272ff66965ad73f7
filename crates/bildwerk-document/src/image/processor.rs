// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — segment cropping, polygon masking, deskew rotation and
// encoding. Operates on in-memory images using the `image` and `imageproc`
// crates.

use bildwerk_core::error::BildwerkError;
use bildwerk_core::ImageMime;
use image::{DynamicImage, ImageBuffer, ImageReader, Luma, Pixel, Rgba};
use imageproc::geometric_transformations::{self, Interpolation};
use tracing::{debug, info, instrument};

use crate::geometry::{PixelBox, polygon_contains};

/// Geometric processing of a single in-memory image.
///
/// All operations are non-destructive: each method consumes `self` and returns a
/// new `ImageProcessor` wrapping the transformed image, enabling method chaining.
///
/// ```ignore
/// let segment = ImageProcessor::from_dynamic(page_image)
///     .crop(bbox)
///     .mask_outside(&polygon)
///     .rotate(1.5)
///     .into_dynamic();
/// ```
pub struct ImageProcessor {
    /// The current working image.
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path. The format is detected from the file
    /// contents, not the extension.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, BildwerkError> {
        let open_err = |err: &dyn std::fmt::Display| {
            BildwerkError::ImageError(format!(
                "failed to open {}: {}",
                path.as_ref().display(),
                err
            ))
        };
        let img = ImageReader::open(path.as_ref())
            .map_err(|e| open_err(&e))?
            .with_guessed_format()
            .map_err(|e| open_err(&e))?
            .decode()
            .map_err(|e| open_err(&e))?;
        debug!(width = img.width(), height = img.height(), "Image loaded");
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    /// Current image width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Current image height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Borrow the underlying `DynamicImage`.
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    /// Consume the processor and return the underlying `DynamicImage`.
    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Transformations (consume self, return new Self) -----------------------

    /// Crop to a pixel box. The box is clamped to the image bounds.
    #[instrument(skip(self))]
    pub fn crop(self, bbox: PixelBox) -> Self {
        let img_w = self.image.width();
        let img_h = self.image.height();

        let safe_x = bbox.x0.min(img_w.saturating_sub(1));
        let safe_y = bbox.y0.min(img_h.saturating_sub(1));
        let safe_w = bbox.width().min(img_w - safe_x);
        let safe_h = bbox.height().min(img_h - safe_y);

        debug!(safe_x, safe_y, safe_w, safe_h, "Cropping image");

        let cropped = self.image.crop_imm(safe_x, safe_y, safe_w, safe_h);
        Self { image: cropped }
    }

    /// Paint every pixel whose centre lies outside `polygon` white.
    ///
    /// `polygon` is given in this image's pixel coordinates.
    pub fn mask_outside(self, polygon: &[(f64, f64)]) -> Self {
        let image = match self.image {
            DynamicImage::ImageLuma8(mut buf) => {
                fill_outside(&mut buf, polygon, Luma([255u8]));
                DynamicImage::ImageLuma8(buf)
            }
            other => {
                let had_alpha = other.color().has_alpha();
                let mut buf = other.to_rgba8();
                fill_outside(&mut buf, polygon, Rgba([255u8, 255, 255, 255]));
                restore_alpha_mode(buf, had_alpha)
            }
        };
        Self { image }
    }

    /// Rotate the image counter-clockwise by `degrees` about its centre.
    ///
    /// The canvas keeps its size so that every image of a segment shares one
    /// pixel space; corners uncovered by the rotation are filled white.
    #[instrument(skip(self), fields(degrees))]
    pub fn rotate(self, degrees: f64) -> Self {
        let normalised = degrees.rem_euclid(360.0);
        if normalised.abs() < 0.01 || (normalised - 360.0).abs() < 0.01 {
            return self;
        }
        if (normalised - 180.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate180(),
            };
        }

        info!(degrees, "Rotating image");
        // imageproc turns clockwise for positive angles.
        let theta = -(degrees.to_radians() as f32);
        let image = match self.image {
            DynamicImage::ImageLuma8(buf) => {
                DynamicImage::ImageLuma8(geometric_transformations::rotate_about_center(
                    &buf,
                    theta,
                    Interpolation::Bilinear,
                    Luma([255u8]),
                ))
            }
            other => {
                let had_alpha = other.color().has_alpha();
                let rotated = geometric_transformations::rotate_about_center(
                    &other.to_rgba8(),
                    theta,
                    Interpolation::Bilinear,
                    Rgba([255u8, 255, 255, 255]),
                );
                restore_alpha_mode(rotated, had_alpha)
            }
        };
        Self { image }
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image in the given format.
    ///
    /// Formats without alpha or 16-bit support get an 8-bit gray or RGB copy.
    pub fn encode(&self, mime: ImageMime) -> Result<Vec<u8>, BildwerkError> {
        let converted;
        let image = match mime {
            ImageMime::Jpeg | ImageMime::Pnm | ImageMime::Bmp => {
                converted = if self.image.color().has_color() {
                    DynamicImage::ImageRgb8(self.image.to_rgb8())
                } else {
                    DynamicImage::ImageLuma8(self.image.to_luma8())
                };
                &converted
            }
            ImageMime::Png | ImageMime::Tiff => &self.image,
        };
        encode_to_format(image, mime)
    }

    /// Write the image to a file in the given format.
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
        mime: ImageMime,
    ) -> Result<(), BildwerkError> {
        let bytes = self.encode(mime)?;
        std::fs::write(path.as_ref(), bytes).map_err(|err| {
            BildwerkError::ImageError(format!(
                "failed to save image to {}: {}",
                path.as_ref().display(),
                err
            ))
        })
    }
}

fn fill_outside<P: Pixel>(
    buf: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    polygon: &[(f64, f64)],
    fill: P,
) {
    for (x, y, pixel) in buf.enumerate_pixels_mut() {
        if !polygon_contains(polygon, x as f64 + 0.5, y as f64 + 0.5) {
            *pixel = fill;
        }
    }
}

fn restore_alpha_mode(
    buf: ImageBuffer<Rgba<u8>, Vec<u8>>,
    had_alpha: bool,
) -> DynamicImage {
    let rgba = DynamicImage::ImageRgba8(buf);
    if had_alpha {
        rgba
    } else {
        DynamicImage::ImageRgb8(rgba.to_rgb8())
    }
}

/// Encode a `DynamicImage` into the specified format, returning the raw bytes.
fn encode_to_format(image: &DynamicImage, mime: ImageMime) -> Result<Vec<u8>, BildwerkError> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image
        .write_to(&mut cursor, mime.image_format())
        .map_err(|err| {
            BildwerkError::ImageError(format!("{} encoding failed: {}", mime, err))
        })?;
    Ok(buffer)
}
