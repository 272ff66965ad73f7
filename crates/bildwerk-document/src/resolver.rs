// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image resolver — picks the image an operation should see for one node.
//
// 1. The newest entry of the node's history whose features satisfy the query
//    wins.
// 2. A node without any history gets its image by cropping the ancestor image
//    to the node polygon (plus deskewing, when an angle is recorded).
// 3. A node with history but no matching entry cannot be resolved.

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::{FeatureSet, Query};
use image::DynamicImage;
use tracing::{debug, instrument};

use crate::geometry::{CoordTransform, PixelBox, clipped_bbox};
use crate::image::processor::ImageProcessor;
use crate::model::{AlternativeImage, Page, Segment};
use crate::store::ImageStore;

/// Feature added when the page scan is cropped to its border.
pub const FEATURE_CROPPED: &str = "cropped";
/// Feature added when an image is rotated to undo a recorded skew.
pub const FEATURE_DESKEWED: &str = "deskewed";

/// An image chosen for a node, with everything descendants need to crop
/// from it.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub image: DynamicImage,
    /// Maps absolute page coordinates into `image` pixel coordinates.
    pub transform: CoordTransform,
    /// Transformations already applied to `image`.
    pub features: FeatureSet,
    /// Total counter-clockwise rotation (degrees) applied relative to the page.
    pub rotation: f64,
}

/// The newest history entry matching `query`, if any.
pub fn latest_match<'a>(
    history: &'a [AlternativeImage],
    query: &Query,
) -> Option<&'a AlternativeImage> {
    history.iter().rev().find(|record| query.matches(&record.features))
}

/// Resolves node images against an [`ImageStore`].
pub struct ImageResolver<'s> {
    store: &'s dyn ImageStore,
}

impl<'s> ImageResolver<'s> {
    pub fn new(store: &'s dyn ImageStore) -> Self {
        Self { store }
    }

    /// Resolve the page-level image.
    ///
    /// The ancestor of a page is its original scan (no features). Cropping to
    /// the page border adds `cropped`, deskewing adds `deskewed`.
    #[instrument(skip_all, fields(page = %page.id, %query))]
    pub fn resolve_page(&self, page: &Page, query: &Query) -> Result<ResolvedImage> {
        let full = PixelBox {
            x0: 0,
            y0: 0,
            x1: page.image_width,
            y1: page.image_height,
        };
        let bbox = match &page.border {
            Some(border) => {
                let points = CoordTransform::identity().apply_polygon(border);
                clipped_bbox(&points, page.image_width, page.image_height)
            }
            None => full,
        };
        if bbox.is_empty() {
            return Err(BildwerkError::ImageError(format!(
                "page '{}' has an empty border",
                page.id
            )));
        }
        let angle = deskew_angle(page.orientation, 0.0);
        let transform = frame_transform(&CoordTransform::identity(), bbox, angle);
        let rotation = angle.unwrap_or(0.0);

        if let Some(record) = latest_match(&page.alternative_images, query) {
            debug!(filename = %record.filename, features = %record.features, "using derived page image");
            return Ok(ResolvedImage {
                image: self.store.load(&record.filename)?,
                transform,
                features: record.features.clone(),
                rotation,
            });
        }
        if !page.alternative_images.is_empty() {
            return Err(unresolved(&format!("page '{}'", page.id), query));
        }

        let mut features = FeatureSet::new();
        let mut processor = ImageProcessor::from_dynamic(self.store.load(&page.image_filename)?);
        if let Some(border) = &page.border {
            let local = CoordTransform::shift(-(bbox.x0 as f64), -(bbox.y0 as f64))
                .apply_polygon(border);
            processor = processor.crop(bbox).mask_outside(&local);
            features.insert(FEATURE_CROPPED);
        }
        if let Some(angle) = angle {
            processor = processor.rotate(angle);
            features.insert(FEATURE_DESKEWED);
        }
        if !query.matches(&features) {
            return Err(unresolved(&format!("page '{}'", page.id), query));
        }
        debug!(features = %features, "derived page image from original scan");
        Ok(ResolvedImage {
            image: processor.into_dynamic(),
            transform,
            features,
            rotation,
        })
    }

    /// Resolve the image of a segment below `parent`.
    ///
    /// Derived images inherit the parent's features; a recorded skew that
    /// differs from the parent's adds `deskewed`.
    #[instrument(skip_all, fields(level = %segment.level(), segment = segment.id(), %query))]
    pub fn resolve_segment<S: Segment + ?Sized>(
        &self,
        segment: &S,
        parent: &ResolvedImage,
        query: &Query,
    ) -> Result<ResolvedImage> {
        let where_ = format!("{} '{}'", segment.level(), segment.id());
        let polygon = parent.transform.apply_polygon(segment.coords());
        let bbox = clipped_bbox(&polygon, parent.image.width(), parent.image.height());
        if bbox.is_empty() {
            return Err(BildwerkError::ImageError(format!(
                "{where_} lies outside its parent image"
            )));
        }
        let angle = deskew_angle(segment.orientation(), parent.rotation);
        let transform = frame_transform(&parent.transform, bbox, angle);
        let rotation = segment.orientation().unwrap_or(parent.rotation);

        let history = segment.alternative_images();
        if let Some(record) = latest_match(history, query) {
            debug!(filename = %record.filename, features = %record.features, "using derived segment image");
            return Ok(ResolvedImage {
                image: self.store.load(&record.filename)?,
                transform,
                features: record.features.clone(),
                rotation,
            });
        }
        if !history.is_empty() {
            return Err(unresolved(&where_, query));
        }

        let shift = CoordTransform::shift(-(bbox.x0 as f64), -(bbox.y0 as f64));
        let local: Vec<(f64, f64)> = polygon.iter().map(|&(x, y)| shift.apply(x, y)).collect();
        let mut processor = ImageProcessor::from_dynamic(parent.image.clone())
            .crop(bbox)
            .mask_outside(&local);
        let mut features = parent.features.clone();
        if let Some(angle) = angle {
            processor = processor.rotate(angle);
            features.insert(FEATURE_DESKEWED);
        }
        if !query.matches(&features) {
            return Err(unresolved(&where_, query));
        }
        Ok(ResolvedImage {
            image: processor.into_dynamic(),
            transform,
            features,
            rotation,
        })
    }
}

/// Rotation still to apply for a node with skew `orientation` whose parent
/// image is already rotated by `applied`. `None` when nothing is left to do.
fn deskew_angle(orientation: Option<f64>, applied: f64) -> Option<f64> {
    let delta = orientation? - applied;
    (delta.abs() >= 0.01).then_some(delta)
}

/// Transform of an image cropped to `bbox` from an image with transform
/// `parent`, then rotated by `angle` about its centre.
fn frame_transform(parent: &CoordTransform, bbox: PixelBox, angle: Option<f64>) -> CoordTransform {
    let cropped = parent.then(&CoordTransform::shift(-(bbox.x0 as f64), -(bbox.y0 as f64)));
    match angle {
        Some(angle) => cropped.then(&CoordTransform::rotation(
            angle,
            bbox.width() as f64 / 2.0,
            bbox.height() as f64 / 2.0,
        )),
        None => cropped,
    }
}

fn unresolved(node: &str, query: &Query) -> BildwerkError {
    BildwerkError::FeatureResolution {
        node: node.to_owned(),
        selector: query.selector.to_string(),
        filter: query.filter.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use crate::model::{Region, RegionKind, TextLine};
    use crate::store::MemoryStore;
    use image::{GrayImage, Luma};

    /// 100x50 page whose pixel value encodes the x coordinate.
    fn gradient_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        let img = GrayImage::from_fn(100, 50, |x, _| Luma([x as u8]));
        store.insert("IMG/page.png", DynamicImage::ImageLuma8(img));
        store
    }

    fn page() -> Page {
        Page {
            id: "p1".into(),
            image_filename: "IMG/page.png".into(),
            image_width: 100,
            image_height: 50,
            image_resolution: None,
            border: None,
            orientation: None,
            alternative_images: Vec::new(),
            regions: Vec::new(),
            metadata: Vec::new(),
        }
    }

    fn region(history: Vec<AlternativeImage>) -> Region {
        Region {
            id: "r1".into(),
            kind: RegionKind::Text,
            coords: Polygon::rect(20, 10, 40, 20),
            orientation: None,
            alternative_images: history,
            lines: Vec::new(),
        }
    }

    fn record(filename: &str, features: &str) -> AlternativeImage {
        AlternativeImage {
            filename: filename.into(),
            features: FeatureSet::parse(features),
        }
    }

    #[test]
    fn empty_history_crops_from_parent() {
        let store = gradient_store();
        let resolver = ImageResolver::new(&store);
        let page_img = resolver.resolve_page(&page(), &Query::any()).expect("page");
        assert!(page_img.features.is_empty());

        let seg = resolver
            .resolve_segment(&region(Vec::new()), &page_img, &Query::any())
            .expect("region");
        assert_eq!((seg.image.width(), seg.image.height()), (40, 20));
        assert!(seg.features.is_empty());
        assert_eq!(seg.image.to_luma8().get_pixel(0, 0).0[0], 20);
    }

    #[test]
    fn nested_segments_use_parent_pixel_space() {
        let store = gradient_store();
        let resolver = ImageResolver::new(&store);
        let page_img = resolver.resolve_page(&page(), &Query::any()).expect("page");
        let region_img = resolver
            .resolve_segment(&region(Vec::new()), &page_img, &Query::any())
            .expect("region");
        let line = TextLine {
            id: "r1l1".into(),
            coords: Polygon::rect(30, 15, 20, 10),
            alternative_images: Vec::new(),
            words: Vec::new(),
        };
        let line_img = resolver
            .resolve_segment(&line, &region_img, &Query::any())
            .expect("line");
        assert_eq!((line_img.image.width(), line_img.image.height()), (20, 10));
        assert_eq!(line_img.image.to_luma8().get_pixel(0, 0).0[0], 30);
    }

    #[test]
    fn newest_matching_record_wins() {
        let mut store = gradient_store();
        store.insert("BIN/r1.png", DynamicImage::ImageLuma8(GrayImage::new(40, 20)));
        store.insert("DEN/r1.png", DynamicImage::ImageLuma8(GrayImage::new(40, 20)));
        let history = vec![
            record("BIN/r1.png", "binarized"),
            record("DEN/r1.png", "binarized,despeckled"),
        ];
        let resolver = ImageResolver::new(&store);
        let page_img = resolver.resolve_page(&page(), &Query::any()).expect("page");

        let query = Query::new("binarized", "despeckled");
        let seg = resolver
            .resolve_segment(&region(history.clone()), &page_img, &query)
            .expect("resolve");
        assert_eq!(seg.features, FeatureSet::parse("binarized"));

        let seg = resolver
            .resolve_segment(&region(history.clone()), &page_img, &Query::new("binarized", ""))
            .expect("resolve");
        assert_eq!(seg.features, FeatureSet::parse("binarized,despeckled"));
        assert_eq!(
            latest_match(&history, &query).map(|r| r.filename.as_str()),
            Some("BIN/r1.png")
        );
    }

    #[test]
    fn unmatched_history_is_a_resolution_error() {
        let mut store = gradient_store();
        store.insert("BIN/r1.png", DynamicImage::ImageLuma8(GrayImage::new(40, 20)));
        let resolver = ImageResolver::new(&store);
        let page_img = resolver.resolve_page(&page(), &Query::any()).expect("page");
        let result = resolver.resolve_segment(
            &region(vec![record("BIN/r1.png", "binarized")]),
            &page_img,
            &Query::new("", "binarized"),
        );
        match result {
            Err(BildwerkError::FeatureResolution { node, filter, .. }) => {
                assert_eq!(node, "region 'r1'");
                assert_eq!(filter, "binarized");
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[test]
    fn selector_on_pristine_page_cannot_be_satisfied() {
        let store = gradient_store();
        let resolver = ImageResolver::new(&store);
        let result = resolver.resolve_page(&page(), &Query::new("binarized", ""));
        assert!(matches!(result, Err(BildwerkError::FeatureResolution { .. })));
    }

    #[test]
    fn border_and_orientation_tag_the_page_image() {
        let store = gradient_store();
        let mut p = page();
        p.border = Some(Polygon::rect(10, 5, 80, 40));
        p.orientation = Some(2.0);
        let resolved = ImageResolver::new(&store)
            .resolve_page(&p, &Query::any())
            .expect("page");
        assert_eq!((resolved.image.width(), resolved.image.height()), (80, 40));
        assert_eq!(resolved.features, FeatureSet::parse("cropped,deskewed"));
        assert_eq!(resolved.rotation, 2.0);

        let filtered = ImageResolver::new(&store).resolve_page(&p, &Query::new("", "deskewed"));
        assert!(filtered.is_err());
    }

    #[test]
    fn segment_deskew_is_relative_to_parent() {
        let store = gradient_store();
        let resolver = ImageResolver::new(&store);
        let mut p = page();
        p.orientation = Some(3.0);
        let page_img = resolver.resolve_page(&p, &Query::any()).expect("page");

        let mut same = region(Vec::new());
        same.orientation = Some(3.0);
        let seg = resolver
            .resolve_segment(&same, &page_img, &Query::any())
            .expect("region");
        // Already deskewed by the page; the region inherits the tag only.
        assert_eq!(seg.features, FeatureSet::parse("deskewed"));
        assert_eq!(seg.rotation, 3.0);
    }

    #[test]
    fn segment_outside_parent_is_an_error() {
        let store = gradient_store();
        let resolver = ImageResolver::new(&store);
        let page_img = resolver.resolve_page(&page(), &Query::any()).expect("page");
        let mut far = region(Vec::new());
        far.coords = Polygon::rect(200, 200, 10, 10);
        assert!(matches!(
            resolver.resolve_segment(&far, &page_img, &Query::any()),
            Err(BildwerkError::ImageError(_))
        ));
    }
}
