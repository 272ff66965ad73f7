// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The segmented page model: page → region → line → word → glyph, each node
// carrying its own ordered history of derived (alternative) images.

use bildwerk_core::{FeatureSet, Level};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::Polygon;

/// One derived image attached to a node.
///
/// The position inside the node's `alternative_images` list is the record's
/// sequence index: later entries were produced later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeImage {
    /// Workspace-relative path of the raster.
    pub filename: String,
    /// Transformations already applied to the raster.
    pub features: FeatureSet,
}

/// Provenance entry written once per processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub processor: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Effective parameters of the run.
    pub parameters: serde_json::Value,
}

/// Serialized unit of work: one page plus its document identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDocument {
    pub pc_gts_id: String,
    pub page: Page,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    /// Workspace-relative path of the original page scan.
    pub image_filename: String,
    pub image_width: u32,
    pub image_height: u32,
    /// Pixel density of the scan, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_resolution: Option<f32>,
    /// Page frame; the scan is cropped to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<Polygon>,
    /// Skew in degrees counter-clockwise; the image is rotated to undo it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<f64>,
    #[serde(default)]
    pub alternative_images: Vec<AlternativeImage>,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub metadata: Vec<MetadataItem>,
}

impl Page {
    /// Regions of the `Text` kind, in document order.
    pub fn text_regions_mut(&mut self) -> impl Iterator<Item = &mut Region> {
        self.regions
            .iter_mut()
            .filter(|region| region.kind == RegionKind::Text)
    }

    pub fn has_text_regions(&self) -> bool {
        self.regions.iter().any(|r| r.kind == RegionKind::Text)
    }
}

/// Semantic class of a region. Only `Text` regions are descended into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionKind {
    Text,
    Image,
    LineDrawing,
    Graphic,
    Table,
    Chart,
    Separator,
    Maths,
    Noise,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub kind: RegionKind,
    pub coords: Polygon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<f64>,
    #[serde(default)]
    pub alternative_images: Vec<AlternativeImage>,
    #[serde(default)]
    pub lines: Vec<TextLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub id: String,
    pub coords: Polygon,
    #[serde(default)]
    pub alternative_images: Vec<AlternativeImage>,
    #[serde(default)]
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub id: String,
    pub coords: Polygon,
    #[serde(default)]
    pub alternative_images: Vec<AlternativeImage>,
    #[serde(default)]
    pub glyphs: Vec<Glyph>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Glyph {
    pub id: String,
    pub coords: Polygon,
    #[serde(default)]
    pub alternative_images: Vec<AlternativeImage>,
}

/// Common view of every node below the page.
pub trait Segment {
    fn level(&self) -> Level;
    fn id(&self) -> &str;
    fn coords(&self) -> &Polygon;
    fn alternative_images(&self) -> &[AlternativeImage];
    fn alternative_images_mut(&mut self) -> &mut Vec<AlternativeImage>;

    /// Deskew angle recorded for this node, if any.
    fn orientation(&self) -> Option<f64> {
        None
    }
}

macro_rules! impl_segment {
    ($ty:ty, $level:expr) => {
        impl Segment for $ty {
            fn level(&self) -> Level {
                $level
            }
            fn id(&self) -> &str {
                &self.id
            }
            fn coords(&self) -> &Polygon {
                &self.coords
            }
            fn alternative_images(&self) -> &[AlternativeImage] {
                &self.alternative_images
            }
            fn alternative_images_mut(&mut self) -> &mut Vec<AlternativeImage> {
                &mut self.alternative_images
            }
        }
    };
}

impl_segment!(TextLine, Level::Line);
impl_segment!(Word, Level::Word);
impl_segment!(Glyph, Level::Glyph);

impl Segment for Region {
    fn level(&self) -> Level {
        Level::Region
    }
    fn id(&self) -> &str {
        &self.id
    }
    fn coords(&self) -> &Polygon {
        &self.coords
    }
    fn alternative_images(&self) -> &[AlternativeImage] {
        &self.alternative_images
    }
    fn alternative_images_mut(&mut self) -> &mut Vec<AlternativeImage> {
        &mut self.alternative_images
    }
    fn orientation(&self) -> Option<f64> {
        self.orientation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "pc_gts_id": "OCR-D-IMG_0001",
        "page": {
            "id": "PHYS_0001",
            "image_filename": "OCR-D-IMG/0001.png",
            "image_width": 200,
            "image_height": 100,
            "regions": [
                { "id": "r1", "kind": "Text", "coords": "0,0 100,0 100,50 0,50",
                  "lines": [ { "id": "r1l1", "coords": "0,0 100,0 100,20 0,20",
                    "alternative_images": [
                      { "filename": "OCR-D-BIN/r1l1.png", "features": "cropped,binarized" } ] } ] },
                { "id": "r2", "kind": "Image", "coords": "100,0 200,0 200,100 100,100" }
            ]
        }
    }"#;

    #[test]
    fn deserializes_page_documents() {
        let doc: PageDocument = serde_json::from_str(SAMPLE).expect("parse");
        assert_eq!(doc.page.regions.len(), 2);
        let line = &doc.page.regions[0].lines[0];
        assert_eq!(line.level(), Level::Line);
        assert_eq!(
            line.alternative_images()[0].features,
            FeatureSet::parse("binarized,cropped")
        );
        assert!(doc.page.border.is_none());
    }

    #[test]
    fn text_region_filter_skips_other_kinds() {
        let mut doc: PageDocument = serde_json::from_str(SAMPLE).expect("parse");
        let ids: Vec<String> = doc.page.text_regions_mut().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["r1".to_owned()]);
        assert!(doc.page.has_text_regions());
    }

    #[test]
    fn round_trips_through_json() {
        let doc: PageDocument = serde_json::from_str(SAMPLE).expect("parse");
        let json = serde_json::to_string(&doc).expect("serialize");
        let back: PageDocument = serde_json::from_str(&json).expect("reparse");
        assert_eq!(back, doc);
    }
}
