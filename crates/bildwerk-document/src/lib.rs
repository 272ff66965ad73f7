// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// bildwerk-document — The segmented page model and everything needed to pick
// an image for one of its nodes.
//
// Provides the page → region → line → word → glyph hierarchy with per-node
// derived-image history, coordinate geometry, cropping/rotation of rasters,
// the image resolver (history lookup with geometric fallback), and the image
// store seam with an on-disk workspace and an in-memory implementation.

pub mod geometry;
pub mod image;
pub mod model;
pub mod resolver;
pub mod store;
pub mod workspace;

// Re-export the primary structs so callers can use `bildwerk_document::Page` etc.
pub use geometry::{CoordTransform, Point, Polygon};
pub use crate::image::processor::ImageProcessor;
pub use model::{
    AlternativeImage, Glyph, MetadataItem, Page, PageDocument, Region, RegionKind, Segment,
    TextLine, Word,
};
pub use resolver::{ImageResolver, ResolvedImage};
pub use store::{ImageStore, MemoryStore};
pub use workspace::{FileEntry, Manifest, Workspace};
