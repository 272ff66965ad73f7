// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hierarchy walker — depth-first traversal from the page down to the level of
// operation.
//
// Nodes above the level of operation only have their image resolved, as the
// cropping base for their children. Nodes at the level of operation are handed
// to the operation and their results to the provenance recorder. Only text
// regions are descended into.

use bildwerk_core::{FeatureSet, Level, Query};
use bildwerk_document::{
    AlternativeImage, Glyph, ImageResolver, Page, Region, ResolvedImage, Segment, TextLine, Word,
};
use bildwerk_ops::{Operation, OperationContext};
use tracing::{error, instrument, warn};

use crate::recorder::ProvenanceRecorder;

/// What happened to one visited node.
#[derive(Debug, Clone, PartialEq)]
pub enum VisitOutcome {
    /// The operation succeeded and a derived image was appended.
    Recorded {
        image_id: String,
        filename: String,
        features: FeatureSet,
    },
    /// The operation ran but produced nothing to record, or failed.
    Skipped { reason: String },
    /// No image could be resolved; the node and its subtree were skipped.
    ResolutionFailed { reason: String },
}

/// One visited node, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub level: Level,
    pub node_id: String,
    pub outcome: VisitOutcome,
}

/// A segment the walker can descend from.
trait Node: Segment {
    type Child: Node;
    /// Plural name of the children, for warnings.
    const CHILDREN: &'static str;

    fn children_mut(&mut self) -> &mut [Self::Child];
}

impl Node for Region {
    type Child = TextLine;
    const CHILDREN: &'static str = "text lines";

    fn children_mut(&mut self) -> &mut [TextLine] {
        &mut self.lines
    }
}

impl Node for TextLine {
    type Child = Word;
    const CHILDREN: &'static str = "words";

    fn children_mut(&mut self) -> &mut [Word] {
        &mut self.words
    }
}

impl Node for Word {
    type Child = Glyph;
    const CHILDREN: &'static str = "glyphs";

    fn children_mut(&mut self) -> &mut [Glyph] {
        &mut self.glyphs
    }
}

// Glyphs are the deepest level: the walker always stops there.
impl Node for Glyph {
    type Child = Glyph;
    const CHILDREN: &'static str = "glyphs";

    fn children_mut(&mut self) -> &mut [Glyph] {
        &mut []
    }
}

/// Applies one operation to every node of one level of a page.
pub struct HierarchyWalker<'a> {
    recorder: ProvenanceRecorder<'a>,
    operation: &'a Operation,
    query: &'a Query,
    stop_level: Level,
    dpi: f32,
    visits: Vec<Visit>,
}

impl<'a> HierarchyWalker<'a> {
    pub fn new(
        recorder: ProvenanceRecorder<'a>,
        operation: &'a Operation,
        query: &'a Query,
        stop_level: Level,
        dpi: f32,
    ) -> Self {
        Self {
            recorder,
            operation,
            query,
            stop_level,
            dpi,
            visits: Vec::new(),
        }
    }

    /// Walk `page` and return one visit per processed (or failed) node.
    #[instrument(skip_all, fields(page = %page.id, level = %self.stop_level))]
    pub fn walk(mut self, page: &mut Page) -> Vec<Visit> {
        let where_ = format!("page '{}'", page.id);
        let resolution = ImageResolver::new(self.recorder.store()).resolve_page(page, self.query);
        let resolved = match resolution {
            Ok(resolved) => resolved,
            Err(err) => {
                self.resolution_failed(Level::Page, &page.id, &where_, err.to_string());
                return self.visits;
            }
        };

        if self.stop_level == Level::Page {
            let id = page.id.clone();
            self.process(Level::Page, &id, &where_, &mut page.alternative_images, &resolved);
            return self.visits;
        }

        if !page.has_text_regions() {
            warn!("{where_} contains no text regions");
            return self.visits;
        }
        for region in page.text_regions_mut() {
            self.walk_segment(region, &resolved);
        }
        self.visits
    }

    fn walk_segment<S: Node>(&mut self, node: &mut S, parent: &ResolvedImage) {
        let level = node.level();
        let where_ = format!("{} '{}'", level, node.id());
        let resolution =
            ImageResolver::new(self.recorder.store()).resolve_segment(&*node, parent, self.query);
        let resolved = match resolution {
            Ok(resolved) => resolved,
            Err(err) => {
                let id = node.id().to_owned();
                self.resolution_failed(level, &id, &where_, err.to_string());
                return;
            }
        };

        if level >= self.stop_level {
            let id = node.id().to_owned();
            self.process(level, &id, &where_, node.alternative_images_mut(), &resolved);
            return;
        }

        let children = node.children_mut();
        if children.is_empty() {
            warn!("{where_} contains no {}", S::CHILDREN);
            return;
        }
        for child in children {
            self.walk_segment(child, &resolved);
        }
    }

    fn resolution_failed(&mut self, level: Level, node_id: &str, where_: &str, reason: String) {
        error!(%reason, "cannot resolve image of {where_}; skipping it and everything below");
        self.visits.push(Visit {
            level,
            node_id: node_id.to_owned(),
            outcome: VisitOutcome::ResolutionFailed { reason },
        });
    }

    fn process(
        &mut self,
        level: Level,
        node_id: &str,
        where_: &str,
        history: &mut Vec<AlternativeImage>,
        resolved: &ResolvedImage,
    ) {
        let ctx = OperationContext::new(self.dpi, where_, self.recorder.image_id(level, node_id));
        let outcome = self
            .operation
            .run(&resolved.image, &ctx)
            .and_then(|result| {
                self.recorder
                    .record(level, node_id, history, result, &resolved.features)
            })
            .unwrap_or_else(|err| {
                error!(error = %err, "operation failed on {where_}");
                VisitOutcome::Skipped {
                    reason: err.to_string(),
                }
            });
        self.visits.push(Visit {
            level,
            node_id: node_id.to_owned(),
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bildwerk_document::{MemoryStore, Polygon, RegionKind};
    use bildwerk_ops::{ImageOperation, OperationKind};
    use image::{DynamicImage, GrayImage, Luma};
    use serde_json::{Map, Value, json};

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        let img = GrayImage::from_fn(100, 60, |x, y| Luma([if (x + y) % 7 == 0 { 10 } else { 240 }]));
        store.insert("IMG/0001.png", DynamicImage::ImageLuma8(img));
        store
    }

    fn line(id: &str, y: i32) -> TextLine {
        TextLine {
            id: id.into(),
            coords: Polygon::rect(5, y, 80, 8),
            alternative_images: Vec::new(),
            words: Vec::new(),
        }
    }

    fn page() -> Page {
        Page {
            id: "p1".into(),
            image_filename: "IMG/0001.png".into(),
            image_width: 100,
            image_height: 60,
            image_resolution: None,
            border: None,
            orientation: None,
            alternative_images: Vec::new(),
            regions: vec![
                Region {
                    id: "r1".into(),
                    kind: RegionKind::Text,
                    coords: Polygon::rect(0, 0, 100, 30),
                    orientation: None,
                    alternative_images: Vec::new(),
                    lines: vec![line("r1l1", 2), line("r1l2", 15)],
                },
                Region {
                    id: "img".into(),
                    kind: RegionKind::Image,
                    coords: Polygon::rect(0, 30, 100, 30),
                    orientation: None,
                    alternative_images: Vec::new(),
                    lines: Vec::new(),
                },
                Region {
                    id: "r2".into(),
                    kind: RegionKind::Text,
                    coords: Polygon::rect(0, 30, 100, 30),
                    orientation: None,
                    alternative_images: Vec::new(),
                    lines: Vec::new(),
                },
            ],
            metadata: Vec::new(),
        }
    }

    fn operation(kind: OperationKind, params: Value) -> Operation {
        let Value::Object(map) = params else {
            return Operation::from_params(kind, Map::new()).unwrap();
        };
        Operation::from_params(kind, map).unwrap()
    }

    fn walk(store: &mut MemoryStore, page: &mut Page, op: &Operation, level: Level) -> Vec<Visit> {
        let query = op.default_query();
        let recorder = ProvenanceRecorder::new(store, op, "OUT_0001", None);
        HierarchyWalker::new(recorder, op, &query, level, 300.0).walk(page)
    }

    #[test]
    fn visits_only_the_level_of_operation() {
        let mut store = store();
        let mut page = page();
        let op = operation(OperationKind::Binarize, json!({ "method": "otsu" }));
        let visits = walk(&mut store, &mut page, &op, Level::Line);

        let ids: Vec<&str> = visits.iter().map(|v| v.node_id.as_str()).collect();
        assert_eq!(ids, vec!["r1l1", "r1l2"]);
        assert!(visits.iter().all(|v| v.level == Level::Line));
        assert!(page.alternative_images.is_empty());
        assert!(page.regions[0].alternative_images.is_empty());
        assert_eq!(page.regions[0].lines[0].alternative_images.len(), 1);
        assert_eq!(
            page.regions[0].lines[1].alternative_images[0].filename,
            "OUT_0001.IMG-BIN_r1l2.png"
        );
    }

    #[test]
    fn non_text_regions_are_not_processed() {
        let mut store = store();
        let mut page = page();
        let op = operation(OperationKind::Binarize, json!({ "method": "otsu" }));
        let visits = walk(&mut store, &mut page, &op, Level::Region);
        let ids: Vec<&str> = visits.iter().map(|v| v.node_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert!(page.regions[1].alternative_images.is_empty());
    }

    #[test]
    fn page_level_records_on_the_page() {
        let mut store = store();
        let mut page = page();
        let op = operation(OperationKind::Binarize, json!({ "method": "otsu" }));
        let visits = walk(&mut store, &mut page, &op, Level::Page);
        assert_eq!(visits.len(), 1);
        match &visits[0].outcome {
            VisitOutcome::Recorded { image_id, features, .. } => {
                assert_eq!(image_id, "OUT_0001.IMG-BIN");
                assert_eq!(features, &FeatureSet::parse("binarized"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(page.alternative_images.len(), 1);
    }

    #[test]
    fn second_run_is_filtered_out() {
        let mut store = store();
        let mut page = page();
        let op = operation(OperationKind::Binarize, json!({ "method": "otsu" }));
        walk(&mut store, &mut page, &op, Level::Page);
        let visits = walk(&mut store, &mut page, &op, Level::Page);

        assert!(matches!(
            visits[0].outcome,
            VisitOutcome::ResolutionFailed { .. }
        ));
        assert_eq!(page.alternative_images.len(), 1, "history only grows on success");
    }

    #[test]
    fn failed_ancestor_skips_its_subtree() {
        let mut store = store();
        let mut page = page();
        page.regions[0].alternative_images.push(AlternativeImage {
            filename: "BIN/r1.png".into(),
            features: FeatureSet::parse("binarized"),
        });
        let op = operation(OperationKind::Binarize, json!({ "method": "otsu" }));
        let visits = walk(&mut store, &mut page, &op, Level::Line);

        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].node_id, "r1");
        assert_eq!(visits[0].level, Level::Region);
        assert!(matches!(
            visits[0].outcome,
            VisitOutcome::ResolutionFailed { .. }
        ));
        assert!(page.regions[0].lines.iter().all(|l| l.alternative_images.is_empty()));
    }

    #[test]
    fn despeckle_crops_from_binarized_page() {
        let mut store = store();
        let mut page = page();
        let binarize = operation(OperationKind::Binarize, json!({ "method": "otsu" }));
        walk(&mut store, &mut page, &binarize, Level::Page);
        let despeckle = operation(OperationKind::Despeckle, json!({}));
        let visits = walk(&mut store, &mut page, &despeckle, Level::Line);

        assert_eq!(visits.len(), 2);
        let history = &page.regions[0].lines[0].alternative_images;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].features, FeatureSet::parse("binarized,despeckled"));
        assert_eq!(history[0].filename, "OUT_0001.IMG-DEN_r1l1.png");
        assert_eq!(page.alternative_images.len(), 1);
    }

    #[test]
    fn region_without_lines_yields_no_visits() {
        let mut store = store();
        let mut page = page();
        page.regions.reverse();
        let op = operation(OperationKind::Binarize, json!({ "method": "otsu" }));
        let visits = walk(&mut store, &mut page, &op, Level::Line);

        let ids: Vec<&str> = visits.iter().map(|v| v.node_id.as_str()).collect();
        assert_eq!(ids, vec!["r1l1", "r1l2"]);
        assert!(page.regions[0].alternative_images.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn operation_errors_become_skips() {
        let mut store = store();
        let mut page = page();
        let op = operation(
            OperationKind::Shell,
            json!({ "command": "exit 0 # @INFILE @OUTFILE", "output_feature_added": "x" }),
        );
        let visits = walk(&mut store, &mut page, &op, Level::Page);
        assert_eq!(visits.len(), 1);
        let VisitOutcome::Skipped { reason } = &visits[0].outcome else {
            panic!("unexpected {:?}", visits[0].outcome);
        };
        assert!(reason.contains("produced no readable image"), "{reason}");
        assert!(page.alternative_images.is_empty());
    }
}
