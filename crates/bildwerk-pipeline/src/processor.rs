// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Processor — one configured operation applied to page documents.
//
// Configuration is validated once, up front; a bad parameter aborts the run
// before any document is touched. Per-node failures never abort a document.

use bildwerk_core::config::DpiSource;
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::{CommonParams, Query};
use bildwerk_document::{ImageStore, MetadataItem, PageDocument, Workspace};
use bildwerk_ops::{ImageOperation, Operation, OperationKind};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::recorder::ProvenanceRecorder;
use crate::walker::{HierarchyWalker, Visit, VisitOutcome};

/// Validated configuration of one run.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub common: CommonParams,
    pub operation: Operation,
    /// Query every node image must satisfy.
    pub query: Query,
    /// Effective parameters, recorded in page metadata.
    pub parameters: Value,
}

/// Counts of visit outcomes over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub documents: usize,
    pub recorded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    fn add(&mut self, visits: &[Visit]) {
        self.documents += 1;
        for visit in visits {
            match visit.outcome {
                VisitOutcome::Recorded { .. } => self.recorded += 1,
                VisitOutcome::Skipped { .. } => self.skipped += 1,
                VisitOutcome::ResolutionFailed { .. } => self.failed += 1,
            }
        }
    }
}

/// Identifier of the output document derived from an input document.
///
/// The input file group inside the identifier is replaced by the output file
/// group; identifiers that do not mention it get the output group prefixed.
pub fn make_file_id(input_id: &str, input_file_grp: &str, output_file_grp: &str) -> String {
    if !input_file_grp.is_empty() && input_id.contains(input_file_grp) {
        input_id.replace(input_file_grp, output_file_grp)
    } else {
        format!("{output_file_grp}_{input_id}")
    }
}

pub struct Processor {
    config: ProcessorConfig,
}

impl Processor {
    /// Validate `params` for the operation `kind`.
    ///
    /// Common keys (`level-of-operation`, `input_feature_selector`,
    /// `input_feature_filter`, `dpi`) are split off; everything else must be a
    /// parameter of the operation.
    #[instrument(skip(params))]
    pub fn new(kind: OperationKind, params: Map<String, Value>) -> Result<Self> {
        let (common, rest) = CommonParams::split_from(params)?;
        let operation = Operation::from_params(kind, rest)?;
        let query = common.query(&operation.default_query());

        let mut parameters = match serde_json::to_value(&common)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(own) = operation.parameters() {
            parameters.extend(own);
        }

        info!(
            level = %common.level_of_operation,
            query = %query,
            "processor configured"
        );
        Ok(Self {
            config: ProcessorConfig {
                common,
                operation,
                query,
                parameters: Value::Object(parameters),
            },
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one page document in place.
    ///
    /// Appends a metadata entry, writes derived images through `store`, and
    /// renames the document to `file_id`.
    #[instrument(skip(self, document, store), fields(page = %document.page.id))]
    pub fn process_document(
        &self,
        document: &mut PageDocument,
        file_id: &str,
        page_id: Option<&str>,
        store: &mut dyn ImageStore,
    ) -> Vec<Visit> {
        let (dpi, source) = self.config.common.resolve_dpi(document.page.image_resolution);
        match source {
            DpiSource::Parameter => info!(dpi, "using dpi from parameters"),
            DpiSource::ImageMetadata => info!(dpi, "using dpi from image metadata"),
            DpiSource::Fallback => info!(dpi, "no usable image resolution, assuming default dpi"),
        }

        let operation = &self.config.operation;
        document.page.metadata.push(MetadataItem {
            processor: operation.name().to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            timestamp: Utc::now(),
            parameters: self.config.parameters.clone(),
        });

        let recorder =
            ProvenanceRecorder::new(store, operation, file_id, page_id.map(str::to_owned));
        let visits = HierarchyWalker::new(
            recorder,
            operation,
            &self.config.query,
            self.config.common.level_of_operation,
            dpi,
        )
        .walk(&mut document.page);

        document.pc_gts_id = file_id.to_owned();
        visits
    }

    /// Process every document of `input_file_grp` and write the results into
    /// the workspace's output file group.
    #[instrument(skip(self, workspace), fields(output_file_grp = %workspace.output_file_grp()))]
    pub fn process_workspace(
        &self,
        workspace: &mut Workspace,
        input_file_grp: &str,
    ) -> Result<RunSummary> {
        let paths = workspace.documents_in(input_file_grp)?;
        if paths.is_empty() {
            warn!("input file group {input_file_grp} contains no page documents");
        }

        let mut summary = RunSummary::default();
        for (n, path) in paths.iter().enumerate() {
            let input_id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| {
                    BildwerkError::Workspace(format!("unusable file name {}", path.display()))
                })?;
            let file_id = make_file_id(input_id, input_file_grp, workspace.output_file_grp());
            let mut document = workspace.load_document(path)?;
            let page_id = workspace
                .manifest()
                .find(input_id)
                .and_then(|entry| entry.page_id.clone())
                .unwrap_or_else(|| document.page.id.clone());
            info!(n, page_id = %page_id, "input file");

            let visits = self.process_document(&mut document, &file_id, Some(&page_id), workspace);
            workspace.save_document(&file_id, &document, Some(&page_id))?;
            summary.add(&visits);
        }
        workspace.save_manifest()?;

        info!(
            documents = summary.documents,
            recorded = summary.recorded,
            skipped = summary.skipped,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bildwerk_core::{FeatureSet, ImageMime, Level};
    use bildwerk_document::{ImageProcessor, MemoryStore, Page, Polygon, Region, RegionKind};
    use image::{DynamicImage, GrayImage, Luma};
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn scan() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(80, 40, |x, _| {
            Luma([if x % 9 < 2 { 15 } else { 235 }])
        }))
    }

    fn document(resolution: Option<f32>) -> PageDocument {
        PageDocument {
            pc_gts_id: "IN_0001".into(),
            page: Page {
                id: "PHYS_0001".into(),
                image_filename: "IN/0001.png".into(),
                image_width: 80,
                image_height: 40,
                image_resolution: resolution,
                border: None,
                orientation: None,
                alternative_images: Vec::new(),
                regions: vec![Region {
                    id: "r1".into(),
                    kind: RegionKind::Text,
                    coords: Polygon::rect(10, 5, 60, 30),
                    orientation: None,
                    alternative_images: Vec::new(),
                    lines: Vec::new(),
                }],
                metadata: Vec::new(),
            },
        }
    }

    #[test]
    fn missing_outfile_placeholder_aborts_setup() {
        let result = Processor::new(
            OperationKind::Shell,
            params(json!({ "command": "cp @INFILE out.png", "output_feature_added": "x" })),
        );
        assert!(matches!(result, Err(BildwerkError::Configuration(_))));
    }

    #[test]
    fn unknown_parameters_abort_setup() {
        let result = Processor::new(OperationKind::Denoise, params(json!({ "strength": 3 })));
        assert!(matches!(result, Err(BildwerkError::Configuration(_))));
        let result = Processor::new(
            OperationKind::Denoise,
            params(json!({ "level-of-operation": "paragraph" })),
        );
        assert!(matches!(result, Err(BildwerkError::Configuration(_))));
    }

    #[test]
    fn user_query_overrides_default() {
        let processor = Processor::new(
            OperationKind::Shell,
            params(json!({
                "command": "cp @INFILE @OUTFILE",
                "input_feature_selector": "binarized",
                "input_feature_filter": "despeckled,deskewed",
                "level-of-operation": "line",
            })),
        )
        .unwrap();
        let config = processor.config();
        assert_eq!(config.query, Query::new("binarized", "despeckled,deskewed"));
        assert_eq!(config.common.level_of_operation, Level::Line);
        assert_eq!(config.parameters["command"], json!("cp @INFILE @OUTFILE"));
        assert_eq!(config.parameters["level-of-operation"], json!("line"));
    }

    #[test]
    fn document_gets_metadata_and_new_id() {
        let processor = Processor::new(
            OperationKind::Binarize,
            params(json!({ "method": "otsu", "level-of-operation": "region" })),
        )
        .unwrap();
        let mut store = MemoryStore::new();
        store.insert("IN/0001.png", scan());
        let mut doc = document(Some(1.0));

        let visits = processor.process_document(&mut doc, "OUT_0001", Some("PHYS_0001"), &mut store);

        assert_eq!(doc.pc_gts_id, "OUT_0001");
        assert_eq!(doc.page.metadata.len(), 1);
        assert_eq!(doc.page.metadata[0].processor, "bildwerk-binarize");
        assert_eq!(doc.page.metadata[0].parameters["method"], json!("otsu"));
        assert_eq!(visits.len(), 1);
        let region = &doc.page.regions[0];
        assert_eq!(region.alternative_images[0].filename, "OUT_0001.IMG-BIN_r1.png");
        assert_eq!(region.alternative_images[0].features, FeatureSet::parse("binarized"));
        let image = store.get("OUT_0001.IMG-BIN_r1.png").expect("stored");
        assert_eq!((image.width(), image.height()), (60, 30));
    }

    #[test]
    fn file_ids_follow_the_output_group() {
        assert_eq!(make_file_id("IN_0001", "IN", "OUT"), "OUT_0001");
        assert_eq!(make_file_id("0001", "IN", "OUT"), "OUT_0001");
    }

    #[test]
    fn workspace_run_writes_documents_images_and_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("IN")).expect("mkdir");
        ImageProcessor::from_dynamic(scan())
            .save(dir.path().join("IN/0001.png"), ImageMime::Png)
            .expect("save scan");
        std::fs::write(
            dir.path().join("IN/IN_0001.json"),
            serde_json::to_string(&document(Some(150.0))).expect("serialize"),
        )
        .expect("write document");

        let processor = Processor::new(
            OperationKind::Binarize,
            params(json!({ "method": "sauvola", "window_size": 15 })),
        )
        .unwrap();
        let mut workspace = Workspace::open(dir.path(), "OUT").expect("open");
        let summary = processor
            .process_workspace(&mut workspace, "IN")
            .expect("run");

        assert_eq!(
            summary,
            RunSummary {
                documents: 1,
                recorded: 1,
                skipped: 0,
                failed: 0
            }
        );
        assert!(dir.path().join("OUT/OUT_0001.json").exists());
        assert!(dir.path().join("OUT/OUT_0001.IMG-BIN.png").exists());

        let reopened = Workspace::open(dir.path(), "OUT").expect("reopen");
        let entry = reopened.manifest().find("OUT_0001.IMG-BIN").expect("image entry");
        assert_eq!(entry.page_id.as_deref(), Some("PHYS_0001"));
        let doc = reopened
            .load_document(&dir.path().join("OUT/OUT_0001.json"))
            .expect("load output");
        assert_eq!(doc.pc_gts_id, "OUT_0001");
        assert_eq!(doc.page.alternative_images[0].filename, "OUT/OUT_0001.IMG-BIN.png");
    }

    #[test]
    fn missing_input_group_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let processor = Processor::new(OperationKind::Normalize, Map::new()).unwrap();
        let mut workspace = Workspace::open(dir.path(), "OUT").expect("open");
        assert!(matches!(
            processor.process_workspace(&mut workspace, "IN"),
            Err(BildwerkError::Workspace(_))
        ));
    }
}
