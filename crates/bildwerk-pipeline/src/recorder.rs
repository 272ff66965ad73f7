// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Provenance recorder — persists operation results and appends them to the
// history of the node they were computed for.

use bildwerk_core::error::Result;
use bildwerk_core::{FeatureSet, ImageMime, Level};
use bildwerk_document::{AlternativeImage, ImageStore};
use bildwerk_ops::{ImageOperation, OperationResult};
use tracing::{debug, info};

use crate::walker::VisitOutcome;

/// Writes derived images for one document.
pub struct ProvenanceRecorder<'a> {
    store: &'a mut dyn ImageStore,
    file_id: String,
    page_id: Option<String>,
    suffix: String,
    mime: ImageMime,
}

impl<'a> ProvenanceRecorder<'a> {
    pub fn new(
        store: &'a mut dyn ImageStore,
        operation: &dyn ImageOperation,
        file_id: impl Into<String>,
        page_id: Option<String>,
    ) -> Self {
        Self {
            store,
            file_id: file_id.into(),
            page_id,
            suffix: operation.id_suffix(),
            mime: operation.output_mime(),
        }
    }

    /// Read access to the underlying store, for resolving images.
    pub fn store(&self) -> &dyn ImageStore {
        &*self.store
    }

    /// Identifier of the image produced for a node.
    ///
    /// The page's image is `{file_id}{suffix}`; every other node appends its
    /// own identifier: `{file_id}{suffix}_{node_id}`.
    pub fn image_id(&self, level: Level, node_id: &str) -> String {
        match level {
            Level::Page => format!("{}{}", self.file_id, self.suffix),
            _ => format!("{}{}_{}", self.file_id, self.suffix, node_id),
        }
    }

    /// Persist a successful result and append it to `history`.
    ///
    /// A skip is passed through without touching the store or the history.
    /// The new record's features are `effective` plus the features the
    /// operation added.
    pub fn record(
        &mut self,
        level: Level,
        node_id: &str,
        history: &mut Vec<AlternativeImage>,
        result: OperationResult,
        effective: &FeatureSet,
    ) -> Result<VisitOutcome> {
        let (image, features_added) = match result {
            OperationResult::Skip { reason } => {
                debug!(level = %level, node = node_id, %reason, "nothing to record");
                return Ok(VisitOutcome::Skipped { reason });
            }
            OperationResult::Success {
                image,
                features_added,
            } => (image, features_added),
        };

        let image_id = self.image_id(level, node_id);
        let features = effective.union(&features_added);
        let filename = self
            .store
            .save(&image_id, &image, self.mime, self.page_id.as_deref())?;
        history.push(AlternativeImage {
            filename: filename.clone(),
            features: features.clone(),
        });
        info!(
            level = %level,
            node = node_id,
            image_id = %image_id,
            features = %features,
            "recorded derived image"
        );
        Ok(VisitOutcome::Recorded {
            image_id,
            filename,
            features,
        })
    }
}
