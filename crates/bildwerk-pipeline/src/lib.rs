// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// bildwerk-pipeline — Runs one configured operation over page documents.
//
// The processor validates the configuration once, then for every document
// walks the hierarchy down to the level of operation, resolves each node's
// image, applies the operation, and records the result as a new derived
// image in the node's history.

pub mod processor;
pub mod recorder;
pub mod walker;

pub use processor::{Processor, ProcessorConfig, RunSummary, make_file_id};
pub use recorder::ProvenanceRecorder;
pub use walker::{HierarchyWalker, Visit, VisitOutcome};
