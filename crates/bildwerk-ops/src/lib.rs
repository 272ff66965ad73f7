// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// bildwerk-ops — The image operations Bildwerk can apply to a segment.
//
// Every operation maps one raster to one raster of the same size (or skips
// with a reason). In-process filters cover thresholding, speckle removal,
// wavelet denoising and contrast normalization; the shell operation delegates
// to any command line that reads @INFILE and writes @OUTFILE.

pub mod binarize;
pub mod denoise;
pub mod despeckle;
pub mod normalize;
pub mod operation;
pub mod shell;

pub use binarize::{Binarize, BinarizeParams, ThresholdMethod};
pub use denoise::{Denoise, DenoiseParams, ShrinkMethod};
pub use despeckle::{Despeckle, DespeckleParams};
pub use normalize::{Normalize, NormalizeMethod, NormalizeParams};
pub use operation::{ImageOperation, Operation, OperationContext, OperationKind, OperationResult};
pub use shell::{ShellCommand, ShellParams};
