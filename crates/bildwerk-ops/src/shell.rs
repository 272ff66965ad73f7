// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shell operation — delegates the image transformation to an arbitrary
// command line.
//
// The command template must name its input and output files with the
// `@INFILE` and `@OUTFILE` placeholders. Each invocation gets its own
// temporary directory holding both files; the directory is removed when the
// invocation returns, whatever the outcome.

use std::path::Path;
use std::process::Command;

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::{FeatureSet, ImageMime, Query};
use bildwerk_document::ImageProcessor;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::operation::{ImageOperation, OperationContext, OperationResult, success};

pub const INFILE: &str = "@INFILE";
pub const OUTFILE: &str = "@OUTFILE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellParams {
    /// Command line template containing `@INFILE` and `@OUTFILE`.
    pub command: String,
    /// Encoding of the file handed to the command.
    #[serde(default)]
    pub input_mimetype: ImageMime,
    /// Encoding of the file the command writes and of the recorded image.
    #[serde(default)]
    pub output_mimetype: ImageMime,
    /// Comma-separated features the command adds.
    #[serde(default)]
    pub output_feature_added: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    params: ShellParams,
}

impl ShellCommand {
    pub fn new(params: ShellParams) -> Result<Self> {
        for placeholder in [INFILE, OUTFILE] {
            if !params.command.contains(placeholder) {
                return Err(BildwerkError::Configuration(format!(
                    "command parameter requires the {placeholder} placeholder"
                )));
            }
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &ShellParams {
        &self.params
    }
}

/// Substitute both placeholders with double-quoted paths.
///
/// Quotes the template author already put around a placeholder are dropped
/// first so that paths are never quoted twice.
pub fn normalize_command(template: &str, infile: &Path, outfile: &Path) -> String {
    let mut command = template.to_owned();
    for placeholder in [INFILE, OUTFILE] {
        for quote in ['"', '\''] {
            command = command.replace(&format!("{quote}{placeholder}{quote}"), placeholder);
        }
    }
    command
        .replace(INFILE, &format!("\"{}\"", infile.display()))
        .replace(OUTFILE, &format!("\"{}\"", outfile.display()))
}

/// Run `command` through the platform shell.
fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Restrict an identifier to characters that are safe in file names.
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ImageOperation for ShellCommand {
    fn name(&self) -> &'static str {
        "bildwerk-shell"
    }

    fn default_query(&self) -> Query {
        Query::any()
    }

    fn feature_added(&self) -> FeatureSet {
        FeatureSet::parse(&self.params.output_feature_added)
    }

    fn id_suffix(&self) -> String {
        format!(
            ".IMG-{}",
            self.params.output_feature_added.to_uppercase().replace(',', "-")
        )
    }

    fn output_mime(&self) -> ImageMime {
        self.params.output_mimetype
    }

    #[instrument(skip_all, fields(node = %ctx.label))]
    fn apply(&self, image: &DynamicImage, ctx: &OperationContext) -> Result<OperationResult> {
        let scratch = tempfile::Builder::new().prefix("bildwerk-shell-").tempdir()?;
        let stem = file_stem(&ctx.image_id);
        let infile = scratch
            .path()
            .join(format!("{stem}.in{}", self.params.input_mimetype.extension()));
        let outfile = scratch
            .path()
            .join(format!("{stem}{}", self.params.output_mimetype.extension()));

        ImageProcessor::from_dynamic(image.clone()).save(&infile, self.params.input_mimetype)?;

        let command = normalize_command(&self.params.command, &infile, &outfile);
        debug!(command = %command, "running command");
        let output = shell(&command).output().map_err(|err| {
            BildwerkError::Command(format!("could not start shell for {}: {}", ctx.label, err))
        })?;

        let code = output.status.code();
        debug!(code = ?code, "command returned");
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            info!(stdout = %stdout.trim_end(), "command output");
        }
        if !stderr.trim().is_empty() {
            warn!(stderr = %stderr.trim_end(), "command error output");
        }

        if !output.status.success() {
            error!("command failed");
            if outfile.exists() {
                std::fs::remove_file(&outfile)?;
            }
            let reason = match code {
                Some(code) => format!("command failed with exit code {code}"),
                None => "command was terminated by a signal".to_owned(),
            };
            return Ok(OperationResult::skip(reason));
        }

        let produced = ImageProcessor::open(&outfile)
            .map_err(|err| {
                BildwerkError::Command(format!(
                    "command for {} produced no readable image: {}",
                    ctx.label, err
                ))
            })?
            .into_dynamic();
        if (produced.width(), produced.height()) != (image.width(), image.height()) {
            error!(
                input = ?(image.width(), image.height()),
                output = ?(produced.width(), produced.height()),
                "command produced an image of different size"
            );
            return Ok(OperationResult::skip(format!(
                "command changed the image size from {}x{} to {}x{}",
                image.width(),
                image.height(),
                produced.width(),
                produced.height()
            )));
        }

        Ok(success(produced, self.feature_added()))
    }
}
