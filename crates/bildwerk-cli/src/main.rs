// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bildwerk — coordinate-preserving image derivation for segmented pages.
//
// Entry point. Initialises logging, collects operation parameters from a
// JSON file and `-P key value` pairs, and runs one operation over a file
// group of a workspace.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_document::Workspace;
use bildwerk_ops::{ImageOperation, Operation, OperationKind};
use bildwerk_pipeline::Processor;

#[derive(Parser)]
#[command(name = "bildwerk")]
#[command(version)]
#[command(about = "Derive binarized, despeckled, denoised or normalized images for segmented pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one operation over every page document of a file group
    Run {
        /// Operation to apply (binarize, despeckle, denoise, normalize, shell)
        #[arg(value_name = "OPERATION", value_parser = parse_kind)]
        operation: OperationKind,

        /// Workspace directory
        #[arg(short = 'w', long, value_name = "DIR", default_value = ".")]
        workspace: PathBuf,

        /// File group holding the input page documents
        #[arg(short = 'I', long = "input-file-grp", value_name = "GRP")]
        input_file_grp: String,

        /// File group receiving derived images and page documents
        #[arg(short = 'O', long = "output-file-grp", value_name = "GRP")]
        output_file_grp: String,

        /// JSON file with operation parameters
        #[arg(short = 'p', long, value_name = "FILE")]
        parameter: Option<PathBuf>,

        /// Single parameter; the value is read as JSON, falling back to a string
        #[arg(
            short = 'P',
            long = "param-override",
            num_args = 2,
            value_names = ["KEY", "VALUE"],
            action = clap::ArgAction::Append
        )]
        overrides: Vec<String>,
    },

    /// List the available operations with their defaults
    Operations,
}

fn parse_kind(text: &str) -> std::result::Result<OperationKind, String> {
    text.parse().map_err(|err: BildwerkError| err.to_string())
}

/// Interpret a command-line value: JSON when it parses, a plain string
/// otherwise.
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}

/// Merge the parameter file (if any) with `-P` pairs; pairs win.
fn collect_params(file: Option<&Path>, overrides: &[String]) -> Result<Map<String, Value>> {
    let mut params = match file {
        Some(path) => match serde_json::from_str(&std::fs::read_to_string(path)?)? {
            Value::Object(map) => map,
            other => {
                return Err(BildwerkError::Configuration(format!(
                    "parameter file {} must hold a JSON object, found {}",
                    path.display(),
                    other
                )));
            }
        },
        None => Map::new(),
    };
    for pair in overrides.chunks(2) {
        if let [key, value] = pair {
            params.insert(key.clone(), parse_value(value));
        }
    }
    Ok(params)
}

fn run(
    kind: OperationKind,
    workspace: &Path,
    input_file_grp: &str,
    output_file_grp: &str,
    params: Map<String, Value>,
) -> Result<()> {
    let processor = Processor::new(kind, params)?;
    let mut workspace = Workspace::open(workspace, output_file_grp)?;
    let summary = processor.process_workspace(&mut workspace, input_file_grp)?;
    println!(
        "{} documents: {} images recorded, {} skipped, {} unresolved",
        summary.documents, summary.recorded, summary.skipped, summary.failed
    );
    Ok(())
}

fn list_operations() {
    for kind in OperationKind::ALL {
        match Operation::from_params(kind, Map::new()) {
            Ok(op) => println!(
                "{:<10} {:<20} adds '{}', {}, defaults {}",
                kind,
                op.name(),
                op.feature_added(),
                op.default_query(),
                op.parameters()
            ),
            Err(err) => println!("{kind:<10} {err}"),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run {
            operation,
            workspace,
            input_file_grp,
            output_file_grp,
            parameter,
            overrides,
        } => collect_params(parameter.as_deref(), &overrides).and_then(|params| {
            run(operation, &workspace, &input_file_grp, &output_file_grp, params)
        }),
        Commands::Operations => {
            list_operations();
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "bildwerk failed");
            ExitCode::FAILURE
        }
    }
}
