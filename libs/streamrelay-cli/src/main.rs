// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! StreamRelay CLI
//!
//! Converts models to engine blobs and runs detection on images or live
//! network streams.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use streamrelay::RelayConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum Mode {
    /// Convert an interchange model into an engine blob
    Convert,
    /// Serve an annotated re-stream of a live network source
    InferVideo,
    /// Run detection on one image and print the results as JSON
    InferImage,
}

#[derive(Parser, Debug)]
#[command(name = "streamrelay")]
#[command(author, version, about = "Video stream relay with inference", long_about = None)]
struct Cli {
    /// What to do
    #[arg(value_enum)]
    mode: Mode,

    /// Model (convert), image file (infer_image) or stream URI (infer_video)
    input_path: String,

    /// Engine blob to write (convert) or load
    engine_path: PathBuf,

    /// Interchange model to convert; defaults to INPUT_PATH
    onnx_path: Option<PathBuf>,

    /// Relay configuration file (default: ./streamrelay.yaml if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Mount path for infer_video
    #[arg(long, default_value = "/output")]
    publish: String,

    /// Override the detection confidence threshold
    #[arg(long)]
    threshold: Option<f32>,
}

impl Cli {
    fn validate(&self) -> Result<()> {
        if self.mode != Mode::Convert && self.onnx_path.is_some() {
            bail!("onnx_path is only accepted by the convert mode");
        }
        if let Some(t) = self.threshold {
            if !(0.0..=1.0).contains(&t) {
                bail!("--threshold {} is outside [0, 1]", t);
            }
        }
        Ok(())
    }

    fn relay_config(&self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => RelayConfig::load_or_default(
                &std::env::current_dir().context("Failed to read current directory")?,
            ),
        };
        if let Some(t) = self.threshold {
            config.decode.confidence_threshold = t;
        }
        Ok(config)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    cli.validate()?;
    match cli.mode {
        Mode::Convert => commands::convert::run(
            cli.onnx_path
                .as_deref()
                .unwrap_or(Path::new(&cli.input_path)),
            &cli.engine_path,
        ),
        Mode::InferImage => {
            let config = cli.relay_config()?;
            commands::infer_image::run(Path::new(&cli.input_path), &cli.engine_path, &config)
        }
        Mode::InferVideo => {
            let config = cli.relay_config()?;
            commands::infer_video::run(&cli.input_path, &cli.engine_path, &cli.publish, config)
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    init_tracing();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}
