// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::Path;

use anyhow::Result;
use streamrelay::{convert_model, ConversionRequest, ModelConverter, TracingLogSink};

#[cfg(feature = "onnx")]
fn converter() -> Result<Box<dyn ModelConverter>> {
    Ok(Box::new(streamrelay::engine::onnx::OrtConverter))
}

#[cfg(not(feature = "onnx"))]
fn converter() -> Result<Box<dyn ModelConverter>> {
    anyhow::bail!("no model converter built in; rebuild with --features onnx")
}

/// Convert `model_path` and write the engine blob to `engine_path`.
pub fn run(model_path: &Path, engine_path: &Path) -> Result<()> {
    let converter = converter()?;
    let log = TracingLogSink::verbose().shared();
    let request = ConversionRequest::new(model_path).engine_path(engine_path);
    let written = convert_model(converter.as_ref(), &request, &log)?;
    tracing::info!("Engine written to {}", written.display());
    Ok(())
}
