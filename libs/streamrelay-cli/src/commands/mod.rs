// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod convert;
pub mod infer_image;
pub mod infer_video;

use std::sync::Arc;

use anyhow::Result;
use streamrelay::InferenceRuntime;

/// Inference runtime compiled into this binary.
#[cfg(feature = "onnx")]
pub fn runtime() -> Result<Arc<dyn InferenceRuntime>> {
    Ok(Arc::new(streamrelay::engine::onnx::OrtRuntime::default()))
}

#[cfg(not(feature = "onnx"))]
pub fn runtime() -> Result<Arc<dyn InferenceRuntime>> {
    anyhow::bail!("no inference runtime built in; rebuild with --features onnx")
}
