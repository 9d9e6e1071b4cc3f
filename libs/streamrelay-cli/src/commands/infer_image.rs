// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::Path;

use anyhow::{Context, Result};
use streamrelay::{
    EngineManager, FrameExchange, FrameLayout, FramePreprocessor, HostFrame,
    NormalizePreprocessor, PixelFormat, RelayConfig, TracingLogSink,
};

/// Detect objects in one image and print them to stdout as JSON.
pub fn run(image_path: &Path, engine_path: &Path, config: &RelayConfig) -> Result<()> {
    let log = TracingLogSink::default().shared();
    let engines = EngineManager::new(super::runtime()?, config.decode.clone(), log.clone());
    let engine = engines.load(engine_path)?;

    let image = image::open(image_path)
        .with_context(|| format!("Failed to decode {}", image_path.display()))?
        .to_rgb8();
    let layout = FrameLayout::tight(image.width(), image.height(), PixelFormat::Rgb8);
    let frame = HostFrame::new(layout, image.into_raw());

    let exchange = FrameExchange::new(log);
    let preprocess = NormalizePreprocessor;
    let view = exchange.acquire(&frame, preprocess.acquire_format())?;
    let prepared = preprocess.prepare(&view, engine.input_shape())?;
    let detections = engines.infer(&engine, &prepared)?;
    exchange.release(prepared);
    exchange.release(view);

    tracing::info!(
        "{} detections in {}",
        detections.len(),
        image_path.display()
    );
    println!("{}", serde_json::to_string_pretty(&detections)?);
    Ok(())
}
