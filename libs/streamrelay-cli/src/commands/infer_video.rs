// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use streamrelay::{
    Coordinator, GraphConfig, MediaBackend, NormalizePreprocessor, RelayConfig, SessionConfig,
};

#[cfg(feature = "gstreamer")]
fn backend(config: &RelayConfig) -> Result<Box<dyn MediaBackend>> {
    let log = streamrelay::TracingLogSink::default().shared();
    let backend = streamrelay::media::gst::GstBackend::new(&config.server, log)
        .map_err(anyhow::Error::msg)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "gstreamer"))]
fn backend(_config: &RelayConfig) -> Result<Box<dyn MediaBackend>> {
    anyhow::bail!("no media backend built in; rebuild with --features gstreamer")
}

/// Relay `ingest` with detections at `publish_path` until Ctrl+C.
pub fn run(ingest: &str, engine_path: &Path, publish_path: &str, config: RelayConfig) -> Result<()> {
    let runtime = super::runtime()?;
    let backend = backend(&config)?;
    let url = config.server.url_for(publish_path);

    let mut coordinator = Coordinator::builder()
        .with_backend_boxed(backend)
        .with_runtime(runtime)
        .with_config(config)
        .build()?;

    let session = SessionConfig::new(GraphConfig::infer_video())
        .with_engine(engine_path)
        .with_preprocessor(Arc::new(NormalizePreprocessor));
    coordinator
        .start_session(ingest, publish_path, session)
        .with_context(|| format!("Failed to start session for {}", ingest))?;
    for started in coordinator.start_configured_sessions() {
        if let Err(e) = started {
            tracing::warn!("Configured session not started: {}", e);
        }
    }
    tracing::info!("Stream ready at {}", url);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl+C handler")?;

    coordinator.run(&shutdown);
    Ok(())
}
