// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded worker pool running `infer` off the loop thread.
//!
//! Each session is pinned to one worker and each worker drains a FIFO
//! queue, so a session's results come back in frame order.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Detection, EngineHandle, EngineManager, ElementType};
use crate::core::bus::{EventSender, LoopEvent};
use crate::core::error::{ExchangeError, InferError};
use crate::core::frames::{FrameExchange, FramePreprocessor, PipelineBuffer, PixelFormat};
use crate::core::graph::SessionId;
use crate::core::logging::{Severity, SharedLogSink};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    /// Jobs queued per worker before frames are dropped.
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 8,
        }
    }
}

/// Why a frame produced no detections.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Infer(#[from] InferError),
}

pub struct InferenceJob {
    pub session_id: SessionId,
    pub seq: u64,
    pub engine: Arc<EngineHandle>,
    pub frame: Box<dyn PipelineBuffer>,
    pub preprocess: Option<Arc<dyn FramePreprocessor>>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker queue full")]
    Full,

    #[error("worker pool shut down")]
    Closed,

    #[error("no such worker")]
    NoWorker,
}

pub struct InferencePool {
    senders: Vec<Sender<InferenceJob>>,
    threads: Vec<JoinHandle<()>>,
    next: usize,
}

impl InferencePool {
    pub fn start(
        config: &PoolConfig,
        engines: Arc<EngineManager>,
        exchange: Arc<FrameExchange>,
        events: EventSender,
        log: SharedLogSink,
    ) -> std::io::Result<Self> {
        let workers = config.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut threads = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = crossbeam_channel::bounded::<InferenceJob>(config.queue_depth.max(1));
            let engines = Arc::clone(&engines);
            let exchange = Arc::clone(&exchange);
            let events = events.clone();
            let log = Arc::clone(&log);
            let thread = std::thread::Builder::new()
                .name(format!("streamrelay-infer-{}", index))
                .spawn(move || {
                    for job in rx.iter() {
                        let InferenceJob {
                            session_id,
                            seq,
                            engine,
                            frame,
                            preprocess,
                        } = job;
                        let result =
                            run_job(&engines, &exchange, &engine, frame.as_ref(), preprocess.as_deref());
                        drop(frame);
                        if !events.send(LoopEvent::InferenceDone {
                            session_id,
                            seq,
                            result,
                        }) {
                            log.log(Severity::Verbose, "inference worker: loop gone, exiting");
                            break;
                        }
                    }
                })?;
            senders.push(tx);
            threads.push(thread);
        }
        Ok(Self {
            senders,
            threads,
            next: 0,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Pick the worker for a new session, round-robin.
    pub fn assign(&mut self) -> usize {
        let worker = self.next % self.senders.len().max(1);
        self.next = self.next.wrapping_add(1);
        worker
    }

    /// Queue `job` on `worker` without blocking.
    pub fn submit(&self, worker: usize, job: InferenceJob) -> Result<(), SubmitError> {
        let sender = self.senders.get(worker).ok_or(SubmitError::NoWorker)?;
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Disconnected(_) => SubmitError::Closed,
        })
    }

    /// Close every queue and join the workers after they drain.
    pub fn shutdown(&mut self) {
        self.senders.clear();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for InferencePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pixel format a handle's input binds to directly.
pub fn engine_input_format(engine: &EngineHandle) -> PixelFormat {
    let shape = engine.input_shape();
    match (shape.element, shape.dims.as_slice()) {
        (ElementType::U8, [1, _, _, 3]) => PixelFormat::Rgb8,
        (ElementType::U8, [1, _, _, 4]) => PixelFormat::Rgba8,
        _ => PixelFormat::RgbF32Planar,
    }
}

/// acquire → (preprocess) → infer → release, for one frame.
pub fn run_job(
    engines: &EngineManager,
    exchange: &FrameExchange,
    engine: &EngineHandle,
    frame: &dyn PipelineBuffer,
    preprocess: Option<&dyn FramePreprocessor>,
) -> Result<Vec<Detection>, JobError> {
    let target = match preprocess {
        Some(p) => p.acquire_format(),
        None => engine_input_format(engine),
    };
    let view = exchange.acquire(frame, target)?;
    let result = match preprocess {
        Some(p) => {
            let prepared = p.prepare(&view, engine.input_shape())?;
            let detections = engines.infer(engine, &prepared);
            exchange.release(prepared);
            detections
        }
        None => engines.infer(engine, &view),
    };
    exchange.release(view);
    Ok(result?)
}
