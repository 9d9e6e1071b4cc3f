// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;

use super::RetryTracker;
use crate::core::bus::DetectionBatch;
use crate::core::config::{GraphConfig, SessionSpec};
use crate::core::engine::EngineHandle;
use crate::core::frames::FramePreprocessor;
use crate::core::graph::{GraphHandle, PipelineState, SessionId};
use crate::core::pads::PadResolver;
use crate::core::Result;

/// How to build and feed one session.
#[derive(Clone)]
pub struct SessionConfig {
    pub graph: GraphConfig,
    /// Engine blob run on frames tapped at the Infer stage.
    pub engine_path: Option<PathBuf>,
    /// Applied to each frame before `infer`; without one the frame must
    /// already match the engine input.
    pub preprocess: Option<Arc<dyn FramePreprocessor>>,
}

impl SessionConfig {
    pub fn new(graph: GraphConfig) -> Self {
        Self {
            graph,
            engine_path: None,
            preprocess: None,
        }
    }

    pub fn with_engine(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_path = Some(path.into());
        self
    }

    pub fn with_preprocessor(mut self, preprocess: Arc<dyn FramePreprocessor>) -> Self {
        self.preprocess = Some(preprocess);
        self
    }

    pub fn from_spec(spec: &SessionSpec) -> Result<Self> {
        Ok(Self {
            graph: spec.graph_config()?,
            engine_path: spec.engine.clone(),
            preprocess: None,
        })
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("graph", &self.graph.name)
            .field("engine_path", &self.engine_path)
            .field("preprocess", &self.preprocess.is_some())
            .finish()
    }
}

/// One live ingest → process → publish instance.
pub struct StreamSession {
    pub(crate) id: SessionId,
    pub(crate) ingest: String,
    pub(crate) graph: GraphHandle,
    pub(crate) engine: Option<Arc<EngineHandle>>,
    pub(crate) preprocess: Option<Arc<dyn FramePreprocessor>>,
    pub(crate) resolver: PadResolver,
    pub(crate) retry: RetryTracker,
    /// Resync succeeded while the source pad was still unlinked.
    pub(crate) awaiting_pad_after_resync: bool,
    pub(crate) worker: usize,
    pub(crate) next_seq: u64,
    pub(crate) frames_dropped: u64,
    pub(crate) frames_failed: u64,
    pub(crate) subscribers: Vec<Sender<DetectionBatch>>,
}

impl StreamSession {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn ingest(&self) -> &str {
        &self.ingest
    }

    pub fn state(&self) -> PipelineState {
        self.graph.state()
    }

    pub fn graph(&self) -> &GraphHandle {
        &self.graph
    }

    pub fn engine(&self) -> Option<&Arc<EngineHandle>> {
        self.engine.as_ref()
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    /// Frames submitted to the inference pool so far.
    pub fn frames_submitted(&self) -> u64 {
        self.next_seq
    }

    /// Frames dropped because the session was not playing or its worker
    /// queue was full.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Frames whose inference returned an error.
    pub fn frames_failed(&self) -> u64 {
        self.frames_failed
    }

    pub(crate) fn publish(&mut self, batch: &DetectionBatch) {
        self.subscribers.retain(|tx| tx.send(batch.clone()).is_ok());
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("ingest", &self.ingest)
            .field("state", &self.state())
            .field("engine", &self.engine)
            .field("worker", &self.worker)
            .field("next_seq", &self.next_seq)
            .field("frames_dropped", &self.frames_dropped)
            .finish()
    }
}

/// Lifecycle changes reported to [`Coordinator::notices`](super::Coordinator::notices).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Started {
        session_id: SessionId,
        publish_path: String,
    },
    Faulted {
        session_id: SessionId,
        source_stage: String,
        message: String,
    },
    Recovered {
        session_id: SessionId,
    },
    /// The stream ended normally.
    Ended {
        session_id: SessionId,
    },
    /// Removed after a fatal fault or an exhausted retry budget.
    TornDown {
        session_id: SessionId,
        reason: String,
    },
    /// Removed by `stop_session`.
    Stopped {
        session_id: SessionId,
    },
}

impl SessionNotice {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionNotice::Started { session_id, .. }
            | SessionNotice::Faulted { session_id, .. }
            | SessionNotice::Recovered { session_id }
            | SessionNotice::Ended { session_id }
            | SessionNotice::TornDown { session_id, .. }
            | SessionNotice::Stopped { session_id } => session_id,
        }
    }
}
