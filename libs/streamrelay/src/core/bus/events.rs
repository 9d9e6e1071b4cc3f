// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Typed events delivered to the orchestration loop.
//!
//! Every pipeline callback (pad-added, bus message, new frame) and every
//! worker completion becomes one of these, pushed onto the loop's queue and
//! handled there in arrival order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::engine::{Detection, JobError};
use crate::core::frames::PipelineBuffer;
use crate::core::graph::SessionId;
use crate::core::media::PadInfo;

/// Control-plane message from a session graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    Error {
        source_stage: String,
        message: String,
        #[serde(default)]
        debug: Option<String>,
    },
    EndOfStream,
    StateChanged {
        old: String,
        new: String,
    },
    Custom {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// Classification applied by the bus monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Error,
    EndOfStream,
    StateChange,
    Custom,
}

impl BusEvent {
    pub fn class(&self) -> EventClass {
        match self {
            BusEvent::Error { .. } => EventClass::Error,
            BusEvent::EndOfStream => EventClass::EndOfStream,
            BusEvent::StateChanged { .. } => EventClass::StateChange,
            BusEvent::Custom { .. } => EventClass::Custom,
        }
    }

    pub fn error(source_stage: impl Into<String>, message: impl Into<String>) -> Self {
        BusEvent::Error {
            source_stage: source_stage.into(),
            message: message.into(),
            debug: None,
        }
    }
}

impl fmt::Display for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusEvent::Error {
                source_stage,
                message,
                ..
            } => write!(f, "error from {}: {}", source_stage, message),
            BusEvent::EndOfStream => write!(f, "end of stream"),
            BusEvent::StateChanged { old, new } => write!(f, "state {} -> {}", old, new),
            BusEvent::Custom { name, .. } => write!(f, "custom event '{}'", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub session_id: SessionId,
    pub event: BusEvent,
}

/// Detections for one frame of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub session_id: SessionId,
    /// Per-session frame sequence number, in arrival order.
    pub seq: u64,
    pub detections: Vec<Detection>,
}

pub enum LoopEvent {
    /// The Source stage exposed a new pad.
    PadAdded { session_id: SessionId, pad: PadInfo },
    Bus(BusMessage),
    /// A frame passed the Infer stage tap.
    FrameReady {
        session_id: SessionId,
        frame: Box<dyn PipelineBuffer>,
    },
    /// A worker finished the job for frame `seq`.
    InferenceDone {
        session_id: SessionId,
        seq: u64,
        result: Result<Vec<Detection>, JobError>,
    },
    Shutdown,
}

impl LoopEvent {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            LoopEvent::PadAdded { session_id, .. }
            | LoopEvent::FrameReady { session_id, .. }
            | LoopEvent::InferenceDone { session_id, .. } => Some(session_id),
            LoopEvent::Bus(msg) => Some(&msg.session_id),
            LoopEvent::Shutdown => None,
        }
    }
}

impl fmt::Debug for LoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopEvent::PadAdded { session_id, pad } => f
                .debug_struct("PadAdded")
                .field("session_id", session_id)
                .field("pad", pad)
                .finish(),
            LoopEvent::Bus(msg) => f.debug_tuple("Bus").field(msg).finish(),
            LoopEvent::FrameReady { session_id, frame } => f
                .debug_struct("FrameReady")
                .field("session_id", session_id)
                .field("layout", &frame.layout())
                .finish(),
            LoopEvent::InferenceDone {
                session_id,
                seq,
                result,
            } => f
                .debug_struct("InferenceDone")
                .field("session_id", session_id)
                .field("seq", seq)
                .field("ok", &result.is_ok())
                .finish(),
            LoopEvent::Shutdown => write!(f, "Shutdown"),
        }
    }
}
