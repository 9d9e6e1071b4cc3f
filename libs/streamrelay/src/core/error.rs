// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::PathBuf;

use thiserror::Error;

use crate::core::engine::TensorShape;
use crate::core::frames::PixelFormat;
use crate::core::graph::StageKind;

/// Failure while assembling a session graph. Never retried automatically.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to create {stage_kind} stage: {reason}")]
    StageCreation { stage_kind: StageKind, reason: String },

    #[error("failed to link {upstream} -> {downstream}: {reason}")]
    StaticLink {
        upstream: StageKind,
        downstream: StageKind,
        reason: String,
    },

    #[error("invalid graph configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to watch graph bus: {0}")]
    Watch(String),
}

impl BuildError {
    /// Stage kind whose creation failed, if this is a stage-creation error.
    pub fn stage_kind(&self) -> Option<StageKind> {
        match self {
            BuildError::StageCreation { stage_kind, .. } => Some(*stage_kind),
            _ => None,
        }
    }
}

/// The late-bound Source edge could not be linked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dynamic link {pad} -> {downstream} failed: {reason}")]
pub struct LinkFailed {
    pub pad: String,
    pub downstream: StageKind,
    pub reason: String,
}

/// Engine load failure. Always fatal for that engine instance.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("engine blob not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("failed to read engine blob {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to deserialize engine blob {}: {reason}", path.display())]
    DeserializeFailed { path: PathBuf, reason: String },

    #[error("device buffer allocation failed: {reason}")]
    Allocation { reason: String },
}

/// Failure of a single `infer` invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferError {
    #[error("input shape mismatch: engine expects {expected}, frame is {actual}")]
    ShapeMismatch {
        expected: TensorShape,
        actual: TensorShape,
    },

    #[error("device failure ({}): {reason}", if *recoverable { "recoverable" } else { "fatal" })]
    DeviceFailure { reason: String, recoverable: bool },

    #[error("engine handle has been retired")]
    Retired,
}

impl InferError {
    /// True when the engine handle must be reloaded before further use.
    pub fn requires_reload(&self) -> bool {
        matches!(
            self,
            InferError::DeviceFailure {
                recoverable: false,
                ..
            }
        )
    }
}

/// Failure while mapping a pipeline buffer into a [`FrameView`](crate::core::frames::FrameView).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("no conversion from {from:?} to {to:?}")]
    UnsupportedConversion { from: PixelFormat, to: PixelFormat },

    #[error("pipeline buffer too small: expected {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("row stride {stride} is shorter than a row of {row_bytes} bytes")]
    StrideTooSmall { stride: usize, row_bytes: usize },
}

/// Offline model conversion failure.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("interchange model not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("model conversion failed: {0}")]
    ConversionFailed(String),

    #[error("failed to write engine blob {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of `start_session`. Nothing from the attempt stays registered.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("invalid publish path '{0}': must start with '/' and name a mount")]
    InvalidPublishPath(String),

    #[error("publish path already in use: {0}")]
    DuplicatePublishPath(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("media backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Link(#[from] LinkFailed),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Media backend error: {0}")]
    Backend(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;
