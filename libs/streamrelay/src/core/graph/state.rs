// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session pipeline lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one session graph.
///
/// # State Transitions
///
/// ```text
/// ┌──────────┐ build ok ┌─────────┐ pad linked ┌─────────┐
/// │ Building │─────────►│ Linking │───────────►│ Playing │◄──┐
/// └────┬─────┘          └────┬────┘            └────┬────┘   │ resync
///      │                     │ link failed          │ error  │
///      │                     ▼                      ▼        │
///      │                ┌─────────┐◄────────────────┘        │
///      │                │ Faulted │──────────────────────────┘
///      │                └────┬────┘
///      │ teardown            │ retries exhausted / stop
///      ▼                     ▼
/// ┌─────────────────────────────┐
/// │           Stopped           │  (reachable from every state)
/// └─────────────────────────────┘
/// ```
///
/// Transitions only move forward, except `Playing ⇄ Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Stages being created and statically linked
    #[default]
    Building,
    /// Waiting for the late-bound source pad
    Linking,
    /// Fully linked and flowing
    Playing,
    /// A control-plane error was observed; recovery may follow
    Faulted,
    /// Terminal
    Stopped,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Building, Linking) => true,
            (Linking, Playing) | (Linking, Faulted) => true,
            (Playing, Faulted) | (Faulted, Playing) => true,
            _ => false,
        }
    }

    /// Frames may reach the inference engine only in this state.
    pub fn accepts_frames(self) -> bool {
        matches!(self, PipelineState::Playing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Stopped)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Building => write!(f, "building"),
            PipelineState::Linking => write!(f, "linking"),
            PipelineState::Playing => write!(f, "playing"),
            PipelineState::Faulted => write!(f, "faulted"),
            PipelineState::Stopped => write!(f, "stopped"),
        }
    }
}
