// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Seam to the media-transport framework.
//!
//! The orchestration layer drives a [`MediaBackend`] from the loop thread
//! only. Backends report asynchronous happenings (new pads, bus messages,
//! frames) by pushing [`LoopEvent`](crate::core::bus::LoopEvent)s through the
//! [`EventSender`] handed to [`MediaBackend::attach`].

mod recording;

#[cfg(feature = "gstreamer")]
pub mod gst;

pub use recording::{RecordingBackend, RecordingState};

use serde::{Deserialize, Serialize};

use crate::core::bus::{DetectionBatch, EventSender};
use crate::core::coordinator::MountRegistration;
use crate::core::graph::{GraphStage, SessionId};

/// A pad exposed by a Source stage after format negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadInfo {
    pub name: String,
    /// Caps string, e.g. `application/x-rtp, media=(string)video, ...`
    pub caps: String,
}

impl PadInfo {
    pub fn new(name: impl Into<String>, caps: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caps: caps.into(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.caps.starts_with("audio/")
            || self.caps.contains("media=(string)audio")
            || self.caps.contains("media=audio")
    }
}

pub trait MediaBackend {
    fn name(&self) -> &str;

    /// Receive the queue asynchronous events are pushed into.
    fn attach(&mut self, events: EventSender);

    fn create_stage(&mut self, session: &SessionId, stage: &GraphStage) -> Result<(), String>;

    fn link_static(
        &mut self,
        session: &SessionId,
        upstream: &GraphStage,
        downstream: &GraphStage,
    ) -> Result<(), String>;

    /// Begin forwarding the graph's bus, pad and frame callbacks.
    fn watch(&mut self, session: &SessionId) -> Result<(), String>;

    /// Set the graph running.
    fn start(&mut self, session: &SessionId) -> Result<(), String>;

    /// Whether `downstream`'s input is already linked.
    fn is_linked(&self, session: &SessionId, downstream: &GraphStage) -> bool;

    fn link_dynamic(
        &mut self,
        session: &SessionId,
        pad: &PadInfo,
        downstream: &GraphStage,
    ) -> Result<(), String>;

    /// Restart data flow after a fault.
    fn resync(&mut self, session: &SessionId) -> Result<(), String>;

    /// Stop and release every stage of the session. Idempotent.
    fn teardown(&mut self, session: &SessionId);

    fn publish(&mut self, mount: &MountRegistration) -> Result<(), String>;

    fn unpublish(&mut self, path: &str);

    /// Hand results back to the graph's overlay stage.
    fn deliver(&mut self, _session: &SessionId, _batch: &DetectionBatch) {}
}
