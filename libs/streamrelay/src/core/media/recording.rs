// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{MediaBackend, PadInfo};
use crate::core::bus::{DetectionBatch, EventSender, LoopEvent};
use crate::core::coordinator::MountRegistration;
use crate::core::graph::{GraphStage, SessionId, StageKind};

/// Calls observed by a [`RecordingBackend`], plus scripted failures.
#[derive(Debug, Default)]
pub struct RecordingState {
    pub created: Vec<(SessionId, StageKind)>,
    pub static_links: Vec<(SessionId, StageKind, StageKind)>,
    pub dynamic_links: Vec<(SessionId, String)>,
    pub linked: HashSet<SessionId>,
    pub watched: Vec<SessionId>,
    pub started: Vec<SessionId>,
    pub resyncs: Vec<SessionId>,
    pub torn_down: Vec<SessionId>,
    pub published: BTreeMap<String, String>,
    pub delivered: Vec<DetectionBatch>,

    pub fail_create: Option<StageKind>,
    pub fail_static_link_into: Option<StageKind>,
    pub fail_dynamic_link: bool,
    pub fail_watch: bool,
    pub fail_start: bool,
    pub fail_resync: bool,
    pub fail_publish: bool,

    events: Option<EventSender>,
}

/// Backend that runs nothing and records every call.
///
/// Clones share state, so a test can keep one clone while the coordinator
/// owns another. Failures are scripted through [`RecordingState`].
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock()
    }

    /// Push an event as if the media framework had raised it.
    pub fn emit(&self, event: LoopEvent) -> bool {
        let sender = self.state.lock().events.clone();
        sender.map(|s| s.send(event)).unwrap_or(false)
    }
}

impl MediaBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn attach(&mut self, events: EventSender) {
        self.state.lock().events = Some(events);
    }

    fn create_stage(&mut self, session: &SessionId, stage: &GraphStage) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.fail_create == Some(stage.kind) {
            return Err(format!("no such element factory '{}'", stage.element));
        }
        state.created.push((session.clone(), stage.kind));
        Ok(())
    }

    fn link_static(
        &mut self,
        session: &SessionId,
        upstream: &GraphStage,
        downstream: &GraphStage,
    ) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.fail_static_link_into == Some(downstream.kind) {
            return Err("caps not compatible".to_string());
        }
        state
            .static_links
            .push((session.clone(), upstream.kind, downstream.kind));
        Ok(())
    }

    fn watch(&mut self, session: &SessionId) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.fail_watch {
            return Err("bus unavailable".to_string());
        }
        state.watched.push(session.clone());
        Ok(())
    }

    fn start(&mut self, session: &SessionId) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.fail_start {
            return Err("state change failed".to_string());
        }
        state.started.push(session.clone());
        Ok(())
    }

    fn is_linked(&self, session: &SessionId, _downstream: &GraphStage) -> bool {
        self.state.lock().linked.contains(session)
    }

    fn link_dynamic(
        &mut self,
        session: &SessionId,
        pad: &PadInfo,
        _downstream: &GraphStage,
    ) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.fail_dynamic_link {
            return Err(format!("pad {} refused link", pad.name));
        }
        state.linked.insert(session.clone());
        state.dynamic_links.push((session.clone(), pad.name.clone()));
        Ok(())
    }

    fn resync(&mut self, session: &SessionId) -> Result<(), String> {
        let mut state = self.state.lock();
        state.resyncs.push(session.clone());
        if state.fail_resync {
            return Err("source did not reconnect".to_string());
        }
        Ok(())
    }

    fn teardown(&mut self, session: &SessionId) {
        let mut state = self.state.lock();
        state.linked.remove(session);
        if !state.torn_down.contains(session) {
            state.torn_down.push(session.clone());
        }
    }

    fn publish(&mut self, mount: &MountRegistration) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.fail_publish {
            return Err("mount points unavailable".to_string());
        }
        state
            .published
            .insert(mount.path.clone(), mount.launch.clone());
        Ok(())
    }

    fn unpublish(&mut self, path: &str) {
        self.state.lock().published.remove(path);
    }

    fn deliver(&mut self, _session: &SessionId, batch: &DetectionBatch) {
        self.state.lock().delivered.push(batch.clone());
    }
}
