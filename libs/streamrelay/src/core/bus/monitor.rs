// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Persistent watch over every session graph's control channel.

use std::collections::HashMap;
use std::time::SystemTime;

use super::{BusEvent, BusMessage};
use crate::core::error::LinkFailed;
use crate::core::graph::{GraphHandle, PipelineState, SessionId};
use crate::core::logging::{Severity, SharedLogSink};

/// Recent faults kept per session.
const FAULT_HISTORY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct FaultRecord {
    pub source_stage: String,
    pub message: String,
    pub debug: Option<String>,
    pub at: SystemTime,
}

/// What the coordinator must do after the monitor classified an event.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorVerdict {
    /// The session just entered `Faulted`; apply the recovery policy.
    Fault(FaultRecord),
    /// Error on a session that is already faulted; recorded only.
    RepeatFault(FaultRecord),
    /// The session reached `Stopped`; release it.
    EndOfStream,
    /// Media-level state change recorded.
    StateRecorded,
    /// Custom event logged and ignored.
    Ignored,
    /// No watch is registered for the session.
    Unwatched,
}

#[derive(Debug, Default)]
struct Watch {
    faults: Vec<FaultRecord>,
    media_state: Option<String>,
    custom_events: u64,
    events: u64,
}

impl Watch {
    fn record(&mut self, fault: FaultRecord) {
        if self.faults.len() == FAULT_HISTORY {
            self.faults.remove(0);
        }
        self.faults.push(fault);
    }
}

pub struct BusMonitor {
    watches: HashMap<SessionId, Watch>,
    log: SharedLogSink,
}

impl BusMonitor {
    pub fn new(log: SharedLogSink) -> Self {
        Self {
            watches: HashMap::new(),
            log,
        }
    }

    /// Start watching `session_id`. Called by the graph builder before any
    /// stage runs.
    pub fn register(&mut self, session_id: &SessionId) {
        self.watches.entry(session_id.clone()).or_default();
        self.log.log(
            Severity::Verbose,
            &format!("[{}] bus watch registered", session_id),
        );
    }

    pub fn unregister(&mut self, session_id: &SessionId) -> bool {
        self.watches.remove(session_id).is_some()
    }

    pub fn is_watching(&self, session_id: &SessionId) -> bool {
        self.watches.contains_key(session_id)
    }

    pub fn watched_count(&self) -> usize {
        self.watches.len()
    }

    pub fn faults(&self, session_id: &SessionId) -> &[FaultRecord] {
        self.watches
            .get(session_id)
            .map(|w| w.faults.as_slice())
            .unwrap_or(&[])
    }

    pub fn media_state(&self, session_id: &SessionId) -> Option<&str> {
        self.watches
            .get(session_id)
            .and_then(|w| w.media_state.as_deref())
    }

    pub fn custom_events(&self, session_id: &SessionId) -> u64 {
        self.watches
            .get(session_id)
            .map(|w| w.custom_events)
            .unwrap_or(0)
    }

    /// Classify `message` and apply it to the session's graph.
    pub fn handle(
        &mut self,
        message: &BusMessage,
        graph: Option<&mut GraphHandle>,
    ) -> MonitorVerdict {
        let id = &message.session_id;
        let (watch, graph) = match (self.watches.get_mut(id), graph) {
            (Some(watch), Some(graph)) => (watch, graph),
            _ => {
                self.log.log(
                    Severity::Warning,
                    &format!("[{}] {} for unwatched session", id, message.event),
                );
                return MonitorVerdict::Unwatched;
            }
        };
        watch.events += 1;

        match &message.event {
            BusEvent::Error {
                source_stage,
                message: text,
                debug,
            } => {
                let fault = FaultRecord {
                    source_stage: source_stage.clone(),
                    message: text.clone(),
                    debug: debug.clone(),
                    at: SystemTime::now(),
                };
                watch.record(fault.clone());
                self.log.log(
                    Severity::Error,
                    &format!(
                        "[{}] error from {}: {}{}",
                        id,
                        source_stage,
                        text,
                        debug
                            .as_deref()
                            .map(|d| format!(" ({})", d))
                            .unwrap_or_default()
                    ),
                );
                match graph.state() {
                    PipelineState::Playing | PipelineState::Linking => {
                        if let Err(e) = graph.transition(PipelineState::Faulted) {
                            self.log.log(Severity::Warning, &e.to_string());
                        }
                        MonitorVerdict::Fault(fault)
                    }
                    _ => MonitorVerdict::RepeatFault(fault),
                }
            }
            BusEvent::EndOfStream => {
                self.log
                    .log(Severity::Info, &format!("[{}] end of stream", id));
                if let Err(e) = graph.transition(PipelineState::Stopped) {
                    self.log.log(Severity::Warning, &e.to_string());
                }
                MonitorVerdict::EndOfStream
            }
            BusEvent::StateChanged { old, new } => {
                self.log.log(
                    Severity::Verbose,
                    &format!("[{}] media state {} -> {}", id, old, new),
                );
                watch.media_state = Some(new.clone());
                MonitorVerdict::StateRecorded
            }
            BusEvent::Custom { name, .. } => {
                watch.custom_events += 1;
                self.log.log(
                    Severity::Info,
                    &format!("[{}] ignoring custom event '{}'", id, name),
                );
                MonitorVerdict::Ignored
            }
        }
    }

    /// Record a dynamic link failure reported by the pad resolver.
    pub fn report_link_failure(&mut self, session_id: &SessionId, failure: &LinkFailed) -> FaultRecord {
        let fault = FaultRecord {
            source_stage: "source".to_string(),
            message: failure.to_string(),
            debug: None,
            at: SystemTime::now(),
        };
        self.log.log(
            Severity::Error,
            &format!("[{}] {}", session_id, failure),
        );
        if let Some(watch) = self.watches.get_mut(session_id) {
            watch.events += 1;
            watch.record(fault.clone());
        }
        fault
    }
}
