// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Late-bound linking of the Source stage's pad.

use std::fmt;

use crate::core::error::LinkFailed;
use crate::core::graph::{GraphHandle, LinkState, PipelineState, StageKind};
use crate::core::logging::{Severity, SharedLogSink};
use crate::core::media::{MediaBackend, PadInfo};

/// Resolver state.
///
/// ```text
/// ┌─────────────┐  link ok   ┌────────┐
/// │ AwaitingPad │───────────►│ Linked │
/// └──────┬──────┘            └────────┘
///        │ link failed
///        ▼
/// ┌────────────┐
/// │ LinkFailed │
/// └────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverState {
    #[default]
    AwaitingPad,
    Linked,
    LinkFailed,
}

impl fmt::Display for ResolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverState::AwaitingPad => write!(f, "awaiting_pad"),
            ResolverState::Linked => write!(f, "linked"),
            ResolverState::LinkFailed => write!(f, "link_failed"),
        }
    }
}

/// Result of handling one pad notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PadOutcome {
    /// Linked now; the graph moved to `Playing`.
    Linked,
    /// The downstream input was already linked; nothing changed.
    AlreadyLinked,
    /// Not a pad this graph consumes (e.g. an audio track).
    Ignored,
    /// Pad arrived before the graph reached `Linking`, or after it stopped.
    Rejected,
    /// Linking failed; the graph is now `Faulted`.
    Failed(LinkFailed),
}

/// Links the Source's late pad into its downstream stage, once.
///
/// Sources may announce the same pad again on every reconnect, so each
/// notification first asks the backend whether the downstream input is
/// already linked.
pub struct PadResolver {
    state: ResolverState,
    notifications: u64,
    log: SharedLogSink,
}

impl PadResolver {
    pub fn new(log: SharedLogSink) -> Self {
        Self {
            state: ResolverState::AwaitingPad,
            notifications: 0,
            log,
        }
    }

    pub fn state(&self) -> ResolverState {
        self.state
    }

    /// Pad notifications seen, duplicates included.
    pub fn notifications(&self) -> u64 {
        self.notifications
    }

    pub fn on_pad_added(
        &mut self,
        graph: &mut GraphHandle,
        pad: &PadInfo,
        backend: &mut dyn MediaBackend,
    ) -> PadOutcome {
        self.notifications += 1;
        let id = graph.session_id().clone();

        if matches!(
            graph.state(),
            PipelineState::Building | PipelineState::Stopped
        ) {
            self.log.log(
                Severity::Warning,
                &format!("[{}] pad {} arrived in state {}, rejected", id, pad.name, graph.state()),
            );
            return PadOutcome::Rejected;
        }
        if pad.is_audio() {
            self.log.log(
                Severity::Verbose,
                &format!("[{}] ignoring pad {} ({})", id, pad.name, pad.caps),
            );
            return PadOutcome::Ignored;
        }
        let Some(downstream) = graph.dynamic_downstream().cloned() else {
            self.log.log(
                Severity::Warning,
                &format!("[{}] pad {} but graph has no dynamic edge", id, pad.name),
            );
            return PadOutcome::Ignored;
        };

        if backend.is_linked(&id, &downstream) {
            self.state = ResolverState::Linked;
            graph.set_dynamic_link_state(LinkState::Linked);
            self.log.log(
                Severity::Verbose,
                &format!("[{}] {} already linked, ignoring pad {}", id, downstream.kind, pad.name),
            );
            return PadOutcome::AlreadyLinked;
        }

        match backend.link_dynamic(&id, pad, &downstream) {
            Ok(()) => {
                self.state = ResolverState::Linked;
                graph.set_dynamic_link_state(LinkState::Linked);
                if graph.state() == PipelineState::Linking {
                    if let Err(e) = graph.transition(PipelineState::Playing) {
                        self.log.log(Severity::Warning, &e.to_string());
                    }
                }
                self.log.log(
                    Severity::Info,
                    &format!("[{}] linked pad {} -> {}", id, pad.name, downstream.name),
                );
                PadOutcome::Linked
            }
            Err(reason) => {
                self.state = ResolverState::LinkFailed;
                graph.set_dynamic_link_state(LinkState::Failed);
                if let Err(e) = graph.transition(PipelineState::Faulted) {
                    self.log.log(Severity::Warning, &e.to_string());
                }
                PadOutcome::Failed(LinkFailed {
                    pad: pad.name.clone(),
                    downstream: downstream.kind,
                    reason,
                })
            }
        }
    }

    /// Stage kind the resolver links into for `graph`.
    pub fn target(graph: &GraphHandle) -> Option<StageKind> {
        graph.dynamic_downstream().map(|s| s.kind)
    }
}
