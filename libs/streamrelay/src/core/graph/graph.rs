// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};

use super::{GraphStage, LinkMode, LinkState, PipelineState, SessionId, StageKind, StageLink};
use crate::core::error::{Result, StreamError};

/// One session's processing graph: a linear chain of stages.
///
/// Adjacent stages are joined by exactly one edge. Every edge is static
/// except the one leaving the Source, which stays pending until the pad
/// resolver links it.
#[derive(Debug)]
pub struct GraphHandle {
    session_id: SessionId,
    name: String,
    graph: DiGraph<GraphStage, StageLink>,
    chain: Vec<NodeIndex>,
    dynamic_edge: Option<EdgeIndex>,
    state: PipelineState,
}

impl GraphHandle {
    pub(crate) fn new(session_id: SessionId, name: impl Into<String>) -> Self {
        Self {
            session_id,
            name: name.into(),
            graph: DiGraph::new(),
            chain: Vec::new(),
            dynamic_edge: None,
            state: PipelineState::Building,
        }
    }

    pub(crate) fn push_stage(&mut self, stage: GraphStage) -> NodeIndex {
        let index = self.graph.add_node(stage);
        self.chain.push(index);
        index
    }

    pub(crate) fn connect(&mut self, upstream: NodeIndex, downstream: NodeIndex, link: StageLink) {
        let edge = self.graph.add_edge(upstream, downstream, link);
        if link.mode == LinkMode::Dynamic {
            self.dynamic_edge = Some(edge);
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition(&mut self, next: PipelineState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(StreamError::InvalidTransition(format!(
                "session {}: {} -> {}",
                self.session_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Stages in chain order.
    pub fn stages(&self) -> impl Iterator<Item = &GraphStage> + '_ {
        self.chain.iter().map(|i| &self.graph[*i])
    }

    pub fn stage(&self, kind: StageKind) -> Option<&GraphStage> {
        self.stages().find(|s| s.kind == kind)
    }

    pub fn stage_count(&self) -> usize {
        self.chain.len()
    }

    pub fn has_stage(&self, kind: StageKind) -> bool {
        self.stage(kind).is_some()
    }

    /// Edges in chain order as `(upstream, downstream, link)`.
    pub fn links(&self) -> Vec<(StageKind, StageKind, StageLink)> {
        self.chain
            .windows(2)
            .filter_map(|pair| {
                let edge = self.graph.find_edge(pair[0], pair[1])?;
                Some((
                    self.graph[pair[0]].kind,
                    self.graph[pair[1]].kind,
                    self.graph[edge],
                ))
            })
            .collect()
    }

    /// Stage the late-bound edge feeds.
    pub fn dynamic_downstream(&self) -> Option<&GraphStage> {
        let edge = self.dynamic_edge?;
        let (_, downstream) = self.graph.edge_endpoints(edge)?;
        Some(&self.graph[downstream])
    }

    pub fn dynamic_link_state(&self) -> Option<LinkState> {
        self.dynamic_edge.map(|e| self.graph[e].state)
    }

    pub(crate) fn set_dynamic_link_state(&mut self, state: LinkState) {
        if let Some(edge) = self.dynamic_edge {
            self.graph[edge].state = state;
        }
    }

    /// Only the dynamic edge is still pending.
    pub fn awaiting_dynamic_link(&self) -> bool {
        self.graph
            .edge_indices()
            .all(|e| Some(e) == self.dynamic_edge || self.graph[e].state == LinkState::Linked)
            && self.dynamic_link_state() == Some(LinkState::Pending)
    }

    /// gst-launch description of the whole chain, e.g.
    /// `( rtspsrc name=source location=... ! rtph264depay name=depacketize ! ... )`.
    pub fn launch_descriptor(&self) -> String {
        let body: Vec<String> = self.stages().map(GraphStage::launch_fragment).collect();
        format!("( {} )", body.join(" ! "))
    }
}
