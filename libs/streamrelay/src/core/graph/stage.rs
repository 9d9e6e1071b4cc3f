// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::config::OptionValue;

/// Functional role of a stage in a session chain.
///
/// Declaration order is the canonical chain order; a valid chain lists
/// kinds in strictly increasing order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Source,
    Depacketize,
    Queue,
    Decode,
    Convert,
    Infer,
    Overlay,
    Encode,
    Sink,
}

impl StageKind {
    /// Element factory used when a stage config names none.
    pub fn default_element(self) -> &'static str {
        match self {
            StageKind::Source => "rtspsrc",
            StageKind::Depacketize => "rtph264depay",
            StageKind::Queue => "queue",
            StageKind::Decode => "nvv4l2decoder",
            StageKind::Convert => "nvvidconv",
            StageKind::Infer => "identity",
            StageKind::Overlay => "identity",
            StageKind::Encode => "nvv4l2h264enc",
            StageKind::Sink => "rtph264pay",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Source => "source",
            StageKind::Depacketize => "depacketize",
            StageKind::Queue => "queue",
            StageKind::Decode => "decode",
            StageKind::Convert => "convert",
            StageKind::Infer => "infer",
            StageKind::Overlay => "overlay",
            StageKind::Encode => "encode",
            StageKind::Sink => "sink",
        };
        f.write_str(name)
    }
}

/// One node of a session graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStage {
    pub kind: StageKind,
    /// Element factory name (e.g. `rtspsrc`).
    pub element: String,
    /// Instance name, unique within the graph.
    pub name: String,
    pub options: BTreeMap<String, OptionValue>,
}

impl GraphStage {
    pub fn option(&self, key: &str) -> Option<&OptionValue> {
        self.options.get(key)
    }

    /// `element name=... key=value ...` fragment for a launch descriptor.
    pub fn launch_fragment(&self) -> String {
        let mut out = self.element.clone();
        if !self.options.contains_key("name") {
            out.push_str(&format!(" name={}", self.name));
        }
        for (key, value) in &self.options {
            out.push_str(&format!(" {}={}", key, value.to_launch_value()));
        }
        out
    }
}

/// How an edge between two adjacent stages is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Linked by the builder
    Static,
    /// Linked later by the pad resolver
    Dynamic,
}

/// State of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Pending,
    Linked,
    Failed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Pending => write!(f, "pending"),
            LinkState::Linked => write!(f, "linked"),
            LinkState::Failed => write!(f, "failed"),
        }
    }
}

/// Edge weight in the session graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLink {
    pub mode: LinkMode,
    pub state: LinkState,
}

impl StageLink {
    pub fn linked_static() -> Self {
        Self {
            mode: LinkMode::Static,
            state: LinkState::Linked,
        }
    }

    pub fn pending_dynamic() -> Self {
        Self {
            mode: LinkMode::Dynamic,
            state: LinkState::Pending,
        }
    }
}
