// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod builder;
#[allow(clippy::module_inception)]
mod graph;
mod session_id;
mod stage;
mod state;

pub use builder::GraphBuilder;
pub use graph::GraphHandle;
pub use session_id::SessionId;
pub use stage::{GraphStage, LinkMode, LinkState, StageKind, StageLink};
pub use state::PipelineState;
