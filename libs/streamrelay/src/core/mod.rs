// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod frames;
pub mod graph;
pub mod logging;
pub mod media;
pub mod pads;

pub use bus::*;
pub use config::{GraphConfig, OptionValue, RelayConfig, SessionSpec, StageConfig};
pub use coordinator::*;
pub use engine::*;
pub use error::*;
pub use frames::*;
pub use graph::*;
pub use logging::*;
pub use media::*;
pub use pads::*;
