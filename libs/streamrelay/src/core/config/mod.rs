// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod pipeline_config;
mod relay_config;

pub use pipeline_config::{GraphConfig, OptionValue, StageConfig};
pub use relay_config::{RelayConfig, ServerConfig, SessionSpec};
