// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

#![allow(clippy::type_complexity)] // Complex types are clear in context

// Re-export crossbeam_channel so callers can name subscription receivers
pub use crossbeam_channel;
pub use serde_json;

pub mod core;

pub use core::*;
