// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Multi-session orchestration.

#[allow(clippy::module_inception)]
mod coordinator;
mod mounts;
mod retry;
mod session;

pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use mounts::{is_valid_publish_path, MountRegistration, MountTableView};
pub use retry::{RetryDecision, RetryPolicy, RetryTracker};
pub use session::{SessionConfig, SessionNotice, StreamSession};
