// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded retry-with-backoff for runtime faults.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Resync attempts before the session is torn down.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// A fault this long after the last recovery starts a fresh budget.
    pub reset_after_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            reset_after_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (zero-based). Doubles per
    /// attempt, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Duration::from_millis(ms)
    }
}

/// What the coordinator should do after a fault or a resync outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resync at the given instant.
    Scheduled(Instant),
    /// Budget exhausted; tear the session down.
    GiveUp,
}

/// Per-session retry bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RetryTracker {
    attempts: u32,
    due: Option<Instant>,
    last_recovery: Option<Instant>,
}

impl RetryTracker {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn due_at(&self) -> Option<Instant> {
        self.due
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.due.is_some_and(|due| due <= now)
    }

    /// A fresh fault was observed at `now`.
    pub fn on_fault(&mut self, policy: &RetryPolicy, now: Instant) -> RetryDecision {
        let reset_after = Duration::from_millis(policy.reset_after_ms);
        if self
            .last_recovery
            .is_some_and(|at| now.saturating_duration_since(at) > reset_after)
        {
            self.attempts = 0;
        }
        self.schedule(policy, now)
    }

    /// The resync due now was just tried. Only failures count against
    /// the budget.
    pub fn on_resync(
        &mut self,
        policy: &RetryPolicy,
        now: Instant,
        succeeded: bool,
    ) -> Option<RetryDecision> {
        self.due = None;
        if succeeded {
            self.last_recovery = Some(now);
            return None;
        }
        self.attempts += 1;
        Some(self.schedule(policy, now))
    }

    fn schedule(&mut self, policy: &RetryPolicy, now: Instant) -> RetryDecision {
        if self.attempts >= policy.max_attempts {
            self.due = None;
            return RetryDecision::GiveUp;
        }
        let at = now + policy.backoff(self.attempts);
        self.due = Some(at);
        RetryDecision::Scheduled(at)
    }
}
