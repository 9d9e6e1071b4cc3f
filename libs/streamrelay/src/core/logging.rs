// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Logging capability injected into every component.
//!
//! Components never reach for a global logger. Each one receives an
//! [`SharedLogSink`] at construction and reports through it; the default
//! [`TracingLogSink`] forwards into `tracing`, whose subscriber is installed
//! by the binary.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Message severity, most important first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Verbose,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
            Severity::Verbose => write!(f, "verbose"),
        }
    }
}

/// Capability for emitting log messages.
pub trait LogSink: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

pub type SharedLogSink = Arc<dyn LogSink>;

/// Forwards messages to `tracing` events under the `streamrelay` target.
///
/// Messages less important than `min_severity` are discarded before they
/// reach the subscriber.
#[derive(Debug, Clone, Copy)]
pub struct TracingLogSink {
    min_severity: Severity,
}

impl TracingLogSink {
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }

    /// Sink that passes every severity through to the subscriber's own filter.
    pub fn verbose() -> Self {
        Self::new(Severity::Verbose)
    }

    pub fn shared(self) -> SharedLogSink {
        Arc::new(self)
    }
}

impl Default for TracingLogSink {
    fn default() -> Self {
        Self::new(Severity::Warning)
    }
}

impl LogSink for TracingLogSink {
    fn log(&self, severity: Severity, message: &str) {
        if severity > self.min_severity {
            return;
        }
        match severity {
            Severity::Error => tracing::error!(target: "streamrelay", "{}", message),
            Severity::Warning => tracing::warn!(target: "streamrelay", "{}", message),
            Severity::Info => tracing::info!(target: "streamrelay", "{}", message),
            Severity::Verbose => tracing::debug!(target: "streamrelay", "{}", message),
        }
    }
}

/// Records every message in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<(Severity, String)>>,
}

impl MemoryLogSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries.lock().clone()
    }

    /// Number of recorded messages at exactly `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(s, _)| *s == severity)
            .count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|(_, m)| m.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, severity: Severity, message: &str) {
        self.entries.lock().push((severity, message.to_string()));
    }
}
