// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{CompiledModel, DeviceBufferPair, ExecutionContext, TensorShape};

/// Health of an [`EngineHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineHealth {
    Healthy,
    /// The device reported a non-recoverable fault; reload before reuse
    NeedsReload,
    /// Owning session is stopping; no new invocations
    Retired,
}

impl EngineHealth {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EngineHealth::Healthy,
            1 => EngineHealth::NeedsReload,
            _ => EngineHealth::Retired,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            EngineHealth::Healthy => 0,
            EngineHealth::NeedsReload => 1,
            EngineHealth::Retired => 2,
        }
    }
}

/// Everything an invocation mutates. Held under one lock so at most one
/// worker executes a context at a time.
///
/// Fields drop in order: context and buffers go before the model they were
/// created from.
pub(crate) struct ExecutionSlot {
    pub(crate) context: Box<dyn ExecutionContext>,
    pub(crate) buffers: DeviceBufferPair,
    pub(crate) host_output: Vec<u8>,
    #[allow(dead_code)]
    pub(crate) model: Arc<dyn CompiledModel>,
}

/// A loaded model with its private execution context and device buffers.
pub struct EngineHandle {
    blob_path: PathBuf,
    input_shape: TensorShape,
    output_shape: TensorShape,
    pub(crate) slot: Mutex<ExecutionSlot>,
    health: AtomicU8,
    in_flight: Mutex<usize>,
    idle: Condvar,
    invocations: AtomicU64,
}

impl EngineHandle {
    pub(crate) fn new(
        blob_path: PathBuf,
        input_shape: TensorShape,
        output_shape: TensorShape,
        slot: ExecutionSlot,
    ) -> Self {
        Self {
            blob_path,
            input_shape,
            output_shape,
            slot: Mutex::new(slot),
            health: AtomicU8::new(EngineHealth::Healthy.as_u8()),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
            invocations: AtomicU64::new(0),
        }
    }

    pub fn blob_path(&self) -> &Path {
        &self.blob_path
    }

    pub fn input_shape(&self) -> &TensorShape {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &TensorShape {
        &self.output_shape
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth::from_u8(self.health.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.health() == EngineHealth::Healthy
    }

    /// Number of completed or attempted `infer` calls.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    /// Refuse further invocations. Calls already running finish normally.
    pub fn retire(&self) {
        self.health
            .store(EngineHealth::Retired.as_u8(), Ordering::Release);
    }

    pub(crate) fn mark_needs_reload(&self) {
        let _ = self.health.compare_exchange(
            EngineHealth::Healthy.as_u8(),
            EngineHealth::NeedsReload.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_healthy(&self) {
        let _ = self.health.compare_exchange(
            EngineHealth::NeedsReload.as_u8(),
            EngineHealth::Healthy.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Block until no invocation is running, or `timeout` elapses.
    /// Returns `true` when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    pub(crate) fn begin(&self) -> InFlightGuard<'_> {
        *self.in_flight.lock() += 1;
        InFlightGuard { handle: self }
    }

    pub(crate) fn count_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("blob_path", &self.blob_path)
            .field("input_shape", &self.input_shape)
            .field("output_shape", &self.output_shape)
            .field("health", &self.health())
            .finish()
    }
}

pub(crate) struct InFlightGuard<'a> {
    handle: &'a EngineHandle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.handle.in_flight.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.handle.idle.notify_all();
        }
    }
}
