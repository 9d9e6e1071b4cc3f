// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod events;
mod monitor;
mod queue;

pub use events::{BusEvent, BusMessage, DetectionBatch, EventClass, LoopEvent};
pub use monitor::{BusMonitor, FaultRecord, MonitorVerdict};
pub use queue::{EventQueue, EventSender};
