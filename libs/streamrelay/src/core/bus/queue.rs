// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::LoopEvent;

/// Multi-producer, single-consumer queue feeding the orchestration loop.
pub struct EventQueue {
    tx: Sender<LoopEvent>,
    rx: Receiver<LoopEvent>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    pub fn try_recv(&self) -> Option<LoopEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<LoopEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Cloneable handle for pushing events from callbacks and workers.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<LoopEvent>,
}

impl EventSender {
    /// Push an event. Returns `false` once the loop is gone.
    pub fn send(&self, event: LoopEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("queued", &self.tx.len())
            .finish()
    }
}
