// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::FrameLayout;

/// Raw frame memory delivered by the media pipeline.
pub trait PipelineBuffer: Send {
    fn layout(&self) -> FrameLayout;
    fn bytes(&self) -> &[u8];
}

impl<T: PipelineBuffer + Sync> PipelineBuffer for Arc<T> {
    fn layout(&self) -> FrameLayout {
        (**self).layout()
    }

    fn bytes(&self) -> &[u8] {
        (**self).bytes()
    }
}

impl PipelineBuffer for Box<dyn PipelineBuffer> {
    fn layout(&self) -> FrameLayout {
        (**self).layout()
    }

    fn bytes(&self) -> &[u8] {
        (**self).bytes()
    }
}

/// A frame held in ordinary host memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFrame {
    layout: FrameLayout,
    data: Vec<u8>,
}

impl HostFrame {
    pub fn new(layout: FrameLayout, data: Vec<u8>) -> Self {
        Self { layout, data }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl PipelineBuffer for HostFrame {
    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }
}
