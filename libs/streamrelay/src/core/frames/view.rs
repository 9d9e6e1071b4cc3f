// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::{FrameLayout, PixelFormat};
use crate::core::engine::{ElementType, TensorShape};

/// Who owns the memory behind a [`FrameView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    /// Maps pipeline memory directly; valid only while the pipeline buffer is
    Borrowed,
    /// Scratch copy owned by the view
    Owned,
}

/// Bounded-lifetime view over raw pixel memory handed to inference.
///
/// A borrowed view carries the lifetime of the pipeline buffer it maps, so
/// the compiler rejects any read after that buffer is gone. Use
/// [`FrameView::into_owned`] to copy explicitly.
#[derive(Debug, Clone)]
pub struct FrameView<'a> {
    layout: FrameLayout,
    data: Cow<'a, [u8]>,
    source_size: Option<(u32, u32)>,
}

impl<'a> FrameView<'a> {
    pub fn borrowed(layout: FrameLayout, data: &'a [u8]) -> Self {
        Self {
            layout,
            data: Cow::Borrowed(data),
            source_size: None,
        }
    }

    pub fn owned(layout: FrameLayout, data: Vec<u8>) -> FrameView<'static> {
        FrameView {
            layout,
            data: Cow::Owned(data),
            source_size: None,
        }
    }

    /// Record the size of the frame this view was derived from, so
    /// detections scale back into source pixel coordinates.
    pub fn with_source_size(mut self, width: u32, height: u32) -> Self {
        self.source_size = Some((width, height));
        self
    }

    pub fn width(&self) -> u32 {
        self.layout.width
    }

    pub fn height(&self) -> u32 {
        self.layout.height
    }

    pub fn format(&self) -> PixelFormat {
        self.layout.format
    }

    pub fn stride(&self) -> usize {
        self.layout.stride
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn ownership(&self) -> Ownership {
        match self.data {
            Cow::Borrowed(_) => Ownership::Borrowed,
            Cow::Owned(_) => Ownership::Owned,
        }
    }

    pub fn is_borrowed(&self) -> bool {
        self.ownership() == Ownership::Borrowed
    }

    /// Source frame size, defaulting to the view's own size.
    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
            .unwrap_or((self.layout.width, self.layout.height))
    }

    /// Tensor this view would bind to as an engine input.
    pub fn tensor_shape(&self) -> TensorShape {
        let h = self.layout.height as usize;
        let w = self.layout.width as usize;
        match self.layout.format {
            PixelFormat::RgbF32Planar => TensorShape::new([1, 3, h, w], ElementType::F32),
            PixelFormat::Nv12 | PixelFormat::I420 => {
                TensorShape::new([1, h + h.div_ceil(2), w], ElementType::U8)
            }
            packed => TensorShape::new(
                [1, h, w, packed.packed_bytes_per_pixel().unwrap_or(1)],
                ElementType::U8,
            ),
        }
    }

    /// Copy into a view that owns its memory.
    pub fn into_owned(self) -> FrameView<'static> {
        FrameView {
            layout: self.layout,
            data: Cow::Owned(self.data.into_owned()),
            source_size: self.source_size,
        }
    }
}
