// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a tensor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    U8,
}

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            ElementType::F32 => 4,
            ElementType::U8 => 1,
        }
    }
}

/// Dimensions and element type of an engine input or output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    pub dims: Vec<usize>,
    pub element: ElementType,
}

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>, element: ElementType) -> Self {
        Self {
            dims: dims.into(),
            element,
        }
    }

    pub fn f32(dims: impl Into<Vec<usize>>) -> Self {
        Self::new(dims, ElementType::F32)
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.element_count() * self.element.size()
    }

    /// Innermost dimension, the row width of a detection output.
    pub fn row_width(&self) -> usize {
        self.dims.last().copied().unwrap_or(0)
    }

    /// `(height, width)` of an NCHW `[1, 3, H, W]` f32 input.
    pub fn nchw_spatial(&self) -> Option<(u32, u32)> {
        match (self.element, self.dims.as_slice()) {
            (ElementType::F32, [1, 3, h, w]) => Some((*h as u32, *w as u32)),
            _ => None,
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        write!(f, "[{}] {:?}", dims.join("x"), self.element)
    }
}
