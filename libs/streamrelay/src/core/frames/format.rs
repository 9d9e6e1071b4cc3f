// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

/// Pixel memory formats understood by the frame exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    /// Y plane followed by interleaved UV at half resolution
    Nv12,
    /// Y, U, V planes, chroma at half resolution
    I420,
    /// Three f32 planes (R, G, B), the usual detector input
    RgbF32Planar,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats.
    pub fn packed_bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => Some(3),
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => Some(4),
            _ => None,
        }
    }

    pub fn is_packed_u8(self) -> bool {
        self.packed_bytes_per_pixel().is_some()
    }

    pub fn is_yuv(self) -> bool {
        matches!(self, PixelFormat::Nv12 | PixelFormat::I420)
    }

    /// Bytes in one tightly packed row of the first plane.
    pub fn tight_stride(self, width: u32) -> usize {
        let width = width as usize;
        match self {
            PixelFormat::Nv12 | PixelFormat::I420 => width,
            PixelFormat::RgbF32Planar => width * 4,
            packed => width * packed.packed_bytes_per_pixel().unwrap_or(1),
        }
    }
}

/// Geometry of one plane inside a frame's byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub offset: usize,
    pub stride: usize,
    /// Meaningful bytes per row (`<= stride`)
    pub row_bytes: usize,
    pub rows: usize,
}

impl Plane {
    pub fn end(&self) -> usize {
        self.offset + self.stride * self.rows
    }
}

/// Dimensions and memory layout of a frame.
///
/// `stride` is the row pitch of the first plane; chroma planes of the YUV
/// formats derive theirs from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: usize,
}

impl FrameLayout {
    /// Layout with no row padding.
    pub fn tight(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            stride: format.tight_stride(width),
        }
    }

    pub fn is_tight(&self) -> bool {
        self.stride == self.format.tight_stride(self.width)
    }

    pub fn planes(&self) -> Vec<Plane> {
        let w = self.width as usize;
        let h = self.height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);
        match self.format {
            PixelFormat::Nv12 => vec![
                Plane { offset: 0, stride: self.stride, row_bytes: w, rows: h },
                Plane { offset: self.stride * h, stride: self.stride, row_bytes: cw * 2, rows: ch },
            ],
            PixelFormat::I420 => {
                let cstride = self.stride.div_ceil(2);
                let u_offset = self.stride * h;
                let v_offset = u_offset + cstride * ch;
                vec![
                    Plane { offset: 0, stride: self.stride, row_bytes: w, rows: h },
                    Plane { offset: u_offset, stride: cstride, row_bytes: cw, rows: ch },
                    Plane { offset: v_offset, stride: cstride, row_bytes: cw, rows: ch },
                ]
            }
            PixelFormat::RgbF32Planar => (0..3)
                .map(|i| Plane {
                    offset: i * self.stride * h,
                    stride: self.stride,
                    row_bytes: w * 4,
                    rows: h,
                })
                .collect(),
            packed => vec![Plane {
                offset: 0,
                stride: self.stride,
                row_bytes: w * packed.packed_bytes_per_pixel().unwrap_or(1),
                rows: h,
            }],
        }
    }

    /// First plane whose stride cannot hold one row of pixels.
    pub fn short_plane(&self) -> Option<Plane> {
        self.planes().into_iter().find(|p| p.stride < p.row_bytes)
    }

    /// Minimum byte length a buffer with this layout must have.
    pub fn required_len(&self) -> usize {
        self.planes().last().map(Plane::end).unwrap_or(0)
    }
}
