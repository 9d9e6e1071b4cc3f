// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Caller-side preparation of frames for a model input.

use super::{FrameLayout, FrameView, PixelFormat};
use crate::core::engine::TensorShape;
use crate::core::error::ExchangeError;

/// Turns an acquired frame into exactly what an engine input expects.
pub trait FramePreprocessor: Send + Sync {
    /// Format to request from the frame exchange before [`prepare`](Self::prepare).
    fn acquire_format(&self) -> PixelFormat {
        PixelFormat::Rgb8
    }

    fn prepare(
        &self,
        view: &FrameView<'_>,
        input: &TensorShape,
    ) -> Result<FrameView<'static>, ExchangeError>;
}

/// Nearest-neighbour resize to the input size, `1/255` scaling and
/// HWC → CHW reordering into an `RgbF32Planar` view.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizePreprocessor;

impl FramePreprocessor for NormalizePreprocessor {
    fn prepare(
        &self,
        view: &FrameView<'_>,
        input: &TensorShape,
    ) -> Result<FrameView<'static>, ExchangeError> {
        let unsupported = ExchangeError::UnsupportedConversion {
            from: view.format(),
            to: PixelFormat::RgbF32Planar,
        };
        let (out_h, out_w) = input.nchw_spatial().ok_or(unsupported.clone())?;
        let (r_at, b_at) = match view.format() {
            PixelFormat::Rgb8 => (0, 2),
            PixelFormat::Bgr8 => (2, 0),
            _ => return Err(unsupported),
        };
        if view.width() == 0 || view.height() == 0 {
            return Err(unsupported);
        }

        let (in_w, in_h) = (view.width() as usize, view.height() as usize);
        let (out_w, out_h) = (out_w as usize, out_h as usize);
        let plane = out_w * out_h;
        let mut planes = vec![0f32; plane * 3];
        let src = view.bytes();
        for oy in 0..out_h {
            let sy = oy * in_h / out_h;
            for ox in 0..out_w {
                let sx = ox * in_w / out_w;
                let px = &src[sy * view.stride() + sx * 3..][..3];
                let at = oy * out_w + ox;
                planes[at] = px[r_at] as f32 / 255.0;
                planes[plane + at] = px[1] as f32 / 255.0;
                planes[2 * plane + at] = px[b_at] as f32 / 255.0;
            }
        }

        let bytes = planes.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let layout = FrameLayout::tight(out_w as u32, out_h as u32, PixelFormat::RgbF32Planar);
        let (src_w, src_h) = view.source_size();
        Ok(FrameView::owned(layout, bytes).with_source_size(src_w, src_h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_at(view: &FrameView<'_>, index: usize) -> f32 {
        let b = &view.bytes()[index * 4..index * 4 + 4];
        f32::from_ne_bytes([b[0], b[1], b[2], b[3]])
    }

    #[test]
    fn test_normalize_downscale_to_chw() {
        // 4x4 RGB, every pixel (255, 0, 51).
        let layout = FrameLayout::tight(4, 4, PixelFormat::Rgb8);
        let data: Vec<u8> = std::iter::repeat([255u8, 0, 51]).take(16).flatten().collect();
        let view = FrameView::borrowed(layout, &data);

        let out = NormalizePreprocessor
            .prepare(&view, &TensorShape::f32([1, 3, 2, 2]))
            .unwrap();
        assert_eq!(out.format(), PixelFormat::RgbF32Planar);
        assert_eq!(out.tensor_shape(), TensorShape::f32([1, 3, 2, 2]));
        assert_eq!(out.source_size(), (4, 4));
        assert_eq!(f32_at(&out, 0), 1.0);
        assert_eq!(f32_at(&out, 4), 0.0);
        assert!((f32_at(&out, 8) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_bgr_channels_swapped() {
        let layout = FrameLayout::tight(1, 1, PixelFormat::Bgr8);
        let data = vec![0u8, 0, 255];
        let view = FrameView::borrowed(layout, &data);
        let out = NormalizePreprocessor
            .prepare(&view, &TensorShape::f32([1, 3, 1, 1]))
            .unwrap();
        assert_eq!(f32_at(&out, 0), 1.0);
        assert_eq!(f32_at(&out, 2), 0.0);
    }

    #[test]
    fn test_rejects_non_nchw_input() {
        let layout = FrameLayout::tight(1, 1, PixelFormat::Rgb8);
        let data = vec![0u8; 3];
        let view = FrameView::borrowed(layout, &data);
        assert!(NormalizePreprocessor
            .prepare(&view, &TensorShape::f32([1, 300, 6]))
            .is_err());
    }
}
