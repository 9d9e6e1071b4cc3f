// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Memory contract between the media pipeline and the inference engine.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{FrameLayout, FrameView, Ownership, PipelineBuffer, PixelFormat};
use crate::core::error::ExchangeError;
use crate::core::logging::{Severity, SharedLogSink};

/// Counters for views handed out by a [`FrameExchange`].
#[derive(Debug, Default)]
pub struct ExchangeStats {
    pub borrowed: AtomicU64,
    pub owned: AtomicU64,
    pub released_owned_bytes: AtomicU64,
}

/// Maps pipeline buffers into [`FrameView`]s.
///
/// Copies only when the pipeline layout cannot be handed to the engine as
/// is: padded rows, a different channel order, or YUV input for an RGB
/// consumer. Element-type changes (u8 to f32) are normalization and stay
/// with the caller.
pub struct FrameExchange {
    log: SharedLogSink,
    stats: ExchangeStats,
}

impl FrameExchange {
    pub fn new(log: SharedLogSink) -> Self {
        Self {
            log,
            stats: ExchangeStats::default(),
        }
    }

    pub fn stats(&self) -> &ExchangeStats {
        &self.stats
    }

    pub fn acquire<'a>(
        &self,
        buffer: &'a dyn PipelineBuffer,
        target: PixelFormat,
    ) -> Result<FrameView<'a>, ExchangeError> {
        let layout = buffer.layout();
        let bytes = buffer.bytes();
        if let Some(plane) = layout.short_plane() {
            return Err(ExchangeError::StrideTooSmall {
                stride: plane.stride,
                row_bytes: plane.row_bytes,
            });
        }
        let required = layout.required_len();
        if bytes.len() < required {
            return Err(ExchangeError::BufferTooSmall {
                expected: required,
                actual: bytes.len(),
            });
        }

        if layout.format == target {
            if layout.is_tight() {
                self.stats.borrowed.fetch_add(1, Ordering::Relaxed);
                return Ok(FrameView::borrowed(layout, &bytes[..required]));
            }
            let (tight, data) = repack(layout, bytes);
            return Ok(self.owned(tight, data));
        }

        let converted = if layout.format.is_packed_u8() && target.is_packed_u8() {
            swizzle(layout, bytes, target)
        } else if layout.format.is_yuv() && target.is_packed_u8() {
            yuv_to_packed(layout, bytes, target)
        } else {
            return Err(ExchangeError::UnsupportedConversion {
                from: layout.format,
                to: target,
            });
        };

        self.log.log(
            Severity::Verbose,
            &format!(
                "frame exchange: converted {}x{} {:?} -> {:?}",
                layout.width, layout.height, layout.format, target
            ),
        );
        let tight = FrameLayout::tight(layout.width, layout.height, target);
        Ok(self.owned(tight, converted))
    }

    /// Free an owned view's scratch memory. Borrowed views are left alone;
    /// their memory belongs to the pipeline.
    pub fn release(&self, view: FrameView<'_>) -> Ownership {
        let ownership = view.ownership();
        if ownership == Ownership::Owned {
            self.stats
                .released_owned_bytes
                .fetch_add(view.bytes().len() as u64, Ordering::Relaxed);
        }
        drop(view);
        ownership
    }

    fn owned(&self, layout: FrameLayout, data: Vec<u8>) -> FrameView<'static> {
        self.stats.owned.fetch_add(1, Ordering::Relaxed);
        FrameView::owned(layout, data)
    }
}

/// Copy every plane row-by-row into a tightly packed buffer.
fn repack(layout: FrameLayout, bytes: &[u8]) -> (FrameLayout, Vec<u8>) {
    let tight = FrameLayout::tight(layout.width, layout.height, layout.format);
    let mut out = vec![0u8; tight.required_len()];
    for (src, dst) in layout.planes().iter().zip(tight.planes()) {
        for row in 0..src.rows {
            let from = src.offset + row * src.stride;
            let to = dst.offset + row * dst.stride;
            out[to..to + dst.row_bytes].copy_from_slice(&bytes[from..from + src.row_bytes]);
        }
    }
    (tight, out)
}

fn read_packed(format: PixelFormat, px: &[u8]) -> [u8; 4] {
    match format {
        PixelFormat::Rgb8 => [px[0], px[1], px[2], 255],
        PixelFormat::Bgr8 => [px[2], px[1], px[0], 255],
        PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
        PixelFormat::Bgra8 => [px[2], px[1], px[0], px[3]],
        _ => [0, 0, 0, 255],
    }
}

fn write_packed(format: PixelFormat, rgba: [u8; 4], out: &mut Vec<u8>) {
    let [r, g, b, a] = rgba;
    match format {
        PixelFormat::Rgb8 => out.extend_from_slice(&[r, g, b]),
        PixelFormat::Bgr8 => out.extend_from_slice(&[b, g, r]),
        PixelFormat::Rgba8 => out.extend_from_slice(&[r, g, b, a]),
        PixelFormat::Bgra8 => out.extend_from_slice(&[b, g, r, a]),
        _ => {}
    }
}

fn swizzle(layout: FrameLayout, bytes: &[u8], target: PixelFormat) -> Vec<u8> {
    let src_bpp = layout.format.packed_bytes_per_pixel().unwrap_or(3);
    let dst = FrameLayout::tight(layout.width, layout.height, target);
    let mut out = Vec::with_capacity(dst.required_len());
    for y in 0..layout.height as usize {
        let row = &bytes[y * layout.stride..];
        for x in 0..layout.width as usize {
            let px = &row[x * src_bpp..x * src_bpp + src_bpp];
            write_packed(target, read_packed(layout.format, px), &mut out);
        }
    }
    out
}

/// BT.601 limited-range YUV to RGB.
fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
        255,
    ]
}

fn yuv_to_packed(layout: FrameLayout, bytes: &[u8], target: PixelFormat) -> Vec<u8> {
    let planes = layout.planes();
    let dst = FrameLayout::tight(layout.width, layout.height, target);
    let mut out = Vec::with_capacity(dst.required_len());
    let luma = planes[0];
    for y in 0..layout.height as usize {
        for x in 0..layout.width as usize {
            let yv = bytes[luma.offset + y * luma.stride + x];
            let (u, v) = match layout.format {
                PixelFormat::Nv12 => {
                    let uv = planes[1];
                    let at = uv.offset + (y / 2) * uv.stride + (x / 2) * 2;
                    (bytes[at], bytes[at + 1])
                }
                _ => {
                    let (up, vp) = (planes[1], planes[2]);
                    (
                        bytes[up.offset + (y / 2) * up.stride + x / 2],
                        bytes[vp.offset + (y / 2) * vp.stride + x / 2],
                    )
                }
            };
            write_packed(target, yuv_pixel(yv, u, v), &mut out);
        }
    }
    out
}
