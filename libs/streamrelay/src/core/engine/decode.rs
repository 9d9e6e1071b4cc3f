// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fixed-row detection decoding.
//!
//! Every output row is `(cx, cy, w|x2, h|y2, confidence, class_id)`; any
//! extra trailing values are ignored.

use serde::{Deserialize, Serialize};

/// Values per output row the decoder reads.
pub const DETECTION_ROW_WIDTH: usize = 6;

/// Axis-aligned box in source-frame pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// How the first four values of a row describe the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxEncoding {
    /// `(center_x, center_y, width, height)`
    #[default]
    CenterSize,
    /// `(x1, y1, x2, y2)`, as exported by end-to-end YOLO11 engines
    Corners,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Rows below this confidence are discarded.
    pub confidence_threshold: f32,
    pub box_encoding: BoxEncoding,
    /// Rows whose class id is outside `0..num_classes` are discarded.
    pub num_classes: Option<u32>,
    pub max_detections: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.2,
            box_encoding: BoxEncoding::CenterSize,
            num_classes: Some(80),
            max_detections: 300,
        }
    }
}

/// Decode an output tensor of `row_width`-wide rows.
///
/// `scale` maps model coordinates to source-frame pixels.
pub fn decode_rows(
    output: &[f32],
    row_width: usize,
    config: &DecodeConfig,
    scale: (f32, f32),
) -> Vec<Detection> {
    if row_width < DETECTION_ROW_WIDTH {
        return Vec::new();
    }
    let (sx, sy) = scale;
    let mut detections = Vec::new();
    for row in output.chunks_exact(row_width) {
        if detections.len() >= config.max_detections {
            break;
        }
        let (a, b, c, d, confidence, class) = (row[0], row[1], row[2], row[3], row[4], row[5]);
        if !row[..DETECTION_ROW_WIDTH].iter().all(|v| v.is_finite()) {
            continue;
        }
        if confidence < config.confidence_threshold {
            continue;
        }
        if class < 0.0 || config.num_classes.is_some_and(|n| class >= n as f32) {
            continue;
        }
        let (x, y, w, h) = match config.box_encoding {
            BoxEncoding::CenterSize => (a - c / 2.0, b - d / 2.0, c, d),
            BoxEncoding::Corners => (a, b, c - a, d - b),
        };
        detections.push(Detection {
            class_id: class as u32,
            confidence: confidence.min(1.0),
            bbox: BoundingBox {
                x: x * sx,
                y: y * sy,
                width: w * sx,
                height: h * sy,
            },
        });
    }
    detections
}

/// Greedy per-class overlap suppression. Not applied by the engine
/// manager; callers layer it on when their model needs it.
pub fn suppress_overlaps(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_size_to_top_left() {
        let out = [100.0, 50.0, 20.0, 10.0, 0.9, 3.0];
        let dets = decode_rows(&out, 6, &DecodeConfig::default(), (1.0, 1.0));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 3);
        assert_eq!(
            dets[0].bbox,
            BoundingBox { x: 90.0, y: 45.0, width: 20.0, height: 10.0 }
        );
    }

    #[test]
    fn test_corners_encoding_and_scale() {
        let config = DecodeConfig {
            box_encoding: BoxEncoding::Corners,
            ..DecodeConfig::default()
        };
        let out = [10.0, 20.0, 30.0, 60.0, 0.5, 0.0];
        let dets = decode_rows(&out, 6, &config, (2.0, 0.5));
        assert_eq!(
            dets[0].bbox,
            BoundingBox { x: 20.0, y: 10.0, width: 40.0, height: 20.0 }
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let out = [0.0, 0.0, 1.0, 1.0, 0.2, 1.0, 0.0, 0.0, 1.0, 1.0, 0.19, 1.0];
        let dets = decode_rows(&out, 6, &DecodeConfig::default(), (1.0, 1.0));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].confidence, 0.2);
    }

    #[test]
    fn test_out_of_range_class_and_nan_dropped() {
        let out = [
            0.0, 0.0, 1.0, 1.0, 0.9, 80.0, // class 80 with 80 classes
            0.0, 0.0, 1.0, 1.0, 0.9, -1.0, // negative class
            f32::NAN, 0.0, 1.0, 1.0, 0.9, 1.0, // non-finite
            0.0, 0.0, 1.0, 1.0, 0.9, 79.0,
        ];
        let dets = decode_rows(&out, 6, &DecodeConfig::default(), (1.0, 1.0));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 79);
    }

    #[test]
    fn test_wider_rows_and_cap() {
        let config = DecodeConfig {
            max_detections: 2,
            ..DecodeConfig::default()
        };
        let row = [5.0, 5.0, 2.0, 2.0, 0.8, 1.0, 42.0];
        let out: Vec<f32> = row.iter().copied().cycle().take(7 * 4).collect();
        let dets = decode_rows(&out, 7, &config, (1.0, 1.0));
        assert_eq!(dets.len(), 2);
        assert!(decode_rows(&out, 5, &config, (1.0, 1.0)).is_empty());
    }

    #[test]
    fn test_suppress_overlaps_per_class() {
        let det = |class_id, confidence, x| Detection {
            class_id,
            confidence,
            bbox: BoundingBox { x, y: 0.0, width: 10.0, height: 10.0 },
        };
        let kept = suppress_overlaps(
            vec![det(0, 0.6, 1.0), det(0, 0.9, 0.0), det(1, 0.5, 0.0), det(0, 0.7, 50.0)],
            0.5,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert!(kept.iter().any(|d| d.class_id == 1));
        assert!(!kept.iter().any(|d| d.confidence == 0.6));
    }
}
