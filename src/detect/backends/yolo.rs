//! YOLOv8 pre- and post-processing, independent of the inference runtime.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::Frame;

use super::coco::class_name;

pub const INPUT_SIZE: usize = 640;
pub const IOU_THRESHOLD: f32 = 0.45;
pub const MAX_DETECTIONS: usize = 100;

const PAD_VALUE: f32 = 114.0 / 255.0;

/// Scale and padding applied to map a frame onto the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Letterbox {
    pub fn fit(frame_width: u32, frame_height: u32, size: usize) -> Result<Self> {
        if frame_width == 0 || frame_height == 0 {
            return Err(anyhow!("cannot letterbox an empty frame"));
        }
        let scale = (size as f32 / frame_width as f32).min(size as f32 / frame_height as f32);
        let new_w = (frame_width as f32 * scale) as usize;
        let new_h = (frame_height as f32 * scale) as usize;
        Ok(Self {
            scale,
            pad_x: ((size - new_w) / 2) as f32,
            pad_y: ((size - new_h) / 2) as f32,
            frame_width,
            frame_height,
        })
    }

    /// Map a center-format box in model space back to frame pixels.
    fn to_frame(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let cx = (cx - self.pad_x) / self.scale;
        let cy = (cy - self.pad_y) / self.scale;
        let w = w / self.scale;
        let h = h / self.scale;
        let max_x = self.frame_width as f32;
        let max_y = self.frame_height as f32;
        BoundingBox::new(
            (cx - w / 2.0).clamp(0.0, max_x),
            (cy - h / 2.0).clamp(0.0, max_y),
            (cx + w / 2.0).clamp(0.0, max_x),
            (cy + h / 2.0).clamp(0.0, max_y),
        )
    }
}

/// Nearest-neighbour letterbox into a planar CHW buffer scaled to `0..=1`.
pub fn letterbox(frame: &Frame, size: usize) -> Result<(Vec<f32>, Letterbox)> {
    let geometry = Letterbox::fit(frame.width, frame.height, size)?;
    let (src_w, src_h) = (frame.width as usize, frame.height as usize);
    let new_w = (src_w as f32 * geometry.scale) as usize;
    let new_h = (src_h as f32 * geometry.scale) as usize;
    let (pad_x, pad_y) = (geometry.pad_x as usize, geometry.pad_y as usize);
    let plane = size * size;
    let pixels = frame.pixels();

    let mut input = vec![PAD_VALUE; plane * 3];
    for y in 0..new_h {
        let src_y = ((y as f32 / geometry.scale) as usize).min(src_h - 1);
        for x in 0..new_w {
            let src_x = ((x as f32 / geometry.scale) as usize).min(src_w - 1);
            let src = (src_y * src_w + src_x) * 3;
            let dst = (y + pad_y) * size + (x + pad_x);
            for channel in 0..3 {
                input[channel * plane + dst] = pixels[src + channel] as f32 / 255.0;
            }
        }
    }
    Ok((input, geometry))
}

/// Decode a `[1, 4 + C, N]` output, laid out row-major, into detections.
///
/// Each column holds `cx, cy, w, h` followed by one score per class. Columns
/// scoring below `min_score` are dropped before non-maximum suppression.
pub fn decode(
    output: &[f32],
    shape: &[usize],
    geometry: &Letterbox,
    min_score: f32,
) -> Result<Vec<RawDetection>> {
    let (rows, count) = match shape {
        [1, rows, count] if *rows > 4 => (*rows, *count),
        _ => return Err(anyhow!("unexpected YOLO output shape {:?}", shape)),
    };
    if output.len() != rows * count {
        return Err(anyhow!(
            "YOLO output holds {} values, shape {:?} needs {}",
            output.len(),
            shape,
            rows * count
        ));
    }

    let at = |row: usize, column: usize| output[row * count + column];
    let mut candidates = Vec::new();
    for column in 0..count {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..rows - 4 {
            let score = at(4 + class, column);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < min_score {
            continue;
        }
        let bbox = geometry.to_frame(at(0, column), at(1, column), at(2, column), at(3, column));
        candidates.push(RawDetection::new(class_name(best_class), best_score, bbox));
    }
    Ok(non_maximum_suppression(candidates, IOU_THRESHOLD, MAX_DETECTIONS))
}

/// Greedy per-class NMS. Output is sorted by descending confidence.
pub fn non_maximum_suppression(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
    limit: usize,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<RawDetection> = Vec::new();
    for detection in detections {
        if keep.len() >= limit {
            break;
        }
        let overlaps = keep.iter().any(|kept| {
            kept.class_name == detection.class_name && kept.bbox.iou(&detection.bbox) > iou_threshold
        });
        if !overlaps {
            keep.push(detection);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_the_short_side() -> Result<()> {
        let geometry = Letterbox::fit(640, 480, INPUT_SIZE)?;
        assert_eq!(geometry.scale, 1.0);
        assert_eq!(geometry.pad_x, 0.0);
        assert_eq!(geometry.pad_y, 80.0);
        Ok(())
    }

    #[test]
    fn letterbox_copies_pixels_into_planes() -> Result<()> {
        let frame = Frame::filled(4, 2, 255, 1)?;
        let (input, geometry) = letterbox(&frame, 8)?;
        assert_eq!(input.len(), 8 * 8 * 3);
        assert_eq!(geometry.scale, 2.0);
        assert_eq!(geometry.pad_y, 2.0);
        // top padding row keeps the fill value, first image row is white
        assert_eq!(input[0], PAD_VALUE);
        assert_eq!(input[2 * 8], 1.0);
        assert_eq!(input[64 + 2 * 8], 1.0);
        Ok(())
    }

    fn output_with(columns: &[[f32; 6]]) -> (Vec<f32>, Vec<usize>) {
        // rows: cx, cy, w, h, score(class 0), score(class 1)
        let count = columns.len();
        let mut data = vec![0.0; 6 * count];
        for (column, values) in columns.iter().enumerate() {
            for (row, value) in values.iter().enumerate() {
                data[row * count + column] = *value;
            }
        }
        (data, vec![1, 6, count])
    }

    #[test]
    fn decode_maps_boxes_back_to_frame_space() -> Result<()> {
        let geometry = Letterbox::fit(640, 480, INPUT_SIZE)?;
        let (data, shape) = output_with(&[[320.0, 320.0, 100.0, 50.0, 0.1, 0.9]]);
        let detections = decode(&data, &shape, &geometry, 0.25)?;
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.class_name, "bicycle");
        assert_eq!(det.confidence, 0.9);
        assert_eq!(det.bbox, BoundingBox::new(270.0, 215.0, 370.0, 265.0));
        Ok(())
    }

    #[test]
    fn decode_drops_low_scores_and_suppresses_overlaps() -> Result<()> {
        let geometry = Letterbox::fit(640, 640, INPUT_SIZE)?;
        let (data, shape) = output_with(&[
            [100.0, 100.0, 50.0, 50.0, 0.8, 0.0],
            [102.0, 100.0, 50.0, 50.0, 0.7, 0.0],
            [400.0, 400.0, 50.0, 50.0, 0.6, 0.0],
            [400.0, 400.0, 50.0, 50.0, 0.0, 0.1],
        ]);
        let detections = decode(&data, &shape, &geometry, 0.25)?;
        let scores: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.8, 0.6]);
        Ok(())
    }

    #[test]
    fn decode_rejects_bad_shapes() -> Result<()> {
        let geometry = Letterbox::fit(640, 640, INPUT_SIZE)?;
        assert!(decode(&[0.0; 8], &[1, 4, 2], &geometry, 0.25).is_err());
        assert!(decode(&[0.0; 8], &[1, 6, 2], &geometry, 0.25).is_err());
        Ok(())
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let kept = non_maximum_suppression(
            vec![
                RawDetection::new("bottle", 0.9, bbox),
                RawDetection::new("cup", 0.8, bbox),
                RawDetection::new("bottle", 0.7, bbox),
            ],
            IOU_THRESHOLD,
            MAX_DETECTIONS,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].class_name, "cup");
    }
}
