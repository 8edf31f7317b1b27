//! Detection engine contract, box extraction and per-class grouping.

use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::Rect;
use crate::error::{DetectorError, Result};

/// Boxes narrower or shorter than this fraction of the frame are dropped.
pub const MIN_BOX_EXTENT: f32 = 0.01;

/// Thresholds handed to the engine's decoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodeParams {
    pub threshold: f32,
    pub hier_threshold: f32,
    pub nms: f32,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            hier_threshold: 0.5,
            nms: 0.4,
        }
    }
}

/// Box as produced by the engine's decoder: normalized center/size plus one
/// probability per class.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub probs: Vec<f32>,
}

/// Neural detection engine.
///
/// `predict` runs the forward pass on a pre-processed `(3, h, w)` input and
/// returns the raw output tensor; `decode` turns a (possibly averaged) raw
/// tensor back into boxes, including non-max suppression.
pub trait DetectionEngine: Send {
    /// Input size `(width, height)` expected by `predict`.
    fn input_size(&self) -> (u32, u32);

    /// Length of the raw tensor returned by `predict`.
    fn output_len(&self) -> usize;

    /// Upper bound on the number of boxes a decode can produce.
    fn box_capacity(&self) -> usize;

    fn predict(&mut self, input: &Array3<f32>) -> Result<Array1<f32>>;

    fn decode(
        &mut self,
        prediction: &Array1<f32>,
        frame_size: (usize, usize),
        params: &DecodeParams,
    ) -> Result<Vec<DecodedBox>>;
}

/// Surviving (box, class) pair in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub class_id: usize,
    pub confidence: f32,
}

impl DetectionBox {
    /// Pixel rectangle in a `width`×`height` frame, truncated like the
    /// normalized→pixel conversion of the published records and clamped to
    /// the last row/column.
    pub fn to_pixel_rect(&self, width: usize, height: usize) -> Rect {
        let (fw, fh) = (width as f32, height as f32);
        let max_x = width.saturating_sub(1) as i32;
        let max_y = height.saturating_sub(1) as i32;
        Rect {
            xmin: (((self.x - self.w / 2.0) * fw) as i32).clamp(0, max_x),
            ymin: (((self.y - self.h / 2.0) * fh) as i32).clamp(0, max_y),
            xmax: (((self.x + self.w / 2.0) * fw) as i32).clamp(0, max_x),
            ymax: (((self.y + self.h / 2.0) * fh) as i32).clamp(0, max_y),
        }
    }
}

/// Converts decoded boxes into a flat, class-tagged list.
///
/// The output buffer is sized once from the engine's box capacity and the
/// class count, and never grows past it.
pub struct BoxExtractor {
    num_classes: usize,
    capacity: usize,
    boxes: Vec<DetectionBox>,
}

impl BoxExtractor {
    pub fn new(num_classes: usize, box_capacity: usize) -> Self {
        let capacity = box_capacity.saturating_mul(num_classes.max(1));
        Self {
            num_classes,
            capacity,
            boxes: Vec::with_capacity(capacity),
        }
    }

    /// Clamp each box to `[0, 1]` and keep one entry per class with a
    /// non-zero probability, provided both sides exceed [`MIN_BOX_EXTENT`].
    pub fn extract(&mut self, decoded: &[DecodedBox]) -> &[DetectionBox] {
        self.boxes.clear();
        'boxes: for det in decoded {
            let xmin = (det.x - det.w / 2.0).max(0.0);
            let xmax = (det.x + det.w / 2.0).min(1.0);
            let ymin = (det.y - det.h / 2.0).max(0.0);
            let ymax = (det.y + det.h / 2.0).min(1.0);

            let width = xmax - xmin;
            let height = ymax - ymin;
            if width <= MIN_BOX_EXTENT || height <= MIN_BOX_EXTENT {
                continue;
            }

            let classes = det.probs.len().min(self.num_classes);
            for (class_id, &prob) in det.probs[..classes].iter().enumerate() {
                if prob == 0.0 {
                    continue;
                }
                if self.boxes.len() == self.capacity {
                    warn!(
                        capacity = self.capacity,
                        "box buffer full, dropping remaining detections"
                    );
                    break 'boxes;
                }
                self.boxes.push(DetectionBox {
                    x: (xmin + xmax) / 2.0,
                    y: (ymin + ymax) / 2.0,
                    w: width,
                    h: height,
                    class_id,
                    confidence: prob,
                });
            }
        }
        &self.boxes
    }
}

/// Detections grouped by class. Cleared at the end of every publish cycle.
#[derive(Debug, Clone)]
pub struct ClassBuckets {
    buckets: Vec<Vec<DetectionBox>>,
}

impl ClassBuckets {
    pub fn new(num_classes: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); num_classes],
        }
    }

    pub fn fill(&mut self, boxes: &[DetectionBox]) {
        for b in boxes {
            if let Some(bucket) = self.buckets.get_mut(b.class_id) {
                bucket.push(*b);
            }
        }
    }

    pub fn class(&self, class_id: usize) -> &[DetectionBox] {
        self.buckets.get(class_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    /// Every detection in ascending class order, boxes in extraction order.
    pub fn iter(&self) -> impl Iterator<Item = &DetectionBox> {
        self.buckets.iter().flatten()
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }
}

/// Deterministic engine replaying a fixed scene.
///
/// The raw tensor is the scene flattened as `[x, y, w, h, p0 .. pN]` per box,
/// padded with zeros up to the box capacity, so temporal averaging behaves
/// exactly as it would on a real network's output. Decoding zeroes
/// probabilities below the threshold and skips boxes left with none. No
/// suppression is applied.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    input_size: (u32, u32),
    num_classes: usize,
    box_capacity: usize,
    scene: Vec<DecodedBox>,
}

impl ScriptedEngine {
    pub fn new(input_size: (u32, u32), num_classes: usize, box_capacity: usize) -> Self {
        Self {
            input_size,
            num_classes,
            box_capacity: box_capacity.max(1),
            scene: Vec::new(),
        }
    }

    /// Box every prediction reports. Probabilities beyond the class count
    /// are ignored; boxes beyond the capacity are dropped.
    pub fn with_box(mut self, x: f32, y: f32, w: f32, h: f32, probs: &[f32]) -> Self {
        if self.scene.len() < self.box_capacity {
            let mut p = vec![0.0; self.num_classes];
            let n = probs.len().min(self.num_classes);
            p[..n].copy_from_slice(&probs[..n]);
            self.scene.push(DecodedBox { x, y, w, h, probs: p });
        }
        self
    }

    fn stride(&self) -> usize {
        4 + self.num_classes
    }
}

impl DetectionEngine for ScriptedEngine {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn output_len(&self) -> usize {
        self.box_capacity * self.stride()
    }

    fn box_capacity(&self) -> usize {
        self.box_capacity
    }

    fn predict(&mut self, input: &Array3<f32>) -> Result<Array1<f32>> {
        let (w, h) = self.input_size;
        if input.dim() != (3, h as usize, w as usize) {
            return Err(DetectorError::engine(format!(
                "input shape {:?} does not match network input {w}x{h}",
                input.shape()
            )));
        }
        let mut out = Array1::zeros(self.output_len());
        for (i, b) in self.scene.iter().enumerate() {
            let base = i * self.stride();
            out[base] = b.x;
            out[base + 1] = b.y;
            out[base + 2] = b.w;
            out[base + 3] = b.h;
            for (c, p) in b.probs.iter().enumerate() {
                out[base + 4 + c] = *p;
            }
        }
        Ok(out)
    }

    fn decode(
        &mut self,
        prediction: &Array1<f32>,
        _frame_size: (usize, usize),
        params: &DecodeParams,
    ) -> Result<Vec<DecodedBox>> {
        if prediction.len() != self.output_len() {
            return Err(DetectorError::engine(format!(
                "prediction has {} values, expected {}",
                prediction.len(),
                self.output_len()
            )));
        }
        let values = prediction.to_vec();
        let decoded = values
            .chunks_exact(self.stride())
            .filter_map(|chunk| {
                let probs: Vec<f32> = chunk[4..]
                    .iter()
                    .map(|&p| if p >= params.threshold { p } else { 0.0 })
                    .collect();
                probs.iter().any(|&p| p > 0.0).then(|| DecodedBox {
                    x: chunk[0],
                    y: chunk[1],
                    w: chunk[2],
                    h: chunk[3],
                    probs,
                })
            })
            .collect();
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(x: f32, y: f32, w: f32, h: f32, probs: &[f32]) -> DecodedBox {
        DecodedBox {
            x,
            y,
            w,
            h,
            probs: probs.to_vec(),
        }
    }

    #[test]
    fn test_one_entry_per_nonzero_class() {
        let mut extractor = BoxExtractor::new(3, 4);
        let boxes = extractor.extract(&[decoded(0.5, 0.5, 0.2, 0.2, &[0.0, 0.7, 0.4])]);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 1);
        assert_eq!(boxes[1].class_id, 2);
        assert_eq!(boxes[1].confidence, 0.4);
    }

    #[test]
    fn test_small_boxes_are_dropped_regardless_of_confidence() {
        let mut extractor = BoxExtractor::new(1, 4);
        let boxes = extractor.extract(&[
            decoded(0.5, 0.5, 0.009, 0.5, &[0.99]),
            decoded(0.5, 0.5, 0.5, 0.005, &[1.0]),
            decoded(0.5, 0.5, 0.02, 0.02, &[0.1]),
        ]);
        assert_eq!(boxes.len(), 1);
        assert!((boxes[0].w - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_bounds_are_clamped() {
        let mut extractor = BoxExtractor::new(1, 4);
        let boxes = extractor.extract(&[decoded(0.95, 0.05, 0.2, 0.2, &[0.5])]);
        let b = boxes[0];
        assert!((b.w - 0.15).abs() < 1e-6);
        assert!((b.h - 0.15).abs() < 1e-6);
        assert!((b.x - 0.925).abs() < 1e-6);
        assert!((b.y - 0.075).abs() < 1e-6);
    }

    #[test]
    fn test_extractor_respects_capacity() {
        let mut extractor = BoxExtractor::new(2, 1);
        let many: Vec<DecodedBox> = (0..5)
            .map(|_| decoded(0.5, 0.5, 0.3, 0.3, &[0.5, 0.5]))
            .collect();
        assert_eq!(extractor.extract(&many).len(), 2);
    }

    #[test]
    fn test_buckets_group_and_clear() {
        let mut extractor = BoxExtractor::new(3, 8);
        let boxes = extractor
            .extract(&[
                decoded(0.2, 0.2, 0.1, 0.1, &[0.0, 0.0, 0.9]),
                decoded(0.7, 0.7, 0.1, 0.1, &[0.8, 0.0, 0.0]),
            ])
            .to_vec();
        let mut buckets = ClassBuckets::new(3);
        buckets.fill(&boxes);
        assert_eq!(buckets.class(0).len(), 1);
        assert_eq!(buckets.class(2).len(), 1);
        assert_eq!(buckets.len(), 2);

        let order: Vec<usize> = buckets.iter().map(|b| b.class_id).collect();
        assert_eq!(order, vec![0, 2]);

        buckets.clear();
        assert!(buckets.is_empty());
        assert_eq!(buckets.iter().count(), 0);
    }

    #[test]
    fn test_pixel_rect() {
        let b = DetectionBox {
            x: 0.5,
            y: 0.5,
            w: 0.2,
            h: 0.2,
            class_id: 0,
            confidence: 1.0,
        };
        assert_eq!(b.to_pixel_rect(100, 100), Rect::new(40, 40, 60, 60));

        let edge = DetectionBox { x: 0.95, w: 0.1, ..b };
        assert_eq!(edge.to_pixel_rect(100, 100).xmax, 99);
    }

    #[test]
    fn test_scripted_engine_round_trip() {
        let mut engine = ScriptedEngine::new((8, 8), 2, 3)
            .with_box(0.5, 0.5, 0.2, 0.2, &[0.9, 0.1])
            .with_box(0.2, 0.3, 0.1, 0.1, &[0.0, 0.2]);
        let raw = engine.predict(&Array3::zeros((3, 8, 8))).unwrap();
        assert_eq!(raw.len(), engine.output_len());

        let boxes = engine.decode(&raw, (8, 8), &DecodeParams::default()).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].probs, vec![0.9, 0.0]);
    }

    #[test]
    fn test_scripted_engine_checks_shapes() {
        let mut engine = ScriptedEngine::new((8, 8), 1, 1);
        assert!(engine.predict(&Array3::zeros((3, 4, 4))).is_err());
        assert!(engine.decode(&Array1::zeros(2), (8, 8), &DecodeParams::default()).is_err());
    }
}
