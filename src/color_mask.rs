//! Color-validated depth.
//!
//! Only depth pixels whose color matches the family of the detected class
//! contribute to the depth average of a region, so background behind a
//! loosely fitting box does not pull the estimate away from the object.

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::common::{CameraIntrinsics, Rect, SensorOffset};
use crate::frame::Frame;
use crate::rgbd::DepthFrame;

/// Hue/saturation/value with OpenCV's 8-bit ranges: H in `[0, 180)`, S and
/// V in `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

pub fn bgr_to_hsv([b, g, r]: [u8; 3]) -> Hsv {
    let (bf, gf, rf) = (b as f32, g as f32, r as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;
    let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };
    let mut h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }
    Hsv {
        h: (h / 2.0).round().min(179.0) as u8,
        s: s.round() as u8,
        v: v as u8,
    }
}

/// Inclusive HSV box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: Hsv) -> bool {
        let px = [hsv.h, hsv.s, hsv.v];
        (0..3).all(|i| self.lower[i] <= px[i] && px[i] <= self.upper[i])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFamily {
    Red,
    Blue,
    Green,
    Yellow,
    Black,
}

const RED: [HsvRange; 2] = [
    HsvRange::new([0, 65, 75], [12, 255, 255]),
    HsvRange::new([169, 65, 75], [180, 255, 255]),
];
const BLUE: [HsvRange; 1] = [HsvRange::new([100, 65, 75], [130, 255, 255])];
const GREEN: [HsvRange; 1] = [HsvRange::new([49, 50, 50], [107, 255, 255])];
const YELLOW: [HsvRange; 1] = [HsvRange::new([20, 100, 100], [30, 255, 255])];
const BLACK: [HsvRange; 1] = [HsvRange::new([0, 0, 0], [0, 0, 10])];

impl ColorFamily {
    /// Classes 0..=11 cycle red, blue, green; 12 is yellow, 13 black.
    pub fn for_class(class_id: usize) -> Option<Self> {
        match class_id {
            0..=11 => Some(match class_id % 3 {
                0 => ColorFamily::Red,
                1 => ColorFamily::Blue,
                _ => ColorFamily::Green,
            }),
            12 => Some(ColorFamily::Yellow),
            13 => Some(ColorFamily::Black),
            _ => None,
        }
    }

    pub fn ranges(self) -> &'static [HsvRange] {
        match self {
            ColorFamily::Red => &RED,
            ColorFamily::Blue => &BLUE,
            ColorFamily::Green => &GREEN,
            ColorFamily::Yellow => &YELLOW,
            ColorFamily::Black => &BLACK,
        }
    }

    pub fn matches(self, bgr: [u8; 3]) -> bool {
        let hsv = bgr_to_hsv(bgr);
        self.ranges().iter().any(|r| r.contains(hsv))
    }
}

/// Outcome of validating a region against its color family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedDepth {
    /// Averaged depth in metres, 0 when invalid
    pub depth: f32,
    /// Camera-frame position of the region center, `None` when invalid
    pub position: Option<Vector3<f32>>,
    pub samples: usize,
    pub invalid: bool,
}

impl ValidatedDepth {
    fn invalid(samples: usize) -> Self {
        Self {
            depth: 0.0,
            position: None,
            samples,
            invalid: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColorValidator {
    intrinsics: CameraIntrinsics,
    offset: SensorOffset,
}

impl ColorValidator {
    pub fn new(intrinsics: CameraIntrinsics, offset: SensorOffset) -> Self {
        Self { intrinsics, offset }
    }

    /// Average the depth over pixels of `roi` whose color matches the family
    /// of `class_id` and whose depth is finite and non-zero.
    pub fn validate(
        &self,
        class_id: usize,
        roi: &Rect,
        color: &Frame,
        depth: &DepthFrame,
    ) -> ValidatedDepth {
        let Some(family) = ColorFamily::for_class(class_id) else {
            debug!(class_id, "no color family for class");
            return ValidatedDepth::invalid(0);
        };
        if (color.width, color.height) != (depth.width, depth.height) {
            warn!(
                color = ?(color.width, color.height),
                depth = ?(depth.width, depth.height),
                "color and depth frames are not aligned"
            );
            return ValidatedDepth::invalid(0);
        }
        let Some(area) = roi.clamp_to(depth.width, depth.height) else {
            return ValidatedDepth::invalid(0);
        };

        let mut sum = 0.0f64;
        let mut samples = 0usize;
        for x in area.xmin..=area.xmax {
            for y in area.ymin..=area.ymax {
                let (x, y) = (x as usize, y as usize);
                if !family.matches(color.bgr_at(x, y)) {
                    continue;
                }
                if let Some(d) = depth.measured(x, y) {
                    sum += d as f64;
                    samples += 1;
                }
            }
        }

        if samples == 0 {
            debug!(class_id, roi = %roi, "no color-matched depth in region");
            return ValidatedDepth::invalid(0);
        }
        let mean = (sum / samples as f64) as f32;
        if mean == 0.0 || !mean.is_finite() {
            return ValidatedDepth::invalid(samples);
        }

        let z = mean * depth.unit().scale();
        let (u, v) = roi.center();
        let x = (u as f32 - self.intrinsics.cx) * z / self.intrinsics.fx - self.offset.x;
        let y = (v as f32 - self.intrinsics.cy) * z / self.intrinsics.fy - self.offset.y;
        info!("X {x:.4}, Y {y:.4}, Z {z:.4}, samples {samples}");

        ValidatedDepth {
            depth: z,
            position: Some(Vector3::new(x, y, z)),
            samples,
            invalid: false,
        }
    }
}
