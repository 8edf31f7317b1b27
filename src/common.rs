use std::fmt;

use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }
}

impl Default for CameraIntrinsics {
    // RealSense D435 color stream at 640x480
    fn default() -> Self {
        Self {
            fx: 614.016_05,
            fy: 614.022_15,
            cx: 327.855_87,
            cy: 247.047_79,
        }
    }
}

/// Translation between the color and depth sensor origins, in metres.
///
/// Subtracted from the validated X/Y so positions are expressed in the
/// color camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorOffset {
    pub x: f32,
    pub y: f32,
}

impl SensorOffset {
    pub const ZERO: SensorOffset = SensorOffset { x: 0.0, y: 0.0 };
}

impl Default for SensorOffset {
    fn default() -> Self {
        Self { x: -0.001, y: 0.015 }
    }
}

/// Inclusive pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl Rect {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    /// Integer pixel center, `((xmin+xmax)/2, (ymin+ymax)/2)`.
    pub fn center(&self) -> (i32, i32) {
        ((self.xmin + self.xmax) / 2, (self.ymin + self.ymax) / 2)
    }

    /// Restrict the rectangle to a `width`×`height` image. Returns `None`
    /// when nothing of it remains inside.
    pub fn clamp_to(&self, width: usize, height: usize) -> Option<Rect> {
        if width == 0 || height == 0 {
            return None;
        }
        let max_x = width as i32 - 1;
        let max_y = height as i32 - 1;
        let clamped = Rect {
            xmin: self.xmin.clamp(0, max_x),
            ymin: self.ymin.clamp(0, max_y),
            xmax: self.xmax.clamp(0, max_x),
            ymax: self.ymax.clamp(0, max_y),
        };
        if self.xmax < 0 || self.ymax < 0 || self.xmin > max_x || self.ymin > max_y {
            return None;
        }
        if clamped.xmin > clamped.xmax || clamped.ymin > clamped.ymax {
            return None;
        }
        Some(clamped)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {})-({}, {})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}
