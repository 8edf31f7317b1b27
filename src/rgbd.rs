//! Depth frames and pinhole back-projection.

use nalgebra::Vector3;
use tracing::error;

use crate::common::CameraIntrinsics;
use crate::error::{DetectorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthUnit {
    Meter,
    Millimeter,
}

impl DepthUnit {
    /// Factor converting a raw sample into metres.
    pub fn scale(self) -> f32 {
        match self {
            DepthUnit::Meter => 1.0,
            DepthUnit::Millimeter => 0.001,
        }
    }
}

/// Per-pixel depth storage.
#[derive(Debug, Clone, PartialEq)]
pub enum DepthData {
    /// Fixed-point millimetres, 0 marks a missing sample (16UC1)
    Millimeters(Vec<u16>),
    /// Floating-point metres, non-finite marks a missing sample (32FC1)
    Meters(Vec<f32>),
}

/// Depth image aligned with the color frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: usize,
    pub height: usize,
    pub data: DepthData,
}

impl DepthFrame {
    pub fn from_millimeters(width: usize, height: usize, data: Vec<u16>) -> Result<Self> {
        check_len(width, height, data.len())?;
        Ok(Self {
            width,
            height,
            data: DepthData::Millimeters(data),
        })
    }

    pub fn from_meters(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        check_len(width, height, data.len())?;
        Ok(Self {
            width,
            height,
            data: DepthData::Meters(data),
        })
    }

    /// Frame with the same depth (in metres) everywhere.
    pub fn constant_meters(width: usize, height: usize, depth: f32) -> Self {
        Self {
            width,
            height,
            data: DepthData::Meters(vec![depth; width * height]),
        }
    }

    pub fn unit(&self) -> DepthUnit {
        match self.data {
            DepthData::Millimeters(_) => DepthUnit::Millimeter,
            DepthData::Meters(_) => DepthUnit::Meter,
        }
    }

    /// Number of stored samples, which may disagree with the dimensions when
    /// the fields were filled in directly.
    pub fn sample_count(&self) -> usize {
        match &self.data {
            DepthData::Millimeters(d) => d.len(),
            DepthData::Meters(d) => d.len(),
        }
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Raw sample in the frame's native unit. Caller guarantees bounds.
    pub fn raw(&self, x: usize, y: usize) -> f32 {
        let i = y * self.width + x;
        match &self.data {
            DepthData::Millimeters(d) => d[i] as f32,
            DepthData::Meters(d) => d[i],
        }
    }

    /// Sample accepted by the back-projection validity rule: non-zero for
    /// millimetres, finite for metres.
    pub fn projectable(&self, x: usize, y: usize) -> Option<f32> {
        let v = self.raw(x, y);
        let valid = match self.data {
            DepthData::Millimeters(_) => v != 0.0,
            DepthData::Meters(_) => v.is_finite(),
        };
        valid.then_some(v)
    }

    /// Sample that is both finite and non-zero, in native units.
    pub fn measured(&self, x: usize, y: usize) -> Option<f32> {
        let v = self.raw(x, y);
        (v.is_finite() && v != 0.0).then_some(v)
    }
}

fn check_len(width: usize, height: usize, len: usize) -> Result<()> {
    if width * height != len {
        return Err(DetectorError::FrameFormat {
            expected: format!("{width}x{height} depth ({} samples)", width * height),
            actual: format!("{len} samples"),
        });
    }
    Ok(())
}

/// Point whose every coordinate is NaN, meaning "depth unknown".
pub fn nan_point() -> Vector3<f32> {
    Vector3::repeat(f32::NAN)
}

/// Back-project pixel `(x, y)` into the camera frame, in metres.
///
/// Invalid samples produce [`nan_point`]; pixels outside the frame are an
/// [`DetectorError::OutOfBounds`] error.
pub fn back_project(
    depth: &DepthFrame,
    x: i32,
    y: i32,
    intrinsics: &CameraIntrinsics,
) -> Result<Vector3<f32>> {
    if !depth.contains(x as i64, y as i64) {
        return Err(DetectorError::OutOfBounds {
            x: x as i64,
            y: y as i64,
            width: depth.width,
            height: depth.height,
        });
    }

    let Some(d) = depth.projectable(x as usize, y as usize) else {
        return Ok(nan_point());
    };

    let unit_scaling = depth.unit().scale();
    let constant_x = unit_scaling / intrinsics.fx;
    let constant_y = unit_scaling / intrinsics.fy;
    Ok(Vector3::new(
        (x as f32 - intrinsics.cx) * d * constant_x,
        (y as f32 - intrinsics.cy) * d * constant_y,
        d * unit_scaling,
    ))
}

/// Like [`back_project`], but logs out-of-bounds pixels and yields NaN.
pub fn back_project_or_nan(
    depth: &DepthFrame,
    x: i32,
    y: i32,
    intrinsics: &CameraIntrinsics,
) -> Vector3<f32> {
    match back_project(depth, x, y, intrinsics) {
        Ok(point) => point,
        Err(err) => {
            error!("{err}");
            nan_point()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(100.0, 100.0, 50.0, 50.0)
    }

    #[test]
    fn test_principal_point_projects_onto_optical_axis() {
        let depth = DepthFrame::from_millimeters(100, 100, vec![1500; 100 * 100]).unwrap();
        let p = back_project(&depth, 50, 50, &intrinsics()).unwrap();
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, 0.0);
        assert_abs_diff_eq!(p.z, 1.5, epsilon = 1e-6);

        let depth = DepthFrame::constant_meters(100, 100, 2.25);
        let p = back_project(&depth, 50, 50, &intrinsics()).unwrap();
        assert_eq!((p.x, p.y), (0.0, 0.0));
        assert_abs_diff_eq!(p.z, 2.25, epsilon = 1e-6);
    }

    #[test]
    fn test_off_axis_pixel() {
        let depth = DepthFrame::constant_meters(100, 100, 2.0);
        let p = back_project(&depth, 70, 40, &intrinsics()).unwrap();
        assert_abs_diff_eq!(p.x, 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, -0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(p.z, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_samples_are_nan() {
        let depth = DepthFrame::from_millimeters(4, 4, vec![0; 16]).unwrap();
        let p = back_project(&depth, 1, 1, &intrinsics()).unwrap();
        assert!(p.iter().all(|v| v.is_nan()));

        let mut samples = vec![1.0f32; 16];
        samples[5] = f32::INFINITY;
        samples[6] = f32::NAN;
        let depth = DepthFrame::from_meters(4, 4, samples).unwrap();
        for x in [1, 2] {
            let p = back_project(&depth, x, 1, &intrinsics()).unwrap();
            assert!(p.iter().all(|v| v.is_nan()));
        }
    }

    #[test]
    fn test_out_of_bounds() {
        let depth = DepthFrame::constant_meters(10, 10, 1.0);
        let err = back_project(&depth, 10, 3, &intrinsics()).unwrap_err();
        assert!(matches!(err, DetectorError::OutOfBounds { x: 10, y: 3, .. }));
        assert!(back_project(&depth, -1, 0, &intrinsics()).is_err());

        let p = back_project_or_nan(&depth, 3, 42, &intrinsics());
        assert!(p.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_zero_meter_sample_is_projectable_but_not_measured() {
        let depth = DepthFrame::constant_meters(2, 2, 0.0);
        assert_eq!(depth.projectable(0, 0), Some(0.0));
        assert_eq!(depth.measured(0, 0), None);
    }
}
