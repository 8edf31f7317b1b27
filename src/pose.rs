//! Position and orientation of a detection from three depth samples.
//!
//! The local frame is spanned by the box center and two samples taken toward
//! three quarters of the box width (X) and height (Y). Z is `X × Y`; this
//! order and sign are what downstream consumers expect.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::common::{CameraIntrinsics, Rect};
use crate::rgbd::{back_project_or_nan, DepthFrame};

const DEGENERATE_EPS: f32 = 1e-6;

/// Pose of one detection in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection3DPose {
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
    pub valid: bool,
}

impl Detection3DPose {
    pub fn invalid() -> Self {
        Self {
            position: Vector3::repeat(f32::NAN),
            orientation: UnitQuaternion::identity(),
            valid: false,
        }
    }
}

/// Pixels sampled for the local frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSamples {
    pub center: (i32, i32),
    pub x_axis: (i32, i32),
    pub y_axis: (i32, i32),
}

impl AxisSamples {
    pub fn for_box(rect: &Rect) -> Self {
        let u = rect.width();
        let v = rect.height();
        Self {
            center: (rect.xmin + u / 2, rect.ymin + v / 2),
            x_axis: (rect.xmin + 3 * u / 4, rect.ymin + v / 2),
            y_axis: (rect.xmin + u / 2, rect.ymin + 3 * v / 4),
        }
    }
}

/// Orientation from three back-projected points, or `None` when any point
/// is unknown or the axes are degenerate.
pub fn orientation_from_points(
    center: &Vector3<f32>,
    x_end: &Vector3<f32>,
    y_end: &Vector3<f32>,
) -> Option<UnitQuaternion<f32>> {
    let points_known = [center, x_end, y_end]
        .iter()
        .all(|p| p.iter().all(|v| v.is_finite()));
    if !points_known {
        return None;
    }

    let x_axis = (x_end - center).try_normalize(DEGENERATE_EPS)?;
    let y_axis = (y_end - center).try_normalize(DEGENERATE_EPS)?;
    let z_axis = x_axis.cross(&y_axis).try_normalize(DEGENERATE_EPS)?;
    // samples on a slanted surface are rarely perpendicular; keep X, rebuild Y
    let y_axis = z_axis.cross(&x_axis);

    let basis = Matrix3::from_columns(&[x_axis, y_axis, z_axis]);
    let rotation = Rotation3::from_matrix_unchecked(basis);
    let q = UnitQuaternion::from_rotation_matrix(&rotation);
    let q = UnitQuaternion::new_normalize(q.into_inner());
    q.coords.iter().all(|v| v.is_finite()).then_some(q)
}

/// Local orientation of the box surface from the depth frame.
pub fn estimate_orientation(
    rect: &Rect,
    depth: &DepthFrame,
    intrinsics: &CameraIntrinsics,
) -> Option<UnitQuaternion<f32>> {
    let samples = AxisSamples::for_box(rect);
    let project = |(x, y): (i32, i32)| back_project_or_nan(depth, x, y, intrinsics);
    let center = project(samples.center);
    let x_end = project(samples.x_axis);
    let y_end = project(samples.y_axis);
    orientation_from_points(&center, &x_end, &y_end)
}

/// Combine the validated position with the box orientation.
///
/// `position` comes from the color-validated depth average; the pose is
/// invalid when it is missing or the orientation cannot be computed.
pub fn estimate_pose(
    rect: &Rect,
    depth: &DepthFrame,
    intrinsics: &CameraIntrinsics,
    position: Option<Vector3<f32>>,
) -> Detection3DPose {
    let Some(position) = position else {
        return Detection3DPose::invalid();
    };
    match estimate_orientation(rect, depth, intrinsics) {
        Some(orientation) => Detection3DPose {
            position,
            orientation,
            valid: true,
        },
        None => Detection3DPose {
            position,
            orientation: UnitQuaternion::identity(),
            valid: false,
        },
    }
}
