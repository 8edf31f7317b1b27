use approx::assert_abs_diff_eq;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rgbd_detector::pose::{orientation_from_points, AxisSamples};
use rgbd_detector::{
    back_project, estimate_pose, CameraIntrinsics, ColorValidator, DepthFrame, Frame, Rect,
    Result, SensorOffset, TestPattern,
};

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(100.0, 100.0, 50.0, 50.0)
}

#[test]
fn centered_box_on_flat_wall() -> Result<()> {
    let color = Frame::test_pattern(100, 100, TestPattern::Solid([0, 0, 200]));
    let depth = DepthFrame::constant_meters(100, 100, 2.0);
    let roi = Rect::new(40, 40, 60, 60);

    let validated =
        ColorValidator::new(intrinsics(), SensorOffset::ZERO).validate(0, &roi, &color, &depth);
    assert!(!validated.invalid);

    let pose = estimate_pose(&roi, &depth, &intrinsics(), validated.position);
    assert!(pose.valid);
    assert_abs_diff_eq!(pose.position.z, 2.0, epsilon = 1e-6);
    assert_abs_diff_eq!(pose.position.x, 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(pose.position.y, 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(pose.orientation.angle(), 0.0, epsilon = 1e-4);
    Ok(())
}

#[test]
fn principal_point_for_both_depth_units() -> Result<()> {
    let mm = DepthFrame::from_millimeters(100, 100, vec![750; 100 * 100])?;
    let p = back_project(&mm, 50, 50, &intrinsics())?;
    assert_eq!((p.x, p.y), (0.0, 0.0));
    assert_abs_diff_eq!(p.z, 0.75, epsilon = 1e-6);

    let m = DepthFrame::constant_meters(100, 100, 3.5);
    let p = back_project(&m, 50, 50, &intrinsics())?;
    assert_eq!((p.x, p.y, p.z), (0.0, 0.0, 3.5));
    Ok(())
}

#[test]
fn orientation_is_orthonormal_for_random_triples() {
    fn offset(rng: &mut StdRng) -> Vector3<f32> {
        Vector3::new(
            rng.gen_range(-0.5..0.5),
            rng.gen_range(-0.5..0.5),
            rng.gen_range(-0.5..0.5),
        )
    }

    let mut rng = StdRng::seed_from_u64(0x2545_f491);
    let mut checked = 0;
    for _ in 0..200 {
        let c = Vector3::new(0.0, 0.0, 2.0) + offset(&mut rng);
        let x = c + offset(&mut rng);
        let y = c + offset(&mut rng);
        let Some(q) = orientation_from_points(&c, &x, &y) else {
            continue;
        };
        checked += 1;

        let m = q.to_rotation_matrix().into_inner();
        for i in 0..3 {
            assert_abs_diff_eq!(m.column(i).norm(), 1.0, epsilon = 1e-4);
            for j in (i + 1)..3 {
                assert_abs_diff_eq!(m.column(i).dot(&m.column(j)), 0.0, epsilon = 1e-4);
            }
        }

        // X follows the x sample, Z keeps the sign of X × Y
        let x_axis = (x - c).normalize();
        let z_raw = x_axis.cross(&(y - c).normalize());
        if z_raw.norm() < 1e-2 {
            continue;
        }
        let z_axis = z_raw.normalize();
        assert_abs_diff_eq!(m.column(0).dot(&x_axis), 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(m.column(2).dot(&z_axis), 1.0, epsilon = 1e-3);
    }
    assert!(checked > 150);
}

#[test]
fn axis_samples_use_integer_quarters() {
    let s = AxisSamples::for_box(&Rect::new(10, 20, 31, 45));
    assert_eq!(s.center, (20, 32));
    assert_eq!(s.x_axis, (25, 32));
    assert_eq!(s.y_axis, (20, 38));
}

#[test]
fn roi_outside_color_family_is_invalid() {
    // green frame, blue class
    let color = Frame::test_pattern(100, 100, TestPattern::Solid([0, 200, 0]));
    let depth = DepthFrame::constant_meters(100, 100, 2.0);
    let roi = Rect::new(40, 40, 60, 60);
    let validated =
        ColorValidator::new(intrinsics(), SensorOffset::ZERO).validate(4, &roi, &color, &depth);
    assert!(validated.invalid);
    assert!(validated.position.is_none());

    let pose = estimate_pose(&roi, &depth, &intrinsics(), validated.position);
    assert!(!pose.valid);
}
